//! Intermediate representation: tensor shapes, the block tree and the
//! lowering that builds it from parsed functions.

pub mod shape;
pub mod block;
pub mod lower;

pub use shape::{DataType, TensorDim, TensorShape};
pub use block::{AggOp, Block, ConstValue, Index, Program, RefDir, Refinement, Statement};
pub use lower::{generate_program, lower_function, RunInfo};
