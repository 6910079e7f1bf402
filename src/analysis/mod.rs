//! Analyses over block trees.

pub mod access;

pub use access::{compute_access, compute_access_each, AccessPattern, IndexStride};
