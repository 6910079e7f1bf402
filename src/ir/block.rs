//! Block IR: nested loop blocks over refined tensor views.
//!
//! A block declares loop indices, optional affine constraints on them,
//! refinements (views of parent buffers positioned by affine accesses) and a
//! list of statements. Nested blocks express loop nests:
//!
//! ```text
//! block kernel_0 [k:5, m:5, n:5] (
//!     in A[m, k] fp32(1:5, 1:1)
//!     in B[k, n] fp32(1:5, 1:1)
//!     out C[m, n]:add fp32(1:5, 1:1)
//! ) {
//!     $A = load(A)
//!     $B = load(B)
//!     $C = mul($A, $B)
//!     C = store($C)
//! }
//! ```

use crate::ir::shape::TensorShape;
use crate::polyhedral::Affine;
use serde::{Serialize, Deserialize};
use std::fmt;

/// A loop index of a block.
///
/// The value of the index is `affine(parent indices) + local`, where `local`
/// iterates over `[0, range)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub range: u64,
    /// Offset in terms of the parent block's indices (zero for fresh indices)
    pub affine: Affine,
}

impl Index {
    /// A fresh index iterating `[0, range)`.
    pub fn new(name: &str, range: u64) -> Self {
        Self { name: name.to_string(), range, affine: Affine::zero() }
    }

    /// An index that forwards a value computed from the parent's indices.
    pub fn passthrough(name: &str, affine: Affine) -> Self {
        Self { name: name.to_string(), range: 1, affine }
    }

    /// Fresh indices introduce a new loop and carry no parent offset.
    pub fn is_fresh(&self) -> bool {
        self.affine.is_zero()
    }

    pub fn is_passthrough(&self) -> bool {
        self.range == 1 && !self.affine.is_zero()
    }
}

/// Data flow direction of a refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefDir {
    None,
    In,
    Out,
    InOut,
}

impl RefDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefDir::None => "none",
            RefDir::In => "in",
            RefDir::Out => "out",
            RefDir::InOut => "inout",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, RefDir::Out | RefDir::InOut)
    }
}

/// How stores into an output combine with existing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggOp {
    Assign,
    Add,
    Mul,
    Max,
    Min,
}

impl AggOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggOp::Assign => "assign",
            AggOp::Add => "add",
            AggOp::Mul => "mul",
            AggOp::Max => "max",
            AggOp::Min => "min",
        }
    }
}

/// A view of a parent buffer made visible inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refinement {
    pub dir: RefDir,
    /// Buffer name in the parent scope; empty when the buffer is declared here
    pub from: String,
    /// Name of the view inside this block
    pub into: String,
    /// Position of the view, one expression per dimension
    pub access: Vec<Affine>,
    pub shape: TensorShape,
    pub agg_op: Option<AggOp>,
}

impl Refinement {
    /// A view of `from` named `into`.
    pub fn new(dir: RefDir, from: &str, into: &str, access: Vec<Affine>, shape: TensorShape) -> Self {
        Self {
            dir,
            from: from.to_string(),
            into: into.to_string(),
            access,
            shape,
            agg_op: None,
        }
    }

    /// A buffer declared at this block, positioned at the origin.
    pub fn declare(dir: RefDir, name: &str, shape: TensorShape) -> Self {
        let access = vec![Affine::zero(); shape.rank()];
        Self::new(dir, "", name, access, shape)
    }

    pub fn with_agg(mut self, op: AggOp) -> Self {
        self.agg_op = Some(op);
        self
    }

    pub fn is_declaration(&self) -> bool {
        self.from.is_empty()
    }

    /// Whether this refinement exposes the parent buffer `buffer`.
    pub fn refines(&self, buffer: &str) -> bool {
        self.from == buffer || (self.is_declaration() && self.into == buffer)
    }
}

/// Constant values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

/// A statement inside a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// `into = load(from)`: read one element of a view into a scalar
    Load { from: String, into: String },
    /// `into = store(from)`: write a scalar into a view
    Store { from: String, into: String },
    /// `name = constant`
    Constant { name: String, value: ConstValue },
    /// Scalar operation such as `mul` or `add`
    Intrinsic { name: String, inputs: Vec<String>, outputs: Vec<String> },
    /// A nested loop block
    Block(Box<Block>),
}

impl Statement {
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Statement::Block(b) => Some(b.as_ref()),
            _ => None,
        }
    }

    pub fn as_block_mut(&mut self) -> Option<&mut Block> {
        match self {
            Statement::Block(b) => Some(b.as_mut()),
            _ => None,
        }
    }
}

/// A loop block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub idxs: Vec<Index>,
    /// Affine expressions that must be `>= 0` for an iteration to run
    pub constraints: Vec<Affine>,
    pub refs: Vec<Refinement>,
    pub stmts: Vec<Statement>,
}

impl Block {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    pub fn idx(&self, name: &str) -> Option<&Index> {
        self.idxs.iter().find(|i| i.name == name)
    }

    pub fn idx_names(&self) -> Vec<&str> {
        self.idxs.iter().map(|i| i.name.as_str()).collect()
    }

    /// Refinement whose view is named `into`.
    pub fn ref_by_into(&self, into: &str) -> Option<&Refinement> {
        self.refs.iter().find(|r| r.into == into)
    }

    /// Direct child blocks in statement order.
    pub fn sub_blocks(&self) -> impl Iterator<Item = &Block> {
        self.stmts.iter().filter_map(Statement::as_block)
    }

    /// The `n`th direct child block.
    pub fn child(&self, n: usize) -> Option<&Block> {
        self.sub_blocks().nth(n)
    }

    pub fn child_mut(&mut self, n: usize) -> Option<&mut Block> {
        self.stmts.iter_mut().filter_map(Statement::as_block_mut).nth(n)
    }

    /// Depth-first search for a block by name, including `self`.
    pub fn find_block(&self, name: &str) -> Option<&Block> {
        if self.name == name {
            return Some(self);
        }
        self.sub_blocks().find_map(|b| b.find_block(name))
    }

    /// Total number of iterations of this block's own indices.
    pub fn trip_count(&self) -> u64 {
        self.idxs.iter().map(|i| i.range).product()
    }

    /// Whether `buffer`, as named in the parent scope, is refined or used
    /// anywhere in this block or below it.
    pub fn mentions_buffer(&self, buffer: &str) -> bool {
        let views: Vec<&str> = self.refs
            .iter()
            .filter(|r| r.refines(buffer))
            .map(|r| r.into.as_str())
            .collect();
        if !views.is_empty() {
            return views.iter().any(|v| self.uses_view(v));
        }
        if self.refs.iter().any(|r| r.into == buffer) {
            return false;
        }
        self.uses_view(buffer)
    }

    fn uses_view(&self, view: &str) -> bool {
        self.stmts.iter().any(|stmt| match stmt {
            Statement::Load { from, .. } => from == view,
            Statement::Store { into, .. } => into == view,
            Statement::Block(inner) => inner.mentions_buffer(view),
            _ => false,
        })
    }

    /// Chain of first child blocks starting at `self`: `[self, child, grandchild, ...]`.
    pub fn nest(&self) -> Vec<&Block> {
        let mut chain = vec![self];
        let mut cur = self;
        while let Some(next) = cur.child(0) {
            chain.push(next);
            cur = next;
        }
        chain
    }
}

/// A lowered program: the root declares user buffers and holds `main`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub root: Block,
}

impl Program {
    pub fn main(&self) -> Option<&Block> {
        self.root.child(0)
    }

    pub fn main_mut(&mut self) -> Option<&mut Block> {
        self.root.child_mut(0)
    }

    /// Kernel blocks inside `main`, in program order.
    pub fn kernels(&self) -> Vec<&Block> {
        self.main().map(|m| m.sub_blocks().collect()).unwrap_or_default()
    }

    pub fn kernel(&self, n: usize) -> Option<&Block> {
        self.main().and_then(|m| m.child(n))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Load { from, into } => write!(f, "{} = load({})", into, from),
            Statement::Store { from, into } => write!(f, "{} = store({})", into, from),
            Statement::Constant { name, value } => match value {
                ConstValue::Int(v) => write!(f, "{} = {}", name, v),
                ConstValue::Float(v) => write!(f, "{} = {:?}", name, v),
            },
            Statement::Intrinsic { name, inputs, outputs } => {
                write!(f, "{} = {}({})", outputs.join(", "), name, inputs.join(", "))
            }
            Statement::Block(b) => write!(f, "block {}", b.name),
        }
    }
}

impl fmt::Display for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.dir.as_str())?;
        if !self.from.is_empty() && self.from != self.into {
            write!(f, "{} = ", self.from)?;
        }
        write!(f, "{}[", self.into)?;
        for (i, a) in self.access.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, "]")?;
        if let Some(op) = self.agg_op {
            write!(f, ":{}", op.as_str())?;
        }
        write!(f, " {}", self.shape)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_passthrough() {
            write!(f, "{} = {}", self.name, self.affine)
        } else if self.affine.is_zero() {
            write!(f, "{}:{}", self.name, self.range)
        } else {
            write!(f, "{}:{} + {}", self.name, self.range, self.affine)
        }
    }
}
