//! Abstract syntax tree for the contraction language.

use crate::ir::block::AggOp;
use crate::polyhedral::Affine;
use crate::utils::location::Span;
use serde::{Serialize, Deserialize};
use std::fmt;

/// A parsed function: typed inputs, named outputs and a list of contractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: Option<String>,
    pub inputs: Vec<Param>,
    pub outputs: Vec<String>,
    pub contractions: Vec<Contraction>,
    #[serde(skip)]
    pub span: Span,
}

impl Function {
    pub fn input(&self, name: &str) -> Option<&Param> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }
}

/// An input parameter such as `A[M, K]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Declared dimensions; empty when the rank is left to the shape
    pub dims: Vec<SizeExpr>,
    #[serde(skip)]
    pub span: Span,
}

/// A dimension size: a literal or a dimension name bound by the inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeExpr {
    Const(u64),
    Dim(String),
}

impl fmt::Display for SizeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeExpr::Const(v) => write!(f, "{}", v),
            SizeExpr::Dim(d) => write!(f, "{}", d),
        }
    }
}

/// A tensor indexed by affine expressions, e.g. `A[m, 2*k + 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorAccess {
    pub tensor: String,
    pub indices: Vec<Affine>,
    #[serde(skip)]
    pub span: Span,
}

impl TensorAccess {
    /// Loop index names used by this access.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indices.iter().flat_map(|a| a.names())
    }
}

impl fmt::Display for TensorAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.tensor)?;
        for (i, idx) in self.indices.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", idx)?;
        }
        write!(f, "]")
    }
}

/// Binary operation combining the inputs of a contraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombinationOp {
    Mul,
    Add,
    Sub,
    Div,
}

impl CombinationOp {
    /// Name of the scalar intrinsic implementing this operation.
    pub fn intrinsic(&self) -> &'static str {
        match self {
            CombinationOp::Mul => "mul",
            CombinationOp::Add => "add",
            CombinationOp::Sub => "sub",
            CombinationOp::Div => "div",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CombinationOp::Mul => "*",
            CombinationOp::Add => "+",
            CombinationOp::Sub => "-",
            CombinationOp::Div => "/",
        }
    }
}

/// `C[m, n : M, N] = +(A[m, k] * B[k, n])`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contraction {
    pub output: TensorAccess,
    /// Output sizes after `:`; empty when omitted
    pub sizes: Vec<SizeExpr>,
    pub agg: AggOp,
    /// `None` for a single-input contraction
    pub combo: Option<CombinationOp>,
    pub inputs: Vec<TensorAccess>,
    #[serde(skip)]
    pub span: Span,
}

impl Contraction {
    /// Every loop index named by the output or any input.
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.output
            .index_names()
            .chain(self.inputs.iter().flat_map(|i| i.index_names()))
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

fn agg_symbol(op: AggOp) -> &'static str {
    match op {
        AggOp::Assign => "=",
        AggOp::Add => "+",
        AggOp::Mul => "*",
        AggOp::Max => ">",
        AggOp::Min => "<",
    }
}

impl fmt::Display for Contraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.output.tensor)?;
        write!(f, "[")?;
        for (i, idx) in self.output.indices.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", idx)?;
        }
        if !self.sizes.is_empty() {
            let sizes: Vec<String> = self.sizes.iter().map(|s| s.to_string()).collect();
            write!(f, " : {}", sizes.join(", "))?;
        }
        write!(f, "] = {}(", agg_symbol(self.agg))?;
        let sep = match self.combo {
            Some(op) => format!(" {} ", op.symbol()),
            None => ", ".to_string(),
        };
        let inputs: Vec<String> = self.inputs.iter().map(|i| i.to_string()).collect();
        write!(f, "{})", inputs.join(&sep))
    }
}
