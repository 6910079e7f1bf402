//! Pretty printing for block trees.
//!
//! Blocks render as a header with their indices, a parenthesized list of
//! constraints and refinements, and a braced statement body:
//!
//! ```text
//! block kernel_0 [k:5, m:5, n:5] (
//!     in A[m, k] fp32(1:5, 1:1)
//!     out C[m, n]:add fp32(1:5, 1:1)
//! ) {
//!     $A = load(A)
//!     C = store($C)
//! }
//! ```

use crate::ir::block::{Block, Program, Statement};
use pretty::{DocAllocator, DocBuilder, BoxAllocator};

/// Default line width for pretty printing.
pub const DEFAULT_WIDTH: usize = 80;

/// Indentation of nested content.
const INDENT: isize = 4;

/// A pretty-printable value.
pub trait PrettyPrint {
    /// Convert to a pretty document.
    fn to_doc<'a, D: DocAllocator<'a>>(&self, allocator: &'a D) -> DocBuilder<'a, D>;

    /// Pretty print to a string with the given width.
    fn pretty_print(&self, width: usize) -> String {
        let allocator = BoxAllocator;
        let doc = self.to_doc(&allocator);
        let mut output = String::new();
        match doc.render_fmt(width, &mut output) {
            Ok(()) => output,
            Err(_) => String::new(),
        }
    }

    /// Pretty print with default width.
    fn pretty(&self) -> String {
        self.pretty_print(DEFAULT_WIDTH)
    }
}

/// One item per line, each preceded by a hard line break.
fn lines<'a, D, I>(allocator: &'a D, items: I) -> DocBuilder<'a, D>
where
    D: DocAllocator<'a>,
    I: IntoIterator<Item = DocBuilder<'a, D>>,
{
    items
        .into_iter()
        .fold(allocator.nil(), |acc, item| acc.append(allocator.hardline()).append(item))
}

impl PrettyPrint for Block {
    fn to_doc<'a, D: DocAllocator<'a>>(&self, allocator: &'a D) -> DocBuilder<'a, D> {
        let idxs: Vec<String> = self.idxs.iter().map(|i| i.to_string()).collect();
        let header = allocator.text(format!("block {} [{}] (", self.name, idxs.join(", ")));

        let decls = lines(
            allocator,
            self.constraints
                .iter()
                .map(|c| allocator.text(format!("{} >= 0", c)))
                .chain(self.refs.iter().map(|r| allocator.text(r.to_string()))),
        );

        let body = lines(
            allocator,
            self.stmts.iter().map(|stmt| match stmt {
                Statement::Block(inner) => inner.to_doc(allocator),
                other => allocator.text(other.to_string()),
            }),
        );

        header
            .append(decls.nest(INDENT))
            .append(allocator.hardline())
            .append(allocator.text(") {"))
            .append(body.nest(INDENT))
            .append(allocator.hardline())
            .append(allocator.text("}"))
    }
}

impl PrettyPrint for Program {
    fn to_doc<'a, D: DocAllocator<'a>>(&self, allocator: &'a D) -> DocBuilder<'a, D> {
        allocator
            .text(format!("program {}", self.name))
            .append(allocator.hardline())
            .append(self.root.to_doc(allocator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::{Index, RefDir, Refinement};
    use crate::ir::shape::{DataType, TensorShape};
    use crate::polyhedral::Affine;

    fn sample() -> Block {
        let shape = TensorShape::simple(DataType::Float32, &[4]).with_uniform_size(1);
        let mut inner = Block::new("inner");
        inner.idxs.push(Index::new("i", 4));
        inner.constraints.push(Affine::constant(3) - Affine::var("i"));
        inner.refs.push(Refinement::new(RefDir::In, "X", "X", vec![Affine::var("i")], shape));
        inner.stmts.push(Statement::Load { from: "X".into(), into: "$X".into() });

        let mut outer = Block::new("outer");
        outer.stmts.push(Statement::Block(Box::new(inner)));
        outer
    }

    #[test]
    fn test_block_layout() {
        let text = sample().pretty();
        let expected = "\
block outer [] (
) {
    block inner [i:4] (
        -i + 3 >= 0
        in X[i] fp32(1:1)
    ) {
        $X = load(X)
    }
}";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_program_header() {
        let program = Program { name: "demo".into(), root: sample() };
        assert!(program.pretty().starts_with("program demo\nblock outer"));
    }
}
