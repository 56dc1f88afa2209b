//! The compiled expression tree.

use std::fmt::{self, Write};

use strata_data_type::IntType;

use crate::{
    lex::tokenize, parse::Compiler, query::Query, CompileError, Diagnostics, VariableSource,
};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-a`
    Negate,
    /// `~a`
    Invert,
}

impl UnaryOp {
    /// Apply the operator.
    pub fn apply(self, a: i64) -> i64 {
        match self {
            UnaryOp::Negate => a.wrapping_neg(),
            UnaryOp::Invert => !a,
        }
    }

    fn name(self) -> &'static str {
        match self {
            UnaryOp::Negate => "negate",
            UnaryOp::Invert => "invert",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    /// Binding strength of the operator. Higher binds tighter.
    pub fn score(self) -> u32 {
        match self {
            BinaryOp::Or => 4,
            BinaryOp::Xor => 6,
            BinaryOp::And => 8,
            BinaryOp::Eq | BinaryOp::Ne => 10,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 12,
            BinaryOp::Shl | BinaryOp::Shr => 14,
            BinaryOp::Add | BinaryOp::Sub => 20,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 30,
        }
    }

    /// Apply the operator with wrapping arithmetic.
    ///
    /// Division and modulo by zero give 0, and comparisons give 1 or 0.
    pub fn apply(self, a: i64, b: i64) -> i64 {
        match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    0
                } else {
                    a.wrapping_div(b)
                }
            }
            BinaryOp::Mod => {
                if b == 0 {
                    0
                } else {
                    a.wrapping_rem(b)
                }
            }
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
            BinaryOp::Shl => a.wrapping_shl(b as u32),
            BinaryOp::Shr => a.wrapping_shr(b as u32),
            BinaryOp::Eq => (a == b) as i64,
            BinaryOp::Ne => (a != b) as i64,
            BinaryOp::Lt => (a < b) as i64,
            BinaryOp::Le => (a <= b) as i64,
            BinaryOp::Gt => (a > b) as i64,
            BinaryOp::Ge => (a >= b) as i64,
        }
    }

    /// The operator as written in source.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// A compiled expression.
///
/// Expressions evaluate to a signed 64 bit integer against a [VariableSource]. Compiling
/// never fails: malformed input produces [Expr::Error], which evaluates to 0.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// An integer literal.
    Constant(i64),
    /// A unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// A binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `$i32 <offset>`: a raw little endian read from the current file.
    RawRead(IntType, Box<Expr>),
    /// A field value or offset, read from the first instance of a query.
    ///
    /// Without a query, the field is looked up on the evaluation root.
    MemberField {
        /// The instances to read from.
        query: Option<Box<Query>>,
        /// The field, argument or parameter name.
        name: String,
        /// The element index, defaulting to 0.
        index: Option<Box<Expr>>,
        /// Whether to produce the element offset rather than its value.
        is_offset: bool,
    },
    /// The offset of the first instance of a query.
    StructOffset(Box<Query>),
    /// `$fpeqs(q.field, text)`: 1 if any queried instance has a field preview equal to
    /// `text` (or different from it, when inverted).
    FieldPreviewEqualsString {
        /// The instances to check.
        query: Option<Box<Query>>,
        /// The field name.
        name: String,
        /// The text to compare the preview against.
        text: String,
        /// Whether to test for inequality instead.
        invert: bool,
    },
    /// The id of the first instance of a query, or -1.
    InstanceId(Option<Box<Query>>),
    /// A node that failed to compile.
    Error,
}

impl Expr {
    /// Compile an expression, logging any errors as warnings.
    pub fn compile(source: &str) -> Expr {
        let mut diagnostics = Diagnostics::new();
        let expr = Self::compile_with(source, &mut diagnostics);
        for error in &diagnostics {
            log::warn!("while compiling '{}': {}", source, error);
        }
        expr
    }

    /// Compile an expression, recording errors in `diagnostics`.
    pub fn compile_with(source: &str, diagnostics: &mut Diagnostics) -> Expr {
        match tokenize(source) {
            Ok(tokens) => Compiler::new(tokens, source.len(), diagnostics).compile(),
            Err(error) => {
                diagnostics.push(error);
                Expr::Error
            }
        }
    }

    /// Compile an expression, returning the first error if any.
    pub fn try_compile(source: &str) -> Result<Expr, CompileError> {
        let mut diagnostics = Diagnostics::new();
        let expr = Self::compile_with(source, &mut diagnostics);
        match diagnostics.take().into_iter().next() {
            Some(error) => Err(error),
            None => Ok(expr),
        }
    }

    /// Return true if this is an [Expr::Error] node.
    pub fn is_error(&self) -> bool {
        matches!(self, Expr::Error)
    }

    /// Evaluate the expression.
    pub fn evaluate<V: VariableSource>(&self, vs: &V) -> i64 {
        crate::eval::evaluate(self, vs)
    }

    /// Render the expression tree, one node per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = self.dump_to(&mut out, 0);
        out
    }

    pub(crate) fn dump_to(&self, out: &mut String, level: usize) -> fmt::Result {
        indent(out, level);
        match self {
            Expr::Constant(value) => writeln!(out, "value = {}", value),
            Expr::Unary(op, a) => {
                writeln!(out, "{}", op.name())?;
                a.dump_to(out, level + 1)
            }
            Expr::Binary(op, a, b) => {
                writeln!(out, "{}", op.symbol())?;
                a.dump_to(out, level + 1)?;
                b.dump_to(out, level + 1)
            }
            Expr::RawRead(int_type, offset) => {
                writeln!(out, "read {}", int_type)?;
                offset.dump_to(out, level + 1)
            }
            Expr::MemberField {
                query,
                name,
                index,
                is_offset,
            } => {
                writeln!(
                    out,
                    "member field{} \"{}\"{}",
                    if *is_offset { " offset" } else { "" },
                    name,
                    if query.is_some() { " with query:" } else { "" },
                )?;
                if let Some(query) = query {
                    query.dump_to(out, level + 1)?;
                }
                if let Some(index) = index {
                    indent(out, level + 1);
                    writeln!(out, "index:")?;
                    index.dump_to(out, level + 2)?;
                }
                Ok(())
            }
            Expr::StructOffset(query) => {
                writeln!(out, "struct offset")?;
                query.dump_to(out, level + 1)
            }
            Expr::FieldPreviewEqualsString {
                query,
                name,
                text,
                invert,
            } => {
                writeln!(
                    out,
                    "field \"{}\" preview {} \"{}\"",
                    name,
                    if *invert { "!=" } else { "==" },
                    text
                )?;
                match query {
                    Some(query) => query.dump_to(out, level + 1),
                    None => Ok(()),
                }
            }
            Expr::InstanceId(query) => {
                writeln!(out, "instance id")?;
                match query {
                    Some(query) => query.dump_to(out, level + 1),
                    None => Ok(()),
                }
            }
            Expr::Error => writeln!(out, "ERROR"),
        }
    }
}

pub(crate) fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_binary_ops() {
        assert_eq!(BinaryOp::Div.apply(7, 0), 0);
        assert_eq!(BinaryOp::Mod.apply(7, 0), 0);
        assert_eq!(BinaryOp::Div.apply(i64::MIN, -1), i64::MIN);
        assert_eq!(BinaryOp::Add.apply(i64::MAX, 1), i64::MIN);
        assert_eq!(BinaryOp::Shr.apply(-8, 1), -4);
        assert_eq!(BinaryOp::Le.apply(3, 3), 1);
        assert_eq!(BinaryOp::Gt.apply(3, 3), 0);
        assert_eq!(UnaryOp::Invert.apply(0), -1);
    }

    #[test]
    fn test_dump() {
        let dump = Expr::compile("1 + 2 * x").dump();
        assert_eq!(
            dump,
            "+\n  value = 1\n  *\n    value = 2\n    member field \"x\"\n"
        );
        assert_eq!(Expr::compile("(((").dump(), "ERROR\n");
    }
}
