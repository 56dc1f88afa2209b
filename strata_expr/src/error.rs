#![allow(missing_docs)]

use std::{error::Error, fmt, slice};

/// An error found while compiling an expression.
///
/// `pos` is a byte offset into the expression source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    UnexpectedChar { pos: usize, found: char },
    UnterminatedQuote { pos: usize },
    BadStructName { pos: usize },
    EmptyExpr { pos: usize },
    UnbalancedBrackets { pos: usize },
    NestingTooDeep { pos: usize },
    CannotParse { pos: usize },
    BadQuery { pos: usize, message: &'static str },
    BadFilter { pos: usize },
    UnknownIntrinsic { pos: usize, name: String },
    BadIntrinsicArgs { pos: usize, name: String },
}

impl CompileError {
    /// The byte offset the error refers to.
    pub fn pos(&self) -> usize {
        match self {
            Self::UnexpectedChar { pos, .. }
            | Self::UnterminatedQuote { pos }
            | Self::BadStructName { pos }
            | Self::EmptyExpr { pos }
            | Self::UnbalancedBrackets { pos }
            | Self::NestingTooDeep { pos }
            | Self::CannotParse { pos }
            | Self::BadQuery { pos, .. }
            | Self::BadFilter { pos }
            | Self::UnknownIntrinsic { pos, .. }
            | Self::BadIntrinsicArgs { pos, .. } => *pos,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedChar { pos, found } => {
                write!(f, "unexpected character `{}` at {}", found, pos)
            }
            Self::UnterminatedQuote { pos } => write!(f, "unterminated quoted name at {}", pos),
            Self::BadStructName { pos } => write!(f, "bad struct name at {}", pos),
            Self::EmptyExpr { pos } => write!(f, "empty expression at {}", pos),
            Self::UnbalancedBrackets { pos } => write!(f, "unbalanced brackets at {}", pos),
            Self::NestingTooDeep { pos } => write!(f, "brackets nested too deeply at {}", pos),
            Self::CannotParse { pos } => write!(f, "cannot parse expression at {}", pos),
            Self::BadQuery { pos, message } => write!(f, "bad query at {}: {}", pos, message),
            Self::BadFilter { pos } => write!(f, "bad query filter at {}", pos),
            Self::UnknownIntrinsic { pos, name } => {
                write!(f, "unknown intrinsic ${} at {}", name, pos)
            }
            Self::BadIntrinsicArgs { pos, name } => {
                write!(f, "bad arguments to ${} at {}", name, pos)
            }
        }
    }
}

impl Error for CompileError {}

/// A sink collecting the errors found while compiling expressions.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn push(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    /// Return true if no errors were recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The number of recorded errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate over the recorded errors in the order they were found.
    pub fn iter(&self) -> slice::Iter<'_, CompileError> {
        self.errors.iter()
    }

    /// Take the recorded errors, leaving the sink empty.
    pub fn take(&mut self) -> Vec<CompileError> {
        std::mem::take(&mut self.errors)
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a CompileError;
    type IntoIter = slice::Iter<'a, CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
