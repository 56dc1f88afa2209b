#![allow(missing_docs)]

use std::{error::Error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTypeError {
    pub name: String,
}

impl fmt::Display for UnknownTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown type name: {}", self.name)
    }
}

impl Error for UnknownTypeError {}
