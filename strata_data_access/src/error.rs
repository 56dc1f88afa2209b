#![allow(missing_docs)]

use std::{error::Error as StdError, fmt};

use strata_layout::SchemaError;
use strata_memory::DataSourceError;

use crate::FileId;

#[derive(Debug, Clone)]
pub enum Error {
    Context { context: String, error: Box<Error> },
    DataSourceError(DataSourceError),
    SchemaError(SchemaError),
    UndefinedFile(FileId),
}

impl Error {
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            error: Box::new(self),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Context { context, error } => write!(f, "{}:\n  {}", context, error),
            Error::DataSourceError(error) => write!(f, "{}", error),
            Error::SchemaError(error) => write!(f, "{}", error),
            Error::UndefinedFile(file) => write!(f, "no open file with id {}", file),
        }
    }
}

impl StdError for Error {}

impl From<DataSourceError> for Error {
    fn from(v: DataSourceError) -> Self {
        Self::DataSourceError(v)
    }
}

impl From<SchemaError> for Error {
    fn from(v: SchemaError) -> Self {
        Self::SchemaError(v)
    }
}
