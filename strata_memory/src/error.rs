#![allow(missing_docs)]

use std::{error::Error, fmt, io, path::PathBuf, sync::Arc};

#[derive(Debug, Clone)]
pub enum DataSourceError {
    Context {
        context: String,
        error: Box<DataSourceError>,
    },
    OpenError {
        path: PathBuf,
        error: Arc<io::Error>,
    },
    IoError(Arc<io::Error>),
}

impl DataSourceError {
    /// Wrap the error with a context message.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            error: Box::new(self),
        }
    }
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::Context { context, error } => write!(f, "{}:\n  {}", context, error),
            DataSourceError::OpenError { path, error } => {
                write!(f, "failed to open {}: {}", path.display(), error)
            }
            DataSourceError::IoError(error) => write!(f, "{}", error),
        }
    }
}

impl Error for DataSourceError {}

impl From<io::Error> for DataSourceError {
    fn from(v: io::Error) -> Self {
        Self::IoError(Arc::new(v))
    }
}
