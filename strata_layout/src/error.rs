#![allow(missing_docs)]

use std::{error::Error, fmt, io, sync::Arc};

#[derive(Debug, Clone)]
pub enum SchemaError {
    UndefinedStruct(String),
    UndefinedFieldType {
        struct_name: String,
        field_name: String,
        type_name: String,
    },
    UndefinedSource {
        struct_name: String,
        field_name: Option<String>,
        source: String,
    },
    JsonError(Arc<serde_json::Error>),
    IoError(Arc<io::Error>),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::UndefinedStruct(name) => write!(f, "undefined struct: {}", name),
            SchemaError::UndefinedFieldType {
                struct_name,
                field_name,
                type_name,
            } => write!(
                f,
                "field {}.{} has undefined type {}",
                struct_name, field_name, type_name
            ),
            SchemaError::UndefinedSource {
                struct_name,
                field_name: Some(field_name),
                source,
            } => write!(
                f,
                "count of {}.{} refers to undefined name {}",
                struct_name, field_name, source
            ),
            SchemaError::UndefinedSource {
                struct_name,
                field_name: None,
                source,
            } => write!(
                f,
                "size of {} refers to undefined name {}",
                struct_name, source
            ),
            SchemaError::JsonError(error) => write!(f, "invalid schema: {}", error),
            SchemaError::IoError(error) => write!(f, "{}", error),
        }
    }
}

impl Error for SchemaError {}

impl From<serde_json::Error> for SchemaError {
    fn from(v: serde_json::Error) -> Self {
        Self::JsonError(Arc::new(v))
    }
}

impl From<io::Error> for SchemaError {
    fn from(v: io::Error) -> Self {
        Self::IoError(Arc::new(v))
    }
}
