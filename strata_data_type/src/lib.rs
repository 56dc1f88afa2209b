//! Representation of the scalar element types that a struct field can hold.
//!
//! The builtin set is closed: every field type is either one of the [BuiltinType]s or the
//! name of a user-defined struct (see [FieldType]).

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use data_type::*;
pub use error::*;
pub use value::*;

mod data_type;
mod error;
mod value;
