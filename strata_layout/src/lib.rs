//! The schema describing binary structures: struct definitions, their fields, and the
//! edit versions that invalidate anything computed from them.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use error::*;
pub use expr_obj::*;
pub use schema::*;
pub use struct_def::*;

mod error;
mod expr_obj;
mod schema;
mod struct_def;
