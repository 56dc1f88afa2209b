//! Byte-addressable data sources that struct instances are read from.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use buffer::*;
pub use error::*;
pub use file::*;
pub use traits::*;

mod buffer;
mod error;
mod file;
mod traits;
