//! Lazy resolution of struct instances over binary files.
//!
//! A [Workspace] owns a [Schema](strata_layout::Schema), the opened data sources and
//! a [Directory] of struct instances. An [Instance] handle computes field offsets,
//! counts, sizes and values on demand and caches them per instance. Cached results are
//! stamped with the edit versions of the instance and its definition, so editing either
//! one discards stale results the next time they are asked for.
//!
//! Resolution never fails: anything that cannot be determined reads as 0, an empty
//! set, or a placeholder preview.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use directory::*;
pub use error::*;
pub use handle::*;
pub use instance::*;
pub use limits::*;
pub use variable_source::*;
pub use workspace::*;

mod cache;
mod directory;
mod error;
mod handle;
mod instance;
mod limits;
mod query;
mod resolve;
mod variable_source;
mod workspace;
