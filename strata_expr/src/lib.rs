//! A small integer expression language for describing binary layouts.
//!
//! Expressions combine integer literals, field references and queries with the usual
//! arithmetic, bitwise and comparison operators:
//!
//! - `count * 4 + 2`: arithmetic on the value of the field, argument or parameter `count`
//! - `@data`: the file offset of the field `data`
//! - `#Header.size`: the `size` field of the first `Header` instance in the same file
//! - `##Header.size`: the same, searching every open file
//! - `@#Entry[kind=3, #=1]`: the offset of the second `Entry` (by offset) whose `kind`
//!   field previews as `3`
//! - `entries[#id=n].flags`: `flags` of the child of `entries` whose `id` equals `n`
//!
//! A few intrinsics start with `$`:
//!
//! - `$i8`, `$u8`, ..., `$u64` followed by an offset read a little endian integer
//! - `$fpeqs(q.field, text)` and `$fpnes(q.field, text)` compare a field preview
//! - `$arr(q.field, index)` and `$arr(@q.field, index)` read an element value or offset
//! - `$iid(q)` gives the id of the first queried instance, or -1
//!
//! Compilation never fails. Errors are collected in [Diagnostics] and the offending part
//! of the expression evaluates to 0.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use ast::*;
pub use cache::*;
pub use error::*;
pub use query::*;
pub use traits::*;

mod ast;
mod cache;
mod error;
mod eval;
mod lex;
mod parse;
mod query;
mod traits;
