//! SciTECO core: the data model shared by the execution engine and its
//! front-ends.
//!
//! This crate provides the language-agnostic primitives every other crate
//! in the workspace builds on:
//!
//! - `types`: the `Int` type and small value types (`Range`, `EolMode`).
//! - `error`: the tagged `Error`/`ErrorKind` type (§7 of the specification)
//!   with its macro-frame position chain.
//! - `document`: the `Document` trait standing in for Scintilla (§6), plus
//!   `MemDocument`, a minimal in-memory implementation used by tests and by
//!   the CLI front-end when no richer host is wired in.

pub mod document;
pub mod error;
pub mod types;

pub use document::{Document, EolMode, Message, MemDocument};
pub use error::{Error, ErrorKind, Frame, Result};
pub use types::{from_bool, is_success, Int, Range, FALSE, TRUE};
