//! The SciTECO execution engine.
//!
//! This crate implements the parser/state-machine described in spec.md: an
//! interactive interpreter for the TECO command language that consumes a
//! program character by character while executing its side effects against
//! a [`sciteco_core::Document`], an expression stack, a Q-Register store,
//! and a reversible undo log.
//!
//! # Modules
//!
//! - `undo`: the append-only undo log (§4.5).
//! - `expressions`: the operand/operator expression stack (§4.2).
//! - `qregisters`: the Q-Register store and its per-variant backing stores (§4.3).
//! - `ring`: the buffer ring (§3 "Buffer").
//! - `stringbuilding`: the string-building sub-machine (§4.4).
//! - `qregspec`: the Q-Register-reference sub-machine (§4.4).
//! - `goto`: loop frames and labels (§4.9).
//! - `search`: pattern compilation and the search commands (§4.6, feature `search`).
//! - `spawn`: external command execution (§4.7, feature `spawn`).
//! - `scintilla`: the `ES` Scintilla-dispatch command (§4.10).
//! - `state`: parser states and processing modes (§4.1).
//! - `commands`: the command dispatch table and implementations (§4.1).
//! - `cmdline`: the command-line controller: rubout and replacement (§4.8).
//! - `memlimit`: the background memory-limiter thread (§5, §7 `MEMLIMIT`).
//! - `machine`: `Machine`, the type that ties everything above together.

pub mod cmdline;
pub mod commands;
pub mod expressions;
pub mod goto;
pub mod machine;
pub mod memlimit;
pub mod qregisters;
pub mod qregspec;
pub mod ring;
pub mod scintilla;
#[cfg(feature = "search")]
pub mod search;
#[cfg(feature = "spawn")]
pub mod spawn;
pub mod state;
pub mod stringbuilding;
pub mod undo;

pub use machine::Machine;
pub use sciteco_core::{Document, EolMode, Error, ErrorKind, Int, Range};
