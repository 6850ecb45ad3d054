//! Embedded Standard Library
//!
//! The prelude source is compiled into the binary and loaded by the
//! runtime constructor unless the host opts out. It stays deliberately
//! small: list helpers and the control-flow macros that make scripts
//! readable without touching the evaluator core.

/// Prelude source text, evaluated form by form at construction.
pub const PRELUDE: &str = include_str!("../stdlib/prelude.lisp");
