//! Tarn Runtime: an embeddable Lisp for host applications
//!
//! One [`Runtime`] is a complete interpreter instance: reader, macro
//! expander, evaluator, semi-space garbage collector, and the foreign
//! bridge for host objects. Runtimes are single-threaded and
//! self-contained; nothing is process-global.
//!
//! ```no_run
//! use tarn_runtime::Runtime;
//!
//! let mut rt = Runtime::with_defaults()?;
//! let form = rt.read("(+ 1 2)")?;
//! let form = rt.expand(form)?;
//! let result = rt.eval(form)?;
//! assert_eq!(result.as_int()?, 3);
//! # Ok::<(), tarn_runtime::Error>(())
//! ```
//!
//! # Modules
//!
//! - `runtime`: the interpreter aggregate and its construction
//! - `reader`: source text → value graph, and the writer back
//! - `expand`: the pre-eval macro expansion pass
//! - `eval`: the tree-walking evaluator and closure machinery
//! - `gc`: the stop-the-world semi-space copier
//! - `externs`: extern references, owned externs, native functions
//! - `handles`: refcounted host handles that survive collection
//! - `intrinsics`: the built-in natives in every root scope
//! - `config`: TOML-backed construction options
//! - `stdlib`: the embedded prelude source

pub mod config;
mod eval;
mod expand;
pub mod externs;
pub mod gc;
pub mod handles;
mod intrinsics;
mod reader;
pub mod runtime;
pub mod stdlib;

pub use config::RuntimeOptions;
pub use externs::{NativeFn, type_fingerprint};
pub use gc::HeapStats;
pub use handles::ValueHandle;
pub use runtime::{Function, Runtime};

// Core value types, re-exported so hosts depend on one crate.
pub use tarn_core::{
    Error, FALSE, NIL, Result, TRUE, Value, ValueType, car, cdr, check_type, set_car, set_cdr,
};
