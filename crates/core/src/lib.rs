//! Tarn Core: value representation and managed heap
//!
//! The foundation of the Tarn scripting engine, shared by the runtime and
//! by hosts that need to inspect values directly:
//!
//! - `value`: the tagged 64-bit value word and its encode/decode helpers
//! - `error`: the engine error enum and `Result` alias
//! - `heap`: one bump-allocated semi-space arena with a byte budget
//! - `frame`: heap-resident capture frames (symbol → value slots)
//!
//! Everything here is mechanism; policy (interning, evaluation,
//! collection, the foreign bridge) lives in `tarn-runtime`.

pub mod error;
pub mod frame;
pub mod heap;
pub mod value;

pub use error::{Error, Result};
pub use frame::FrameRef;
pub use heap::{CELL_SIZE, Heap, OWNED_BLOCK_ALIGN, OWNED_PAYLOAD_OFFSET, OwnedHeader};
pub use value::{FALSE, NIL, TRUE, Value, ValueType, car, cdr, check_type, set_car, set_cdr};
