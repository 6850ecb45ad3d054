//! Foreign Bridge
//!
//! Three primitives connect script values and host objects:
//!
//! - **Extern references**: a tag-d cell carrying (host pointer, type
//!   fingerprint). No ownership transfer; the host keeps the target
//!   alive. Unpacking re-checks the fingerprint of the requested type.
//! - **Owned externs**: the payload lives inside the arena behind a
//!   header with destructor and move hooks. Lifetime follows heap
//!   reachability; `take_owned_extern` moves the payload back out.
//! - **Native functions**: host callables installed in the root scope.
//!   The cell packs a registry index plus a reserved fingerprint, so the
//!   evaluator can tell callables from data externs and applying a data
//!   extern is a typed error rather than a wild jump.
//!
//! Type fingerprints are derived from `TypeId`, so they are stable within
//! a build and collide for no two distinct types.

use std::alloc::Layout;
use std::any::TypeId;
use std::hash::{Hash, Hasher};

use tarn_core::heap::{OWNED_BLOCK_ALIGN, OWNED_PAYLOAD_OFFSET, OwnedHeader, cell_words};
use tarn_core::{Error, Result, Value, ValueType, check_type};

use crate::runtime::Runtime;

/// A host function callable from script code. Receives the runtime, the
/// already-evaluated argument list, and the context pointer supplied at
/// registration.
pub type NativeFn = fn(&mut Runtime, Value, *mut ()) -> Result<Value>;

/// Registry entry for one registered native.
pub struct NativeEntry {
    pub f: NativeFn,
    pub data: *mut (),
}

/// The fingerprint of a Rust type, as stored in extern cells.
pub fn type_fingerprint<T: 'static>() -> u64 {
    let mut h = std::hash::DefaultHasher::new();
    TypeId::of::<T>().hash(&mut h);
    h.finish()
}

/// Private marker whose fingerprint brands native-function cells.
struct NativeFnMarker;

pub(crate) fn native_fingerprint() -> u64 {
    type_fingerprint::<NativeFnMarker>()
}

unsafe fn drop_payload<T>(p: *mut u8) {
    // Safety: caller passes the payload address of a live owned block
    // holding a T; this runs at most once per block.
    unsafe { std::ptr::drop_in_place(p as *mut T) }
}

unsafe fn move_payload<T>(src: *mut u8, dst: *mut u8) {
    // Safety: caller reserved `dst` for a T and never drops the source
    // copy, so a bitwise move is a true relocation.
    unsafe { std::ptr::copy_nonoverlapping(src as *const T, dst as *mut T, 1) }
}

impl Runtime {
    /// Register a host function under `name` in the root scope.
    pub fn define_fn(&mut self, name: &str, f: NativeFn) -> Result<Value> {
        self.define_fn_with(name, f, std::ptr::null_mut())
    }

    /// Register a host function with a context pointer, passed back on
    /// every call. The pointer must stay valid for the runtime's life.
    pub fn define_fn_with(&mut self, name: &str, f: NativeFn, data: *mut ()) -> Result<Value> {
        let idx = self.natives.len();
        self.natives.push(NativeEntry { f, data });
        let cell = self.heap.alloc_cell(
            ((idx as u64) << 4) | ValueType::Extern as u64,
            native_fingerprint(),
            ValueType::Extern,
        )?;
        self.define_global(name, cell);
        Ok(cell)
    }

    /// The native registry index of a callable cell, if `v` is one.
    pub(crate) fn native_index(&self, v: Value) -> Option<usize> {
        if v.value_type() != ValueType::Extern {
            return None;
        }
        // Safety: extern-tagged values address live two-word cells.
        let (w0, w1) = unsafe { cell_words(v) };
        (w1 == native_fingerprint()).then_some((w0 >> 4) as usize)
    }

    /// Wrap a borrowed host object. Ownership stays with the host; the
    /// script sees an opaque reference checked by type fingerprint.
    pub fn make_extern_reference<T: 'static>(&mut self, p: *mut T) -> Result<Value> {
        self.heap.alloc_cell(
            ((p as usize as u64) << 4) | ValueType::Extern as u64,
            type_fingerprint::<T>(),
            ValueType::Extern,
        )
    }

    /// Unpack an extern reference, re-checking the type fingerprint.
    pub fn get_extern_reference<T: 'static>(&self, v: Value) -> Result<*mut T> {
        check_type(v, ValueType::Extern, "expected an extern reference")?;
        // Safety: extern-tagged values address live two-word cells.
        let (w0, w1) = unsafe { cell_words(v) };
        if w1 != type_fingerprint::<T>() {
            return Err(Error::ForeignTypeMismatch { expected: std::any::type_name::<T>() });
        }
        Ok((w0 >> 4) as *mut T)
    }

    /// Move a host value into the arena. The script holds an extern
    /// reference to the payload; when a collection finds the block
    /// unreachable, its destructor runs exactly once.
    pub fn make_owned_extern<T: 'static>(&mut self, val: T) -> Result<Value> {
        const {
            assert!(align_of::<T>() <= OWNED_BLOCK_ALIGN, "owned extern payload over-aligned");
        }
        let total = OWNED_PAYLOAD_OFFSET + size_of::<T>();
        let layout = Layout::from_size_align(total, OWNED_BLOCK_ALIGN)
            .map_err(|_| Error::OutOfMemory { requested: total })?;
        let block = self.heap.alloc_layout(layout)?;
        let payload = unsafe { block.add(OWNED_PAYLOAD_OFFSET) };
        // Safety: `total` bytes reserved at `block`; header and payload
        // regions are disjoint and correctly aligned.
        unsafe {
            std::ptr::write(
                block as *mut OwnedHeader,
                OwnedHeader {
                    size: total,
                    drop_fn: drop_payload::<T>,
                    move_fn: move_payload::<T>,
                },
            );
            std::ptr::write(payload as *mut T, val);
        }
        self.owned_externs.insert(payload as usize);
        self.heap.alloc_cell(
            ((payload as usize as u64) << 4) | ValueType::Extern as u64,
            type_fingerprint::<T>(),
            ValueType::Extern,
        )
    }

    /// Move an owned payload back out of the arena. The block leaves the
    /// owned set, so the next collection neither moves nor destroys it;
    /// any remaining extern references to it dangle.
    pub fn take_owned_extern<T: 'static>(&mut self, v: Value) -> Result<T> {
        let p = self.get_extern_reference::<T>(v)?;
        if !self.owned_externs.remove(&(p as usize)) {
            return Err(Error::ForeignTypeMismatch { expected: std::any::type_name::<T>() });
        }
        // Safety: the payload was written by `make_owned_extern::<T>` and
        // just left the owned set, so nothing else will drop it.
        Ok(unsafe { std::ptr::read(p) })
    }
}
