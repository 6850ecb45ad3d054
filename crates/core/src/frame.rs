//! Capture Frames
//!
//! A frame is a heap-resident mapping from symbol to value: a length word
//! followed by inline (name, value) slot pairs. Closures reference one
//! frame holding the copied values of their free variables.
//!
//! Frames live in the arena so the collector can relocate them bytewise
//! and rewrite the values they hold. They are fixed-size: the capture set
//! is known when the closure is built, and reconciliation after a call
//! only rebinds names that already have slots.

use std::alloc::Layout;

use crate::error::Result;
use crate::heap::Heap;
use crate::value::Value;

const WORD: usize = size_of::<u64>();

/// An untagged pointer to a heap-resident frame.
///
/// The wrapper is `Copy` and carries no lifetime; validity follows the
/// same discipline as every other heap address: the frame is live until
/// the next collection, which rewrites every reachable frame pointer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameRef(usize);

impl FrameRef {
    /// Allocate a frame holding exactly `entries`.
    pub fn alloc(heap: &Heap, entries: &[(Value, Value)]) -> Result<FrameRef> {
        let total = Self::byte_size_for(entries.len());
        let layout = Layout::from_size_align(total, WORD)
            .map_err(|_| crate::error::Error::OutOfMemory { requested: total })?;
        let p = heap.alloc_layout(layout)? as *mut u64;
        // Safety: `total` bytes freshly reserved at `p`, word-aligned.
        unsafe {
            *p = entries.len() as u64;
            for (i, (name, val)) in entries.iter().enumerate() {
                *p.add(1 + 2 * i) = name.bits();
                *p.add(2 + 2 * i) = val.bits();
            }
        }
        Ok(FrameRef(p as usize))
    }

    pub fn from_addr(addr: usize) -> FrameRef {
        FrameRef(addr)
    }

    pub fn addr(self) -> usize {
        self.0
    }

    pub fn len(self) -> usize {
        // Safety: the length word is the first word of every frame block.
        unsafe { *(self.0 as *const u64) as usize }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Total block size in bytes for a frame of `len` entries.
    pub fn byte_size_for(len: usize) -> usize {
        WORD + 2 * WORD * len
    }

    pub fn byte_size(self) -> usize {
        Self::byte_size_for(self.len())
    }

    pub fn name_at(self, i: usize) -> Value {
        debug_assert!(i < self.len());
        // Safety: slot `i` is in bounds per the length word.
        unsafe { Value::from_bits(*(self.0 as *const u64).add(1 + 2 * i)) }
    }

    pub fn value_at(self, i: usize) -> Value {
        debug_assert!(i < self.len());
        // Safety: see `name_at`.
        unsafe { Value::from_bits(*(self.0 as *const u64).add(2 + 2 * i)) }
    }

    pub fn set_value_at(self, i: usize, val: Value) {
        debug_assert!(i < self.len());
        // Safety: see `name_at`.
        unsafe { *(self.0 as *mut u64).add(2 + 2 * i) = val.bits() }
    }

    /// Look up a name by symbol identity.
    pub fn get(self, name: Value) -> Option<Value> {
        (0..self.len()).find(|&i| self.name_at(i) == name).map(|i| self.value_at(i))
    }

    /// Rebind an existing name. Returns false when the frame has no slot
    /// for it; frames never grow.
    pub fn set(self, name: Value, val: Value) -> bool {
        for i in 0..self.len() {
            if self.name_at(i) == name {
                self.set_value_at(i, val);
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameRef({:#x}, len {})", self.0, self.len())
    }
}
