//! Garbage Collector
//!
//! A stop-the-world semi-space copier. Collection builds a fresh arena
//! of the same budget, walks the root set (every scope in the scope
//! stack, every live value handle, and every function body) and
//! relocates each reachable heap object exactly once, leaving a
//! forwarding entry keyed by the old tagged word so shared structure and
//! cycles short-circuit.
//!
//! Foreign-owned blocks reached through extern references are relocated
//! with their move hook and their headers copied verbatim; owned blocks
//! the walk never reaches have their destructor run exactly once after
//! the walk. The old arena is then released and the new one becomes
//! current.
//!
//! Collection takes `&mut Runtime`, so the borrow checker enforces the
//! quiescence rule: no evaluator frame can be live on the call stack
//! when a collection runs.

use std::alloc::Layout;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use tarn_core::heap::{
    OWNED_BLOCK_ALIGN, OWNED_PAYLOAD_OFFSET, cell_words, owned_header, payload_byte_size,
    set_cell_words,
};
use tarn_core::{Error, FrameRef, Heap, Result, Value, ValueType};

use crate::externs::native_fingerprint;
use crate::handles::HandleTable;
use crate::runtime::{Function, Runtime};

/// Arena byte sizes around a collection, as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes in use in the old arena when collection began.
    pub old_size: usize,
    /// Bytes in use in the new arena after relocation.
    pub new_size: usize,
}

struct Collector<'a> {
    to_space: &'a Heap,
    /// old tagged word → new tagged word; consulted before any copy, so
    /// processing is idempotent and cycles terminate.
    forwarding: HashMap<u64, u64>,
    functions: &'a mut Vec<Function>,
    /// Payload addresses owned in the old arena.
    owned_old: &'a HashSet<usize>,
    /// Payload addresses owned in the new arena (moved blocks).
    owned_new: HashSet<usize>,
    /// Old payload addresses whose blocks were moved.
    moved_old: HashSet<usize>,
    native_brand: u64,
}

impl Collector<'_> {
    /// Relocate one value word, returning its new-arena form.
    fn process(&mut self, v: Value) -> Result<Value> {
        match v.value_type() {
            // Immediates carry no heap address and pass through.
            ValueType::Nil
            | ValueType::Bool
            | ValueType::Int
            | ValueType::Float
            | ValueType::Symbol => Ok(v),
            _ => {
                if let Some(&fwd) = self.forwarding.get(&v.bits()) {
                    return Ok(Value::from_bits(fwd));
                }
                match v.value_type() {
                    ValueType::Str | ValueType::FVec => self.copy_payload(v),
                    ValueType::Pair => self.copy_pair(v),
                    ValueType::Closure => self.copy_closure(v),
                    ValueType::Extern => self.copy_extern(v),
                    _ => unreachable!("immediates handled above"),
                }
            }
        }
    }

    fn copy_payload(&mut self, v: Value) -> Result<Value> {
        // Safety: `v` addresses a live length-prefixed payload.
        let size = unsafe { payload_byte_size(v) };
        let layout = Layout::from_size_align(size, align_of::<u32>())
            .map_err(|_| Error::OutOfMemory { requested: size })?;
        let p = self.to_space.alloc_layout(layout)?;
        // Safety: `size` bytes reserved at `p`; strings and fvecs carry
        // no outgoing references, so a byte copy is complete.
        unsafe { std::ptr::copy_nonoverlapping(v.heap_addr() as *const u8, p, size) }
        let new_v = Value::from_heap_addr(p as usize, v.value_type());
        self.forwarding.insert(v.bits(), new_v.bits());
        Ok(new_v)
    }

    fn copy_pair(&mut self, v: Value) -> Result<Value> {
        // Safety: pair words address live two-word cells.
        let (w0, w1) = unsafe { cell_words(v) };
        let new_v = self.to_space.alloc_cell(w0, w1, ValueType::Pair)?;
        // Forward before recursing, or cyclic structure never terminates.
        self.forwarding.insert(v.bits(), new_v.bits());
        let a = self.process(Value::from_bits(w0))?;
        let d = self.process(Value::from_bits(w1))?;
        // Safety: `new_v` is the cell reserved above.
        unsafe { set_cell_words(new_v, a.bits(), d.bits()) }
        Ok(new_v)
    }

    fn copy_closure(&mut self, v: Value) -> Result<Value> {
        // Safety: closure words address live two-word cells holding
        // (function index, capture frame address).
        let (w0, w1) = unsafe { cell_words(v) };
        let new_v = self.to_space.alloc_cell(w0, w1, ValueType::Closure)?;
        self.forwarding.insert(v.bits(), new_v.bits());

        let fn_idx = (w0 >> 4) as usize;
        if fn_idx < self.functions.len() {
            let body = self.functions[fn_idx].body;
            let body = self.process(body)?;
            self.functions[fn_idx].body = body;
        }

        let frame_word = self.copy_frame(w1)?;
        // Safety: `new_v` is the cell reserved above.
        unsafe { set_cell_words(new_v, w0, frame_word) }
        Ok(new_v)
    }

    /// Relocate a capture frame and rewrite the values it holds. The
    /// frame word is tagged like an extern so it shares the forwarding
    /// keyspace with every other heap word.
    fn copy_frame(&mut self, frame_word: u64) -> Result<u64> {
        if let Some(&fwd) = self.forwarding.get(&frame_word) {
            return Ok(fwd);
        }
        let old = FrameRef::from_addr((frame_word >> 4) as usize);
        let size = old.byte_size();
        let layout = Layout::from_size_align(size, align_of::<u64>())
            .map_err(|_| Error::OutOfMemory { requested: size })?;
        let p = self.to_space.alloc_layout(layout)?;
        // Safety: `size` bytes reserved at `p`; the frame block is
        // self-contained apart from the value slots rewritten below.
        unsafe { std::ptr::copy_nonoverlapping(old.addr() as *const u8, p, size) }
        let new = FrameRef::from_addr(p as usize);
        let new_word = ((p as u64) << 4) | ValueType::Extern as u64;
        self.forwarding.insert(frame_word, new_word);
        for i in 0..new.len() {
            let nv = self.process(new.value_at(i))?;
            new.set_value_at(i, nv);
        }
        Ok(new_word)
    }

    fn copy_extern(&mut self, v: Value) -> Result<Value> {
        // Safety: extern words address live two-word cells.
        let (w0, w1) = unsafe { cell_words(v) };
        let new_v = self.to_space.alloc_cell(w0, w1, ValueType::Extern)?;
        self.forwarding.insert(v.bits(), new_v.bits());

        // Native-function cells carry a registry index, not a pointer.
        // Plain references to host-owned memory are copied verbatim.
        // Only payloads in the owned set belong to the arena and move.
        if w1 != self.native_brand {
            let payload = (w0 >> 4) as usize;
            if self.owned_old.contains(&payload) {
                let new_w0 = self.move_owned_block(w0)?;
                // Safety: `new_v` is the cell reserved above.
                unsafe { set_cell_words(new_v, new_w0, w1) }
            }
        }
        Ok(new_v)
    }

    /// Relocate one foreign-owned block: reserve the destination, copy
    /// the header verbatim, and let the move hook carry the payload.
    fn move_owned_block(&mut self, payload_word: u64) -> Result<u64> {
        if let Some(&fwd) = self.forwarding.get(&payload_word) {
            return Ok(fwd);
        }
        let payload = (payload_word >> 4) as usize;
        // Safety: `payload` is in the owned set, so a header precedes it.
        let header = unsafe { owned_header(payload) };
        let size = unsafe { (*header).size };
        let layout = Layout::from_size_align(size, OWNED_BLOCK_ALIGN)
            .map_err(|_| Error::OutOfMemory { requested: size })?;
        let block = self.to_space.alloc_layout(layout)?;
        let new_payload = unsafe { block.add(OWNED_PAYLOAD_OFFSET) };
        // Safety: destination block reserved above; the header is copied
        // bytewise and the move hook relocates exactly one payload.
        unsafe {
            std::ptr::copy_nonoverlapping(header as *const u8, block, OWNED_PAYLOAD_OFFSET);
            ((*header).move_fn)(payload as *mut u8, new_payload);
        }
        let new_word = ((new_payload as u64) << 4) | ValueType::Extern as u64;
        self.forwarding.insert(payload_word, new_word);
        self.owned_new.insert(new_payload as usize);
        self.moved_old.insert(payload);
        Ok(new_word)
    }
}

fn walk_roots(
    collector: &mut Collector<'_>,
    scopes: &mut [HashMap<Value, Value>],
    handles: &Rc<RefCell<HandleTable>>,
) -> Result<()> {
    for scope in scopes.iter_mut() {
        for val in scope.values_mut() {
            *val = collector.process(*val)?;
        }
    }
    for slot in handles.borrow_mut().slots.values_mut() {
        slot.0 = collector.process(slot.0)?;
    }
    // Function bodies are roots in their own right: a descriptor can
    // outlive every closure built from it and still be reinstantiated.
    for i in 0..collector.functions.len() {
        let body = collector.functions[i].body;
        let body = collector.process(body)?;
        collector.functions[i].body = body;
    }
    Ok(())
}

impl Runtime {
    /// Collect garbage now. Every root-reachable heap value is relocated
    /// into a fresh arena; unreachable foreign-owned blocks have their
    /// destructors run; value handles keep their slot ids and are
    /// rewritten in place. Returns the arena byte sizes around the
    /// collection.
    pub fn collect_garbage(&mut self) -> Result<HeapStats> {
        let old_size = self.heap.allocated_bytes();
        let to_space = Heap::new(self.heap_budget);
        let owned_old = std::mem::take(&mut self.owned_externs);

        let mut collector = Collector {
            to_space: &to_space,
            forwarding: HashMap::new(),
            functions: &mut self.functions,
            owned_old: &owned_old,
            owned_new: HashSet::new(),
            moved_old: HashSet::new(),
            native_brand: native_fingerprint(),
        };

        let walked = walk_roots(&mut collector, &mut self.scopes, &self.handles);
        let owned_new = std::mem::take(&mut collector.owned_new);
        let moved_old = std::mem::take(&mut collector.moved_old);
        drop(collector);

        if let Err(e) = walked {
            // The old arena stays current and no destructor runs.
            self.owned_externs = owned_old;
            return Err(e);
        }

        let mut destroyed = 0usize;
        for &payload in &owned_old {
            if !moved_old.contains(&payload) {
                // Safety: the block was owned in the old arena, was not
                // moved, and its destructor has not run yet.
                unsafe {
                    let header = owned_header(payload);
                    ((*header).drop_fn)(payload as *mut u8);
                }
                destroyed += 1;
            }
        }

        self.owned_externs = owned_new;
        self.heap = to_space;

        let stats = HeapStats { old_size, new_size: self.heap.allocated_bytes() };
        debug!(
            old_size = stats.old_size,
            new_size = stats.new_size,
            moved = moved_old.len(),
            destroyed,
            "collection complete"
        );
        Ok(stats)
    }
}
