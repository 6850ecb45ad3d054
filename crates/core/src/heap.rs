//! Managed Heap
//!
//! A `Heap` is one semi-space: a bump-allocated arena with a byte budget.
//! All script-visible heap data lives here: two-word cells (pairs,
//! closures, extern references), length-prefixed strings and float
//! vectors, capture frames, and foreign-owned blocks.
//!
//! Allocation never blocks and never collects; exhausting the budget
//! surfaces as `Error::OutOfMemory`. The collector builds a fresh `Heap`
//! of the same budget, relocates live data into it, and drops this one.
//!
//! The arena is backed by `bumpalo`. The budget is enforced by
//! pre-allocating one chunk of the requested size and forbidding further
//! chunk growth, so the bump pointer can never run past the arena end.

use std::alloc::Layout;

use bumpalo::Bump;

use crate::error::{Error, Result};
use crate::value::{Value, ValueType};

/// Size of a two-word heap cell in bytes.
pub const CELL_SIZE: usize = 2 * size_of::<u64>();

/// One semi-space arena.
pub struct Heap {
    bump: Bump,
    budget: usize,
}

impl Heap {
    /// Create an arena with a byte budget. The backing chunk is reserved
    /// up front; the allocator will refuse to grow past it.
    pub fn new(budget: usize) -> Heap {
        let bump = Bump::with_capacity(budget);
        bump.set_allocation_limit(Some(budget));
        Heap { bump, budget }
    }

    /// The byte budget this arena was created with.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes currently handed out by the bump pointer.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// Reserve raw space. Fails with `OutOfMemory` once the arena is full.
    pub fn alloc_layout(&self, layout: Layout) -> Result<*mut u8> {
        match self.bump.try_alloc_layout(layout) {
            Ok(p) => Ok(p.as_ptr()),
            Err(_) => Err(Error::OutOfMemory { requested: layout.size() }),
        }
    }

    /// Allocate a two-word cell and tag its address with `tag`
    /// (pair, closure, or extern).
    pub fn alloc_cell(&self, w0: u64, w1: u64, tag: ValueType) -> Result<Value> {
        debug_assert!(matches!(tag, ValueType::Pair | ValueType::Closure | ValueType::Extern));
        let layout = Layout::from_size_align(CELL_SIZE, align_of::<u64>())
            .map_err(|_| Error::OutOfMemory { requested: CELL_SIZE })?;
        let p = self.alloc_layout(layout)? as *mut u64;
        // Safety: `p` addresses CELL_SIZE freshly reserved, aligned bytes.
        unsafe {
            *p = w0;
            *p.add(1) = w1;
        }
        Ok(Value::from_heap_addr(p as usize, tag))
    }

    /// Allocate a length-prefixed UTF-8 byte run.
    pub fn alloc_str(&self, s: &str) -> Result<Value> {
        let bytes = s.as_bytes();
        let total = size_of::<u32>() + bytes.len();
        let layout = Layout::from_size_align(total, align_of::<u32>())
            .map_err(|_| Error::OutOfMemory { requested: total })?;
        let p = self.alloc_layout(layout)?;
        // Safety: `total` bytes reserved at `p`, u32-aligned.
        unsafe {
            *(p as *mut u32) = bytes.len() as u32;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), p.add(size_of::<u32>()), bytes.len());
        }
        Ok(Value::from_heap_addr(p as usize, ValueType::Str))
    }

    /// Allocate a length-prefixed float vector.
    pub fn alloc_fvec(&self, data: &[f32]) -> Result<Value> {
        let total = size_of::<u32>() + data.len() * size_of::<f32>();
        let layout = Layout::from_size_align(total, align_of::<u32>())
            .map_err(|_| Error::OutOfMemory { requested: total })?;
        let p = self.alloc_layout(layout)?;
        // Safety: `total` bytes reserved at `p`; f32 shares u32 alignment.
        unsafe {
            *(p as *mut u32) = data.len() as u32;
            std::ptr::copy_nonoverlapping(data.as_ptr(), p.add(size_of::<u32>()) as *mut f32, data.len());
        }
        Ok(Value::from_heap_addr(p as usize, ValueType::FVec))
    }
}

/// Read both words of a cell value (pair, closure, or extern).
///
/// # Safety
/// `v` must address a live two-word cell in the current arena.
pub unsafe fn cell_words(v: Value) -> (u64, u64) {
    let p = v.heap_addr() as *const u64;
    unsafe { (*p, *p.add(1)) }
}

/// Overwrite both words of a cell value.
///
/// # Safety
/// `v` must address a live two-word cell in the current arena.
pub unsafe fn set_cell_words(v: Value, w0: u64, w1: u64) {
    let p = v.heap_addr() as *mut u64;
    unsafe {
        *p = w0;
        *p.add(1) = w1;
    }
}

/// View the payload of a string value.
///
/// # Safety
/// `v` must address a live length-prefixed string in the current arena.
pub unsafe fn str_bytes<'a>(v: Value) -> &'a [u8] {
    let p = v.heap_addr() as *const u8;
    unsafe {
        let len = *(p as *const u32) as usize;
        std::slice::from_raw_parts(p.add(size_of::<u32>()), len)
    }
}

/// View the payload of a float-vector value mutably.
///
/// # Safety
/// `v` must address a live length-prefixed float vector in the current
/// arena, and the caller must not hold another reference to it.
pub unsafe fn fvec_slice<'a>(v: Value) -> &'a mut [f32] {
    let p = v.heap_addr() as *mut u8;
    unsafe {
        let len = *(p as *const u32) as usize;
        std::slice::from_raw_parts_mut(p.add(size_of::<u32>()) as *mut f32, len)
    }
}

/// Total byte size of a string or fvec allocation, header included.
/// Used by the collector to copy payloads verbatim.
///
/// # Safety
/// `v` must address a live length-prefixed payload in the current arena.
pub unsafe fn payload_byte_size(v: Value) -> usize {
    let len = unsafe { *(v.heap_addr() as *const u32) as usize };
    match v.value_type() {
        ValueType::Str => size_of::<u32>() + len,
        ValueType::FVec => size_of::<u32>() + len * size_of::<f32>(),
        t => unreachable!("no byte payload for tag {t}"),
    }
}

/// Header interposed before every foreign-owned payload.
///
/// The block layout is `[header][payload]`, the whole block aligned to 16
/// so payloads of any practical alignment start right after the header.
/// `size` covers the entire block including the header, which is all the
/// collector needs to reserve the destination copy.
#[repr(C, align(16))]
pub struct OwnedHeader {
    /// Total block size in bytes, header included.
    pub size: usize,
    /// Runs exactly once, when the block is not reached by a collection
    /// (or when the runtime is dropped while the block is still owned).
    pub drop_fn: unsafe fn(*mut u8),
    /// Relocates the payload during collection; the destination has
    /// already been reserved by the collector.
    pub move_fn: unsafe fn(src: *mut u8, dst: *mut u8),
}

/// Byte offset from the block base to the payload.
pub const OWNED_PAYLOAD_OFFSET: usize = size_of::<OwnedHeader>();

/// Block alignment for foreign-owned allocations.
pub const OWNED_BLOCK_ALIGN: usize = align_of::<OwnedHeader>();

/// The header that precedes an owned payload address.
///
/// # Safety
/// `payload` must be the payload address of a live foreign-owned block.
pub unsafe fn owned_header(payload: usize) -> *mut OwnedHeader {
    (payload - OWNED_PAYLOAD_OFFSET) as *mut OwnedHeader
}
