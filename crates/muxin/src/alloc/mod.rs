// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pluggable memory providers for mixin buffers and per-object slot tables.
//!
//! Three escalating capability tiers, each a supertrait of the next consumer:
//!
//! ```text
//! MixinAllocator    alloc/dealloc one mixin's backing bytes
//!      ^            + construct / copy / destroy hooks with defaults
//! SlotAllocator     + per-object slot table (count x SLOT_SIZE)
//!      ^            + packed instance buffer
//! ObjectAllocator   + lifecycle hooks for allocator<->object association
//! ```
//!
//! Out-of-line mixin buffers follow a fixed layout contract: the allocator
//! returns memory aligned to at least pointer size, and the engine reserves
//! one pointer-sized slot in front of the mixin's aligned start. The helpers
//! [`mem_size_for_mixin`] and [`mixin_offset`] encode the rounding rules;
//! custom allocators should use them rather than re-deriving the math.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::object::Object;
use crate::registry::MixinDescriptor;

/// Size of one entry in the per-object slot table (a data pointer).
pub const SLOT_SIZE: usize = std::mem::size_of::<*mut u8>();

const PTR_SIZE: usize = std::mem::size_of::<*mut u8>();

/// Rounds `s` up to the nearest multiple of `n`.
pub(crate) const fn next_multiple(s: usize, n: usize) -> usize {
    (s + n - 1) / n * n
}

/// Total bytes an out-of-line mixin buffer needs: room for the reserved
/// pointer slot rounded to the mixin's alignment, the mixin itself, and
/// trailing padding back to pointer size so consecutive allocations from an
/// arena stay pointer-aligned.
pub fn mem_size_for_mixin(size: usize, align: usize) -> usize {
    let mem = next_multiple(PTR_SIZE, align.max(1)) + size;
    next_multiple(mem, PTR_SIZE)
}

/// Offset of the mixin's start within a buffer returned by an allocator.
///
/// The buffer must be aligned to at least pointer size; the offset leaves the
/// reserved pointer slot in front of the aligned start.
pub fn mixin_offset(buffer: *const u8, align: usize) -> usize {
    debug_assert!(
        buffer as usize % PTR_SIZE == 0,
        "mixin allocators must return pointer-aligned memory"
    );
    next_multiple(buffer as usize + PTR_SIZE, align.max(1)) - buffer as usize
}

// ============================================================================
// Capability tiers
// ============================================================================

/// First tier: provides backing bytes for individual mixins, plus the
/// construct/copy/destroy hooks the engine funnels every instance operation
/// through.
pub trait MixinAllocator: Send + Sync {
    /// Allocates a buffer of [`mem_size_for_mixin`] bytes for one instance of
    /// the described mixin, aligned to at least pointer size.
    fn alloc_mixin(&self, info: &MixinDescriptor) -> Result<NonNull<u8>>;

    /// Releases a buffer obtained from [`MixinAllocator::alloc_mixin`].
    ///
    /// # Safety
    ///
    /// `base` must come from `alloc_mixin` on this allocator with the same
    /// descriptor, and the instance inside must already be destroyed.
    unsafe fn dealloc_mixin(&self, base: NonNull<u8>, info: &MixinDescriptor);

    /// Constructs an instance into `data`. The default implementation runs
    /// the descriptor's default-construct operation and fails if there is
    /// none.
    ///
    /// # Safety
    ///
    /// `data` must point to uninitialized storage of the descriptor's size
    /// and alignment.
    unsafe fn construct_mixin(&self, info: &MixinDescriptor, data: *mut u8) -> Result<()> {
        match info.construct_op() {
            Some(op) => {
                op(data);
                Ok(())
            }
            None => Err(Error::MissingDefaultConstruct(info.name().to_string())),
        }
    }

    /// Copy-constructs an instance into `data` from a live `source`. The
    /// default implementation runs the descriptor's copy operation and
    /// reports failure if there is none — never a silent partial copy.
    ///
    /// # Safety
    ///
    /// `data` as in [`MixinAllocator::construct_mixin`]; `source` must point
    /// to a live instance of the same kind.
    unsafe fn copy_construct_mixin(
        &self,
        info: &MixinDescriptor,
        data: *mut u8,
        source: *const u8,
    ) -> Result<()> {
        match info.copy_op() {
            Some(op) => {
                op(data, source);
                Ok(())
            }
            None => Err(Error::NotCopyable(info.name().to_string())),
        }
    }

    /// Destroys the instance at `data`. The default implementation runs the
    /// descriptor's destroy operation, a no-op if there is none.
    ///
    /// # Safety
    ///
    /// `data` must point to a live instance of the described kind, not used
    /// again afterwards.
    unsafe fn destroy_mixin(&self, info: &MixinDescriptor, data: *mut u8) {
        if let Some(op) = info.destroy_op() {
            op(data);
        }
    }
}

/// Second tier: adds the per-object blocks — the slot table (one pointer per
/// mixin of the composed type) and the packed instance buffer.
pub trait SlotAllocator: MixinAllocator {
    /// Allocates the slot table: `count * SLOT_SIZE` bytes, pointer-aligned.
    /// Never called with `count == 0`.
    fn alloc_slots(&self, count: usize) -> Result<NonNull<u8>>;

    /// Releases a slot table.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_slots` on this allocator with the same
    /// `count`.
    unsafe fn dealloc_slots(&self, ptr: NonNull<u8>, count: usize);

    /// Allocates the packed instance buffer for a composed type. Never
    /// called with `size == 0`.
    fn alloc_buffer(&self, size: usize, align: usize) -> Result<NonNull<u8>>;

    /// Releases an instance buffer.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_buffer` on this allocator with the same
    /// size and alignment.
    unsafe fn dealloc_buffer(&self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// Third tier: lifecycle hooks fired when an allocator becomes or ceases to
/// be associated with a specific object. The hooks let one allocator be
/// shared by many objects under caller-defined reference counting or
/// pooling.
pub trait ObjectAllocator: SlotAllocator {
    /// Fired when the allocator is attached to a newly created object, or to
    /// the target of a copy/move that adopted it.
    fn on_attach(&self, _object: &Object) {}

    /// Fired when the association ends (object dropped or replaced).
    fn on_release(&self, _object: &Object) {}

    /// Fired when `source` is copied into a fresh object. Return an
    /// allocator for the target, or `None` to share this one.
    fn on_copy(&self, _source: &Object) -> Option<Arc<dyn ObjectAllocator>> {
        None
    }

    /// Fired when `source`'s contents are about to be moved into another
    /// object. Return an allocator for the target, or `None` to hand over
    /// this one.
    fn on_move(&self, _source: &Object) -> Option<Arc<dyn ObjectAllocator>> {
        None
    }
}

// ============================================================================
// Default allocator
// ============================================================================

/// The in-process default, backed by the global Rust allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAllocator;

fn global_alloc(size: usize, align: usize) -> Result<NonNull<u8>> {
    debug_assert!(size > 0);
    let layout = std::alloc::Layout::from_size_align(size, align)
        .map_err(|_| Error::AllocationFailed { size, align })?;
    // Safety: size is non-zero, layout is valid.
    let ptr = unsafe { std::alloc::alloc(layout) };
    NonNull::new(ptr).ok_or(Error::AllocationFailed { size, align })
}

unsafe fn global_dealloc(ptr: NonNull<u8>, size: usize, align: usize) {
    let layout = std::alloc::Layout::from_size_align_unchecked(size, align);
    std::alloc::dealloc(ptr.as_ptr(), layout);
}

impl MixinAllocator for DefaultAllocator {
    fn alloc_mixin(&self, info: &MixinDescriptor) -> Result<NonNull<u8>> {
        global_alloc(mem_size_for_mixin(info.size(), info.align()), PTR_SIZE)
    }

    unsafe fn dealloc_mixin(&self, base: NonNull<u8>, info: &MixinDescriptor) {
        global_dealloc(base, mem_size_for_mixin(info.size(), info.align()), PTR_SIZE);
    }
}

impl SlotAllocator for DefaultAllocator {
    fn alloc_slots(&self, count: usize) -> Result<NonNull<u8>> {
        global_alloc(count * SLOT_SIZE, PTR_SIZE)
    }

    unsafe fn dealloc_slots(&self, ptr: NonNull<u8>, count: usize) {
        global_dealloc(ptr, count * SLOT_SIZE, PTR_SIZE);
    }

    fn alloc_buffer(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        global_alloc(size, align)
    }

    unsafe fn dealloc_buffer(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        global_dealloc(ptr, size, align);
    }
}

impl ObjectAllocator for DefaultAllocator {}
