// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Composed objects: per-instance storage stamped out from a shared
//! [`ComposedType`].
//!
//! An object owns three blocks, all obtained from its allocator:
//!
//! ```text
//! Object
//!   ├─ buffer  packed instance buffer (inline mixins, fixed offsets)
//!   ├─ slots   slot table: one data pointer per mixin, slot order = id order
//!   └─ oob     out-of-line buffers for mixins with a custom allocator
//! ```
//!
//! Dispatch and typed access only ever go through the slot table, so inline
//! and out-of-line mixins are indistinguishable past construction.
//!
//! # Mutation
//!
//! [`Object::mutate`] swaps the object to a different composed type in
//! place. The rebuild is all-or-nothing: every failable step (allocation,
//! default construction of added mixins, copy-relocation of mixins without a
//! move operation) runs against staging memory while the old blocks stay
//! live, and only after the last failable step do the infallible moves,
//! destructions and pointer swaps commit the new state. An error at any
//! point unwinds the staging blocks and leaves the object byte-identical.

use std::any::TypeId;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::alloc::{mixin_offset, MixinAllocator, ObjectAllocator};
use crate::compose::{ComposedType, Placement};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::registry::{MessageId, MixinDescriptor, MixinId};

/// One out-of-line allocation owned by an object.
pub(crate) struct OobAlloc {
    /// Slot index in the object's current composed type.
    slot: usize,
    /// Buffer base as returned by the mixin's allocator.
    base: NonNull<u8>,
}

/// What the rebuild did for one slot of the new type, recorded so the commit
/// and unwind paths know which instances are live where.
enum SlotAction {
    /// A fresh instance lives in staging (default-constructed, or
    /// copy-constructed from another object).
    Fresh,
    /// Staging holds a copy of this object's own old instance; the old one
    /// still needs destroying at commit.
    CopiedOld,
    /// The old instance will be moved bitwise at commit.
    MoveOld { old_slot: usize },
}

/// Where the rebuild takes instance state for mixins it cannot relocate from
/// the object itself.
enum FillSource<'a> {
    /// Added mixins are default-constructed.
    Construct,
    /// Every mixin of the new type is copied or assigned from this object.
    CopyOf(&'a Object),
}

/// A runtime-composed object: a set of mixin instances bundled under one
/// canonical [`ComposedType`].
pub struct Object {
    domain: Domain,
    ty: Arc<ComposedType>,
    /// Packed instance buffer; null iff the type needs no inline bytes.
    buffer: *mut u8,
    /// Slot table; null iff the type is empty.
    slots: *mut *mut u8,
    oob: Vec<OobAlloc>,
    alloc: Arc<dyn ObjectAllocator>,
}

// Mixin values registered through `MixinBuilder` are `Send + Sync`; raw
// descriptors extend the `from_raw` contract to cross-thread use. The raw
// pointers only reach data owned by this object.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// Creates an empty object bound to `domain` and `alloc`, firing the
    /// allocator's attach hook.
    pub(crate) fn empty(domain: Domain, alloc: Arc<dyn ObjectAllocator>) -> Object {
        let ty = domain.empty_type();
        let object = Object {
            domain,
            ty,
            buffer: std::ptr::null_mut(),
            slots: std::ptr::null_mut(),
            oob: Vec::new(),
            alloc,
        };
        object.alloc.on_attach(&object);
        object
    }

    /// The domain this object lives in.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The canonical composed type; `Arc` identity doubles as type equality.
    pub fn type_of(&self) -> &Arc<ComposedType> {
        &self.ty
    }

    /// The allocator serving this object.
    pub fn allocator(&self) -> &Arc<dyn ObjectAllocator> {
        &self.alloc
    }

    /// The sorted mixin ids currently composing this object.
    pub fn mixin_ids(&self) -> &[MixinId] {
        self.ty.mixin_ids()
    }

    /// True when no mixins are attached.
    pub fn is_empty(&self) -> bool {
        self.ty.is_empty()
    }

    /// Whether the given mixin id is part of this object.
    pub fn has_id(&self, id: MixinId) -> bool {
        self.ty.contains(id)
    }

    /// Whether a mixin registered for `T` is part of this object.
    pub fn has<T: 'static>(&self) -> bool {
        self.slot_for_type(TypeId::of::<T>()).is_some()
    }

    /// Whether this object's type implements the given message.
    pub fn implements(&self, message: MessageId) -> bool {
        self.ty.implements(message)
    }

    /// Borrows the instance of the mixin registered for `T`, if attached.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        let slot = self.slot_for_type(TypeId::of::<T>())?;
        // Safety: the registry maps T to exactly one mixin kind, so the slot
        // stores a live T for as long as `self` is borrowed.
        unsafe { Some(&*self.slot_data(slot).cast::<T>()) }
    }

    /// Mutably borrows the instance of the mixin registered for `T`.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        let slot = self.slot_for_type(TypeId::of::<T>())?;
        // Safety: as in `get`, plus exclusivity through `&mut self`.
        unsafe { Some(&mut *self.slot_data(slot).cast::<T>()) }
    }

    fn slot_for_type(&self, key: TypeId) -> Option<usize> {
        let id = self.domain.mixin_id_by_key(key)?;
        self.ty.slot_of(id)
    }

    /// Base of the slot table, for chain continuations. Null iff the type
    /// is empty, in which case no entry ever indexes it.
    pub(crate) fn slot_table(&self) -> *const *mut u8 {
        self.slots
    }

    /// Data pointer of the given slot. Caller must keep `slot` within the
    /// current type.
    pub(crate) fn slot_data(&self, slot: usize) -> *mut u8 {
        debug_assert!(slot < self.ty.len());
        // Safety: the slot table always has one live entry per mixin.
        unsafe { *self.slots.add(slot) }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Adds and removes mixins in one transaction, running the domain's
    /// mutation rules over the request first.
    ///
    /// Retained mixins keep their instance state (relocated to the new
    /// layout), added mixins are default-constructed, removed mixins are
    /// destroyed. On error the object is left exactly as it was.
    pub fn mutate(&mut self, add: &[MixinId], remove: &[MixinId]) -> Result<()> {
        let new_ty = self
            .domain
            .resolve_mutation(self.ty.mixin_ids(), add, remove)?;
        self.rebuild(new_ty, FillSource::Construct)
    }

    /// Removes every mixin, subject to the domain's rules: mandatory mixins
    /// survive a clear.
    pub fn clear(&mut self) -> Result<()> {
        let ids: Vec<MixinId> = self.ty.mixin_ids().to_vec();
        let new_ty = self.domain.resolve_mutation(&ids, &[], &ids)?;
        self.rebuild(new_ty, FillSource::Construct)
    }

    /// Stamps this object to the template's composed type without re-running
    /// mutation rules (they were applied when the template was built).
    pub(crate) fn adopt_type(&mut self, ty: Arc<ComposedType>) -> Result<()> {
        self.rebuild(ty, FillSource::Construct)
    }

    // ========================================================================
    // Copy / move
    // ========================================================================

    /// Copies this object into a fresh one: same composed type, every mixin
    /// copy-constructed. The allocator's copy hook chooses the target's
    /// allocator.
    ///
    /// Fails without side effects if any mixin lacks a copy operation.
    pub fn try_clone(&self) -> Result<Object> {
        let alloc = self
            .alloc
            .on_copy(self)
            .unwrap_or_else(|| Arc::clone(&self.alloc));
        let mut target = Object::empty(self.domain.clone(), alloc);
        target.rebuild(Arc::clone(&self.ty), FillSource::CopyOf(self))?;
        Ok(target)
    }

    /// Copy-assigns `source` onto this object, adopting its composed type.
    ///
    /// Mixins present on both sides are copy-assigned in place (their
    /// instances survive), mixins only in `source` are copy-constructed, and
    /// mixins only in `self` are destroyed. Never a partial copy: the whole
    /// operation is validated and staged before anything is touched.
    pub fn copy_from(&mut self, source: &Object) -> Result<()> {
        if !self.domain.same(&source.domain) {
            return Err(Error::DomainMismatch);
        }
        if Arc::ptr_eq(&self.ty, &source.ty) {
            return self.assign_in_place(source);
        }
        self.rebuild(Arc::clone(&source.ty), FillSource::CopyOf(source))
    }

    /// Moves `source`'s contents into this object; the previous contents are
    /// destroyed. The source's move hook may supply a different allocator
    /// for the adopted contents.
    pub fn replace(&mut self, mut source: Object) -> Result<()> {
        if !self.domain.same(&source.domain) {
            return Err(Error::DomainMismatch);
        }
        if let Some(alloc) = source.alloc.on_move(&source) {
            source.alloc = alloc;
        }
        std::mem::swap(self, &mut source);
        // `source` now holds the replaced contents and tears them down here.
        Ok(())
    }

    /// Same-type copy: pure assignment, validated up front.
    fn assign_in_place(&mut self, source: &Object) -> Result<()> {
        for layout in self.ty.slots() {
            if layout.info.copy_assign_op().is_none() {
                return Err(Error::NotCopyAssignable(layout.info.name().to_string()));
            }
        }
        for (slot, layout) in self.ty.slots().iter().enumerate() {
            if let Some(op) = layout.info.copy_assign_op() {
                // Safety: both slots hold live instances of the same kind;
                // `&mut self` vs `&source` rules out overlap.
                unsafe { op(self.slot_data(slot), source.slot_data(slot)) };
            }
        }
        Ok(())
    }

    // ========================================================================
    // Rebuild core
    // ========================================================================

    /// The mixin-level allocator in charge of one descriptor: its own custom
    /// allocator if it carries one, this object's otherwise.
    fn mixin_alloc_for<'a>(&'a self, info: &'a MixinDescriptor) -> &'a dyn MixinAllocator {
        match info.allocator() {
            Some(custom) => custom.as_ref(),
            None => self.alloc.as_ref(),
        }
    }

    /// Swaps this object to `new_ty`, filling added mixins from `source`.
    fn rebuild(&mut self, new_ty: Arc<ComposedType>, source: FillSource<'_>) -> Result<()> {
        if Arc::ptr_eq(&self.ty, &new_ty) {
            return match source {
                FillSource::Construct => Ok(()),
                FillSource::CopyOf(other) => self.assign_in_place(other),
            };
        }
        let old_ty = Arc::clone(&self.ty);

        // A copy rebuild assigns every retained mixin afterwards; refuse up
        // front so nothing is staged for a doomed copy.
        if matches!(source, FillSource::CopyOf(_)) {
            for layout in new_ty.slots() {
                if old_ty.contains(layout.id) && layout.info.copy_assign_op().is_none() {
                    return Err(Error::NotCopyAssignable(layout.info.name().to_string()));
                }
            }
        }

        // --- Staging: object blocks ---
        let count = new_ty.len();
        let new_buffer: *mut u8 = if new_ty.buffer_size() > 0 {
            self.alloc
                .alloc_buffer(new_ty.buffer_size(), new_ty.buffer_align())?
                .as_ptr()
        } else {
            std::ptr::null_mut()
        };
        let new_slots: *mut *mut u8 = if count > 0 {
            match self.alloc.alloc_slots(count) {
                Ok(ptr) => ptr.as_ptr().cast(),
                Err(e) => {
                    // Safety: just allocated, nothing constructed.
                    unsafe { self.free_blocks(&new_ty, new_buffer, std::ptr::null_mut()) };
                    return Err(e);
                }
            }
        } else {
            std::ptr::null_mut()
        };

        // --- Staging: out-of-line buffers and slot pointers ---
        let mut new_oob: Vec<OobAlloc> = Vec::new();
        let mut failed = None;
        for (slot, layout) in new_ty.slots().iter().enumerate() {
            let data = match layout.placement {
                // Safety: offset is within the buffer by construction.
                Placement::Inline { offset } => unsafe { new_buffer.add(offset) },
                Placement::OutOfLine => {
                    match self.mixin_alloc_for(&layout.info).alloc_mixin(&layout.info) {
                        Ok(base) => {
                            let offset = mixin_offset(base.as_ptr(), layout.info.align());
                            new_oob.push(OobAlloc { slot, base });
                            // Safety: the buffer covers offset + size.
                            unsafe { base.as_ptr().add(offset) }
                        }
                        Err(e) => {
                            failed = Some(e);
                            break;
                        }
                    }
                }
            };
            // Safety: slot < count, table freshly allocated.
            unsafe { *new_slots.add(slot) = data };
        }
        if let Some(e) = failed {
            unsafe {
                self.free_oob(&new_ty, &mut new_oob);
                self.free_blocks(&new_ty, new_buffer, new_slots);
            }
            return Err(e);
        }

        // --- Failable fills against staging; old instances untouched ---
        let mut actions: Vec<SlotAction> = Vec::with_capacity(count);
        let mut failed = None;
        for (slot, layout) in new_ty.slots().iter().enumerate() {
            // Safety: pointer written in the staging pass above.
            let data = unsafe { *new_slots.add(slot) };
            let hook = self.mixin_alloc_for(&layout.info);
            let action = match old_ty.slot_of(layout.id) {
                Some(old_slot) if layout.info.move_op().is_some() => {
                    SlotAction::MoveOld { old_slot }
                }
                Some(old_slot) => {
                    // No move op: relocate by copying the old instance now.
                    let src = self.slot_data(old_slot);
                    // Safety: `data` is uninitialized staging storage of the
                    // right shape, `src` is the live old instance.
                    match unsafe { hook.copy_construct_mixin(&layout.info, data, src) } {
                        Ok(()) => SlotAction::CopiedOld,
                        Err(Error::NotCopyable(name)) => {
                            failed = Some(Error::NotMovable(name));
                            break;
                        }
                        Err(e) => {
                            failed = Some(e);
                            break;
                        }
                    }
                }
                None => {
                    let filled = match &source {
                        // Safety: as above; the construct hook fully
                        // initializes the storage or reports failure.
                        FillSource::Construct => unsafe {
                            hook.construct_mixin(&layout.info, data)
                        },
                        FillSource::CopyOf(other) => match other.ty.slot_of(layout.id) {
                            // Safety: `other` holds a live instance of the
                            // same kind in this slot.
                            Some(src_slot) => unsafe {
                                hook.copy_construct_mixin(
                                    &layout.info,
                                    data,
                                    other.slot_data(src_slot),
                                )
                            },
                            None => Err(Error::UnknownMixin(layout.id)),
                        },
                    };
                    match filled {
                        Ok(()) => SlotAction::Fresh,
                        Err(e) => {
                            failed = Some(e);
                            break;
                        }
                    }
                }
            };
            actions.push(action);
        }
        if let Some(e) = failed {
            // Unwind: destroy what the fill loop materialized, release
            // staging. The old object state was never touched.
            unsafe {
                for (slot, action) in actions.iter().enumerate() {
                    if matches!(action, SlotAction::Fresh | SlotAction::CopiedOld) {
                        let layout = &new_ty.slots()[slot];
                        let data = *new_slots.add(slot);
                        self.mixin_alloc_for(&layout.info)
                            .destroy_mixin(&layout.info, data);
                    }
                }
                self.free_oob(&new_ty, &mut new_oob);
                self.free_blocks(&new_ty, new_buffer, new_slots);
            }
            return Err(e);
        }

        // --- Commit: everything below is infallible ---
        unsafe {
            // Bitwise relocation of movable retained instances.
            for (slot, action) in actions.iter().enumerate() {
                if let SlotAction::MoveOld { old_slot } = *action {
                    let layout = &new_ty.slots()[slot];
                    if let Some(op) = layout.info.move_op() {
                        op(*new_slots.add(slot), self.slot_data(old_slot));
                    }
                }
            }
            // Tear down the old state: destroy removed and copied-from
            // instances (moved-away storage is relinquished, not dropped).
            for &index in old_ty.drop_order() {
                let old_slot = index as usize;
                let layout = &old_ty.slots()[old_slot];
                let moved_away = new_ty
                    .slot_of(layout.id)
                    .is_some_and(|s| matches!(actions[s], SlotAction::MoveOld { .. }));
                if !moved_away {
                    self.mixin_alloc_for(&layout.info)
                        .destroy_mixin(&layout.info, self.slot_data(old_slot));
                }
            }
            let mut old_oob = std::mem::take(&mut self.oob);
            self.free_oob(&old_ty, &mut old_oob);
            self.free_blocks(&old_ty, self.buffer, self.slots);
        }
        self.ty = Arc::clone(&new_ty);
        self.buffer = new_buffer;
        self.slots = new_slots;
        self.oob = new_oob;

        // Copy rebuild: retained instances were relocated from self, now
        // assign their state from the source. Validated up front.
        if let FillSource::CopyOf(other) = source {
            for (slot, action) in actions.iter().enumerate() {
                if matches!(action, SlotAction::MoveOld { .. } | SlotAction::CopiedOld) {
                    let layout = &self.ty.slots()[slot];
                    if let Some(op) = layout.info.copy_assign_op() {
                        // Safety: same composed type on both sides, so slot
                        // indices coincide and both instances are live.
                        unsafe {
                            op(
                                self.slot_data(slot),
                                other.slot_data(
                                    other.ty.slot_of(layout.id).unwrap_or(slot),
                                ),
                            )
                        };
                    }
                }
            }
        }

        log::debug!(
            "object rebuilt: {} -> {} mixins",
            old_ty.len(),
            self.ty.len()
        );
        Ok(())
    }

    /// Releases out-of-line buffers through their owning allocators. Instances
    /// inside must already be destroyed (or never constructed).
    unsafe fn free_oob(&self, ty: &ComposedType, oob: &mut Vec<OobAlloc>) {
        for entry in oob.drain(..) {
            let layout = &ty.slots()[entry.slot];
            self.mixin_alloc_for(&layout.info)
                .dealloc_mixin(entry.base, &layout.info);
        }
    }

    /// Releases the instance buffer and slot table sized for `ty`.
    unsafe fn free_blocks(&self, ty: &ComposedType, buffer: *mut u8, slots: *mut *mut u8) {
        if !buffer.is_null() {
            self.alloc
                .dealloc_buffer(NonNull::new_unchecked(buffer), ty.buffer_size(), ty.buffer_align());
        }
        if !slots.is_null() {
            self.alloc
                .dealloc_slots(NonNull::new_unchecked(slots.cast()), ty.len());
        }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        let ty = Arc::clone(&self.ty);
        // Safety: drop order covers every live slot exactly once; the blocks
        // were obtained from the matching allocators.
        unsafe {
            for &index in ty.drop_order() {
                let slot = index as usize;
                let layout = &ty.slots()[slot];
                self.mixin_alloc_for(&layout.info)
                    .destroy_mixin(&layout.info, self.slot_data(slot));
            }
            let mut oob = std::mem::take(&mut self.oob);
            self.free_oob(&ty, &mut oob);
            self.free_blocks(&ty, self.buffer, self.slots);
        }
        self.buffer = std::ptr::null_mut();
        self.slots = std::ptr::null_mut();
        self.alloc.on_release(self);
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("mixins", &self.ty.mixin_ids())
            .field("buffer_size", &self.ty.buffer_size())
            .finish()
    }
}

// ============================================================================
// Templates
// ============================================================================

/// A pre-resolved composed type that can stamp many objects without
/// re-running mutation rules or cache lookups.
///
/// Built through [`Domain::build_template`]; the rule set in force at build
/// time is baked in.
#[derive(Clone)]
pub struct ObjectTypeTemplate {
    pub(crate) domain: Domain,
    pub(crate) ty: Arc<ComposedType>,
}

impl ObjectTypeTemplate {
    /// The canonical composed type this template stamps.
    pub fn composed_type(&self) -> &Arc<ComposedType> {
        &self.ty
    }

    /// Re-types an existing object to this template.
    pub fn apply_to(&self, object: &mut Object) -> Result<()> {
        if !self.domain.same(object.domain()) {
            return Err(Error::DomainMismatch);
        }
        object.adopt_type(Arc::clone(&self.ty))
    }

    /// Creates a fresh object of this template's type, using the domain's
    /// default allocator.
    pub fn instantiate(&self) -> Result<Object> {
        let mut object = Object::empty(self.domain.clone(), self.domain.default_allocator());
        object.adopt_type(Arc::clone(&self.ty))?;
        Ok(object)
    }
}

impl std::fmt::Debug for ObjectTypeTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTypeTemplate")
            .field("mixins", &self.ty.mixin_ids())
            .finish()
    }
}
