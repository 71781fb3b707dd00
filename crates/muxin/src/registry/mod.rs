// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mixin and message descriptors, their builders, and the process-wide
//! registries that assign dense ids.
//!
//! The compile-time binding layer of classical mixin libraries is replaced
//! here by explicit runtime registration: [`MixinBuilder`] captures size,
//! alignment and lifecycle operations from a concrete Rust type through
//! monomorphized shims, and [`MixinDescriptor::from_raw`] accepts the same
//! capability set as plain function pointers for types the compiler never
//! sees.
//!
//! Ids are dense and stable within a process run; they are used as array
//! indices by the composed-type builder and the dispatch tables.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::alloc::MixinAllocator;
use crate::dispatch::Next;
use crate::error::{Error, Result};

/// Dense id of a registered mixin kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MixinId(pub(crate) u32);

impl MixinId {
    /// Index form, usable into registry-order arrays.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for MixinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dense id of a registered message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub(crate) u32);

impl MessageId {
    /// Index form, usable into per-type dispatch tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Lifecycle operations
// ============================================================================

/// Default-constructs a mixin instance into uninitialized storage.
pub type ConstructFn = unsafe fn(*mut u8);
/// Destroys a mixin instance in place.
pub type DestroyFn = unsafe fn(*mut u8);
/// Copy-constructs into uninitialized storage from a live source.
pub type CopyFn = unsafe fn(*mut u8, *const u8);
/// Move-constructs into uninitialized storage; the source is relinquished
/// without being destroyed.
pub type MoveFn = unsafe fn(*mut u8, *mut u8);

/// Lifecycle operation set for [`MixinDescriptor::from_raw`].
///
/// Any operation may be absent; absent operations restrict what mutations and
/// copies the mixin participates in (see the mutation and copy error
/// variants).
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleOps {
    /// Default constructor, required to add the mixin through a mutation.
    pub construct: Option<ConstructFn>,
    /// Destructor. Absent means dropping the storage is a no-op.
    pub destroy: Option<DestroyFn>,
    /// Copy constructor, required for whole-object copies.
    pub copy_construct: Option<CopyFn>,
    /// Copy assignment, required for `copy_from` onto a shared mixin.
    pub copy_assign: Option<CopyFn>,
    /// Move constructor, used to relocate instances across buffer layouts.
    pub move_construct: Option<MoveFn>,
}

unsafe fn construct_shim<T: Default>(memory: *mut u8) {
    memory.cast::<T>().write(T::default());
}

unsafe fn destroy_shim<T>(memory: *mut u8) {
    std::ptr::drop_in_place(memory.cast::<T>());
}

unsafe fn copy_shim<T: Clone>(memory: *mut u8, source: *const u8) {
    memory.cast::<T>().write((*source.cast::<T>()).clone());
}

unsafe fn copy_assign_shim<T: Clone>(target: *mut u8, source: *const u8) {
    (*target.cast::<T>()).clone_from(&*source.cast::<T>());
}

// Rust moves are bitwise; the source is relinquished, not dropped.
unsafe fn move_shim<T>(memory: *mut u8, source: *mut u8) {
    std::ptr::copy_nonoverlapping(source.cast::<T>(), memory.cast::<T>(), 1);
}

// ============================================================================
// Message handlers (type-erased)
// ============================================================================

pub(crate) type PlainFn =
    dyn Fn(*mut u8, &mut dyn Any) -> Result<Box<dyn Any>> + Send + Sync;
pub(crate) type ChainFn =
    dyn for<'a> Fn(*mut u8, &'a mut dyn Any, Next<'a>) -> Result<Box<dyn Any>> + Send + Sync;
pub(crate) type FallbackFn = dyn Fn(&mut dyn Any) -> Result<Box<dyn Any>> + Send + Sync;

/// A bound entry point, erased over mixin, argument and result types.
#[derive(Clone)]
pub(crate) enum Handler {
    Plain(Arc<PlainFn>),
    Chain(Arc<ChainFn>),
}

impl Handler {
    pub(crate) fn is_chain(&self) -> bool {
        matches!(self, Handler::Chain(_))
    }
}

pub(crate) fn erase_plain<T, A, R, F>(f: F) -> Handler
where
    T: 'static,
    A: Any,
    R: Any,
    F: Fn(&mut T, &mut A) -> R + Send + Sync + 'static,
{
    Handler::Plain(Arc::new(move |data: *mut u8, args: &mut dyn Any| {
        let args = args.downcast_mut::<A>().ok_or(Error::BadArgumentType {
            expected: std::any::type_name::<A>(),
        })?;
        // Safety: the dispatch path only passes pointers to a live, exclusively
        // borrowed instance of the descriptor's bound type.
        let this = unsafe { &mut *data.cast::<T>() };
        Ok(Box::new(f(this, args)) as Box<dyn Any>)
    }))
}

pub(crate) fn erase_chain<T, A, R, F>(f: F) -> Handler
where
    T: 'static,
    A: Any,
    R: Any,
    F: for<'a> Fn(&mut T, &mut A, Next<'a>) -> Result<R> + Send + Sync + 'static,
{
    Handler::Chain(Arc::new(
        move |data: *mut u8, args: &mut dyn Any, next: Next<'_>| {
            let args = args.downcast_mut::<A>().ok_or(Error::BadArgumentType {
                expected: std::any::type_name::<A>(),
            })?;
            // Safety: see erase_plain.
            let this = unsafe { &mut *data.cast::<T>() };
            Ok(Box::new(f(this, args, next)?) as Box<dyn Any>)
        },
    ))
}

/// One (message, priority, entry-point) binding carried by a mixin
/// descriptor.
#[derive(Clone)]
pub(crate) struct MessageBinding {
    pub(crate) message: MessageId,
    pub(crate) priority: i32,
    pub(crate) handler: Handler,
}

// ============================================================================
// Mixin descriptors
// ============================================================================

/// Immutable, process-wide description of one mixin kind.
///
/// Created once through [`MixinBuilder`] (or [`MixinDescriptor::from_raw`]),
/// registered with a domain, and never destroyed afterwards.
#[derive(Clone)]
pub struct MixinDescriptor {
    name: Box<str>,
    size: usize,
    align: usize,
    type_key: Option<TypeId>,
    allocator: Option<Arc<dyn MixinAllocator>>,
    construct: Option<ConstructFn>,
    destroy: Option<DestroyFn>,
    copy_construct: Option<CopyFn>,
    copy_assign: Option<CopyFn>,
    move_construct: Option<MoveFn>,
    pub(crate) bindings: Vec<MessageBinding>,
}

impl MixinDescriptor {
    /// Builds a descriptor from raw capabilities, for mixin kinds whose
    /// storage the compiler never sees (FFI payloads, script objects).
    ///
    /// # Safety
    ///
    /// Every provided operation must be correct for a value of `size` bytes
    /// aligned to `align`: constructors must fully initialize the storage and
    /// the destructor must accept anything a constructor produced.
    pub unsafe fn from_raw(name: &str, size: usize, align: usize, ops: LifecycleOps) -> Self {
        Self {
            name: name.into(),
            size,
            align: align.max(1),
            type_key: None,
            allocator: None,
            construct: ops.construct,
            destroy: ops.destroy,
            copy_construct: ops.copy_construct,
            copy_assign: ops.copy_assign,
            move_construct: ops.move_construct,
            bindings: Vec::new(),
        }
    }

    /// Externally visible mixin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Instance alignment in bytes.
    pub fn align(&self) -> usize {
        self.align
    }

    /// The custom allocator this mixin kind carries, if any. Mixins with a
    /// custom allocator are placed out-of-line by the composed-type builder.
    pub fn allocator(&self) -> Option<&Arc<dyn MixinAllocator>> {
        self.allocator.as_ref()
    }

    /// Default-construct operation, if the kind supports it.
    pub fn construct_op(&self) -> Option<ConstructFn> {
        self.construct
    }

    /// Destroy operation, if the kind needs one.
    pub fn destroy_op(&self) -> Option<DestroyFn> {
        self.destroy
    }

    /// Copy-construct operation, if the kind supports it.
    pub fn copy_op(&self) -> Option<CopyFn> {
        self.copy_construct
    }

    /// Copy-assign operation, if the kind supports it.
    pub fn copy_assign_op(&self) -> Option<CopyFn> {
        self.copy_assign
    }

    /// Move-construct operation, if the kind supports it.
    pub fn move_op(&self) -> Option<MoveFn> {
        self.move_construct
    }

    pub(crate) fn type_key(&self) -> Option<TypeId> {
        self.type_key
    }

    /// Shape compatibility check used for idempotent re-registration.
    fn same_shape(&self, other: &MixinDescriptor) -> bool {
        self.size == other.size && self.align == other.align && self.type_key == other.type_key
    }
}

impl std::fmt::Debug for MixinDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixinDescriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("bindings", &self.bindings.len())
            .field("out_of_line", &self.allocator.is_some())
            .finish()
    }
}

/// Fluent builder capturing a mixin descriptor from a concrete Rust type.
///
/// The type must be `Send + Sync + 'static` so that composed objects can
/// cross threads. Lifecycle operations are opted into explicitly:
/// destruction and relocation are always available, default construction and
/// copying only when declared.
pub struct MixinBuilder<T> {
    desc: MixinDescriptor,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> MixinBuilder<T> {
    /// Starts a descriptor for `T` under the given externally visible name.
    pub fn new(name: &str) -> Self {
        Self {
            desc: MixinDescriptor {
                name: name.into(),
                size: std::mem::size_of::<T>(),
                align: std::mem::align_of::<T>(),
                type_key: Some(TypeId::of::<T>()),
                allocator: None,
                construct: None,
                destroy: Some(destroy_shim::<T>),
                copy_construct: None,
                copy_assign: None,
                move_construct: Some(move_shim::<T>),
                bindings: Vec::new(),
            },
            _marker: std::marker::PhantomData,
        }
    }

    /// Declares the mixin default-constructible, making it addable through
    /// mutations.
    pub fn default_constructible(mut self) -> Self
    where
        T: Default,
    {
        self.desc.construct = Some(construct_shim::<T>);
        self
    }

    /// Declares the mixin copyable (copy-construct and copy-assign).
    pub fn cloneable(mut self) -> Self
    where
        T: Clone,
    {
        self.desc.copy_construct = Some(copy_shim::<T>);
        self.desc.copy_assign = Some(copy_assign_shim::<T>);
        self
    }

    /// Installs a custom allocator; instances of this mixin are then placed
    /// out-of-line, in buffers obtained from it.
    pub fn allocator(mut self, allocator: Arc<dyn MixinAllocator>) -> Self {
        self.desc.allocator = Some(allocator);
        self
    }

    /// Binds an entry point for a unicast or multicast message.
    pub fn message<A, R, F>(mut self, message: MessageId, priority: i32, f: F) -> Self
    where
        A: Any,
        R: Any,
        F: Fn(&mut T, &mut A) -> R + Send + Sync + 'static,
    {
        self.desc.bindings.push(MessageBinding {
            message,
            priority,
            handler: erase_plain(f),
        });
        self
    }

    /// Binds an entry point for a priority-chain message. The handler
    /// receives a [`Next`] continuation; invoking it runs the rest of the
    /// chain, dropping it short-circuits.
    pub fn chained<A, R, F>(mut self, message: MessageId, priority: i32, f: F) -> Self
    where
        A: Any,
        R: Any,
        F: for<'a> Fn(&mut T, &mut A, Next<'a>) -> Result<R> + Send + Sync + 'static,
    {
        self.desc.bindings.push(MessageBinding {
            message,
            priority,
            handler: erase_chain(f),
        });
        self
    }

    /// Finishes the descriptor.
    pub fn build(self) -> MixinDescriptor {
        self.desc
    }
}

// ============================================================================
// Message descriptors
// ============================================================================

/// How implementers of a message are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallDiscipline {
    /// Exactly one entry point: the highest-priority implementer.
    Unicast,
    /// Every implementer, in priority order; results collected in call order.
    Multicast,
    /// Cooperative fallthrough: each implementer may delegate to the next.
    PriorityChain,
}

/// Immutable, process-wide description of one message kind.
#[derive(Clone)]
pub struct MessageDescriptor {
    name: Box<str>,
    discipline: CallDiscipline,
    pub(crate) fallback: Option<Arc<FallbackFn>>,
}

impl MessageDescriptor {
    fn new(name: &str, discipline: CallDiscipline) -> Self {
        Self {
            name: name.into(),
            discipline,
            fallback: None,
        }
    }

    /// A unicast message.
    pub fn unicast(name: &str) -> Self {
        Self::new(name, CallDiscipline::Unicast)
    }

    /// A multicast message.
    pub fn multicast(name: &str) -> Self {
        Self::new(name, CallDiscipline::Multicast)
    }

    /// A priority-chain message.
    pub fn chain(name: &str) -> Self {
        Self::new(name, CallDiscipline::PriorityChain)
    }

    /// Installs a default implementation, invoked when a chain delegates past
    /// its last implementer, or when a unicast message has no implementer.
    pub fn with_fallback<A, R, F>(mut self, f: F) -> Self
    where
        A: Any,
        R: Any,
        F: Fn(&mut A) -> R + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(move |args: &mut dyn Any| {
            let args = args.downcast_mut::<A>().ok_or(Error::BadArgumentType {
                expected: std::any::type_name::<A>(),
            })?;
            Ok(Box::new(f(args)) as Box<dyn Any>)
        }));
        self
    }

    /// Externally visible message name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered call discipline.
    pub fn discipline(&self) -> CallDiscipline {
        self.discipline
    }
}

impl std::fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDescriptor")
            .field("name", &self.name)
            .field("discipline", &self.discipline)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

// ============================================================================
// Registries
// ============================================================================

/// Registry of mixin descriptors; ids are Vec indices.
pub(crate) struct MixinRegistry {
    by_name: HashMap<Box<str>, MixinId>,
    by_type: HashMap<TypeId, MixinId>,
    infos: Vec<Arc<MixinDescriptor>>,
}

impl MixinRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_type: HashMap::new(),
            infos: Vec::new(),
        }
    }

    /// Registers a descriptor. Idempotent per distinct kind: re-registering
    /// an identical shape under the same name returns the existing id, an
    /// incompatible shape is a configuration error.
    pub(crate) fn register(&mut self, desc: MixinDescriptor) -> Result<MixinId> {
        if let Some(&existing) = self.by_name.get(desc.name()) {
            if self.infos[existing.index()].same_shape(&desc) {
                return Ok(existing);
            }
            return Err(Error::IncompatibleMixin(desc.name().to_string()));
        }
        let id = MixinId(self.infos.len() as u32);
        self.by_name.insert(desc.name.clone(), id);
        if let Some(key) = desc.type_key {
            self.by_type.insert(key, id);
        }
        log::debug!("registered mixin '{}' (id {}, {} bytes)", desc.name(), id, desc.size());
        self.infos.push(Arc::new(desc));
        Ok(id)
    }

    pub(crate) fn info(&self, id: MixinId) -> Result<Arc<MixinDescriptor>> {
        self.infos
            .get(id.index())
            .cloned()
            .ok_or(Error::UnknownMixin(id))
    }

    pub(crate) fn id_by_type(&self, key: TypeId) -> Option<MixinId> {
        self.by_type.get(&key).copied()
    }

    pub(crate) fn id_by_name(&self, name: &str) -> Option<MixinId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn contains(&self, id: MixinId) -> bool {
        id.index() < self.infos.len()
    }

    /// Appends a binding to an already registered descriptor. Composed types
    /// built before this call keep their original tables.
    pub(crate) fn append_binding(&mut self, id: MixinId, binding: MessageBinding) -> Result<()> {
        let slot = self
            .infos
            .get_mut(id.index())
            .ok_or(Error::UnknownMixin(id))?;
        Arc::make_mut(slot).bindings.push(binding);
        Ok(())
    }
}

/// Registry of message descriptors. Clone-and-swap friendly: the domain keeps
/// it behind an `ArcSwap` so dispatch reads never take a lock.
#[derive(Clone)]
pub(crate) struct MessageRegistry {
    by_name: HashMap<Box<str>, MessageId>,
    infos: Vec<Arc<MessageDescriptor>>,
}

impl MessageRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            infos: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, desc: MessageDescriptor) -> Result<MessageId> {
        if let Some(&existing) = self.by_name.get(desc.name()) {
            if self.infos[existing.index()].discipline == desc.discipline {
                return Ok(existing);
            }
            return Err(Error::IncompatibleMessage(desc.name().to_string()));
        }
        let id = MessageId(self.infos.len() as u32);
        self.by_name.insert(desc.name.clone(), id);
        log::debug!(
            "registered message '{}' (id {}, {:?})",
            desc.name(),
            id,
            desc.discipline
        );
        self.infos.push(Arc::new(desc));
        Ok(id)
    }

    pub(crate) fn info(&self, id: MessageId) -> Result<Arc<MessageDescriptor>> {
        self.infos
            .get(id.index())
            .cloned()
            .ok_or(Error::UnknownMessage(id))
    }

    pub(crate) fn id_by_name(&self, name: &str) -> Option<MessageId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.infos.len()
    }
}
