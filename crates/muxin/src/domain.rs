// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Domains: the registration scope that mixins, messages, rules and the
//! composed-type cache live in.
//!
//! ```text
//! Domain (cheaply cloneable handle)
//!   ├─ MixinRegistry    RwLock       writes at registration, reads at compose
//!   ├─ MessageRegistry  ArcSwap      lock-free snapshot reads on every send
//!   ├─ rules            ArcSwap      lock-free snapshot reads per mutation
//!   └─ TypeCache        sharded map  canonical composed types
//! ```
//!
//! Registration is expected at startup; composition and dispatch dominate
//! afterwards, so the read paths never take the write gate. Most programs
//! use the process-wide [`Domain::global`]; separate domains exist for
//! isolation (tests, plugin sandboxes) and their ids are not
//! interchangeable.

use std::any::TypeId;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use crate::alloc::{DefaultAllocator, ObjectAllocator};
use crate::compose::{build_composed, ComposedType, TypeCache};
use crate::dispatch::Next;
use crate::error::{Error, Result};
use crate::mutate::{resolve_rules, Mutation, MutationRule};
use crate::object::{Object, ObjectTypeTemplate};
use crate::registry::{
    erase_chain, erase_plain, CallDiscipline, MessageBinding, MessageDescriptor, MessageId,
    MessageRegistry, MixinDescriptor, MixinId, MixinRegistry,
};

static GLOBAL: OnceLock<Domain> = OnceLock::new();

struct DomainInner {
    mixins: RwLock<MixinRegistry>,
    messages: ArcSwap<MessageRegistry>,
    rules: ArcSwap<Vec<MutationRule>>,
    cache: TypeCache,
    default_alloc: Arc<dyn ObjectAllocator>,
    empty: Arc<ComposedType>,
    /// Serializes clone-and-swap writers of `messages` and `rules`.
    write_gate: Mutex<()>,
}

/// Handle to a registration scope. Clones share the same underlying domain.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    /// A fresh, isolated domain backed by the global Rust allocator.
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(DefaultAllocator))
    }

    /// A fresh domain whose objects default to the given allocator.
    pub fn with_allocator(alloc: Arc<dyn ObjectAllocator>) -> Self {
        Self {
            inner: Arc::new(DomainInner {
                mixins: RwLock::new(MixinRegistry::new()),
                messages: ArcSwap::from_pointee(MessageRegistry::new()),
                rules: ArcSwap::from_pointee(Vec::new()),
                cache: TypeCache::new(),
                default_alloc: alloc,
                empty: Arc::new(ComposedType::empty()),
                write_gate: Mutex::new(()),
            }),
        }
    }

    /// The process-wide domain.
    pub fn global() -> &'static Domain {
        GLOBAL.get_or_init(Domain::new)
    }

    /// Identity check; objects and templates only interoperate within one
    /// domain.
    pub(crate) fn same(&self, other: &Domain) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn empty_type(&self) -> Arc<ComposedType> {
        Arc::clone(&self.inner.empty)
    }

    /// The allocator objects of this domain get by default.
    pub fn default_allocator(&self) -> Arc<dyn ObjectAllocator> {
        Arc::clone(&self.inner.default_alloc)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a mixin descriptor and returns its id.
    ///
    /// Idempotent per kind: an identical shape under an existing name
    /// returns the existing id. Every message binding the descriptor
    /// carries is validated against the message registry first; a rejected
    /// binding leaves the registry untouched.
    pub fn register_mixin(&self, desc: MixinDescriptor) -> Result<MixinId> {
        self.validate_bindings(&desc)?;
        self.inner.mixins.write().register(desc)
    }

    fn validate_bindings(&self, desc: &MixinDescriptor) -> Result<()> {
        let messages = self.inner.messages.load();
        for (index, binding) in desc.bindings.iter().enumerate() {
            let info = messages.info(binding.message)?;
            let chained = info.discipline() == CallDiscipline::PriorityChain;
            if binding.handler.is_chain() != chained {
                return Err(Error::InvalidBinding(format!(
                    "mixin '{}' binds message '{}' ({:?}) with the wrong handler kind",
                    desc.name(),
                    info.name(),
                    info.discipline()
                )));
            }
            if desc.bindings[..index].iter().any(|b| b.message == binding.message) {
                return Err(Error::InvalidBinding(format!(
                    "mixin '{}' binds message '{}' twice",
                    desc.name(),
                    info.name()
                )));
            }
        }
        Ok(())
    }

    /// Registers a message descriptor and returns its id. Idempotent for a
    /// matching call discipline.
    pub fn register_message(&self, desc: MessageDescriptor) -> Result<MessageId> {
        let _gate = self.inner.write_gate.lock();
        let mut next = (**self.inner.messages.load()).clone();
        let id = next.register(desc)?;
        self.inner.messages.store(Arc::new(next));
        Ok(id)
    }

    /// Binds a plain entry point on an already registered mixin, for a
    /// unicast or multicast message.
    ///
    /// Composed types built before this call keep their original tables;
    /// the binding shows up in types composed afterwards.
    pub fn bind_message<T, A, R, F>(
        &self,
        mixin: MixinId,
        message: MessageId,
        priority: i32,
        f: F,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        A: std::any::Any,
        R: std::any::Any,
        F: Fn(&mut T, &mut A) -> R + Send + Sync + 'static,
    {
        let info = self.inner.messages.load().info(message)?;
        if info.discipline() == CallDiscipline::PriorityChain {
            return Err(Error::InvalidBinding(format!(
                "message '{}' is a priority chain, bind a chain handler",
                info.name()
            )));
        }
        self.append_binding::<T>(mixin, MessageBinding {
            message,
            priority,
            handler: erase_plain(f),
        })
    }

    /// Binds a chain entry point on an already registered mixin, for a
    /// priority-chain message.
    pub fn bind_chain<T, A, R, F>(
        &self,
        mixin: MixinId,
        message: MessageId,
        priority: i32,
        f: F,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        A: std::any::Any,
        R: std::any::Any,
        F: for<'a> Fn(&mut T, &mut A, Next<'a>) -> Result<R> + Send + Sync + 'static,
    {
        let info = self.inner.messages.load().info(message)?;
        if info.discipline() != CallDiscipline::PriorityChain {
            return Err(Error::InvalidBinding(format!(
                "message '{}' is {:?}, bind a plain handler",
                info.name(),
                info.discipline()
            )));
        }
        self.append_binding::<T>(mixin, MessageBinding {
            message,
            priority,
            handler: erase_chain(f),
        })
    }

    fn append_binding<T: 'static>(&self, mixin: MixinId, binding: MessageBinding) -> Result<()> {
        let mut mixins = self.inner.mixins.write();
        let info = mixins.info(mixin)?;
        if info.type_key() != Some(TypeId::of::<T>()) {
            return Err(Error::InvalidBinding(format!(
                "mixin '{}' is not backed by the bound handler's type",
                info.name()
            )));
        }
        if info.bindings.iter().any(|b| b.message == binding.message) {
            return Err(Error::InvalidBinding(format!(
                "mixin '{}' already binds this message",
                info.name()
            )));
        }
        mixins.append_binding(mixin, binding)
    }

    /// Appends a mutation rule. Every mixin id the rule refers to must
    /// already be registered. Rules apply to mutations started after this
    /// call; existing objects are not retrofitted.
    pub fn add_rule(&self, rule: MutationRule) -> Result<()> {
        {
            let mixins = self.inner.mixins.read();
            for id in rule.referenced_ids() {
                if !mixins.contains(id) {
                    return Err(Error::UnknownMixin(id));
                }
            }
        }
        let _gate = self.inner.write_gate.lock();
        let mut next = (**self.inner.rules.load()).clone();
        next.push(rule);
        self.inner.rules.store(Arc::new(next));
        Ok(())
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// The id registered for the Rust type `T`, if any.
    pub fn mixin_id_of<T: 'static>(&self) -> Option<MixinId> {
        self.mixin_id_by_key(TypeId::of::<T>())
    }

    pub(crate) fn mixin_id_by_key(&self, key: TypeId) -> Option<MixinId> {
        self.inner.mixins.read().id_by_type(key)
    }

    /// The id registered under the given mixin name, if any.
    pub fn mixin_id_by_name(&self, name: &str) -> Option<MixinId> {
        self.inner.mixins.read().id_by_name(name)
    }

    /// The id registered under the given message name, if any.
    pub fn message_id_by_name(&self, name: &str) -> Option<MessageId> {
        self.inner.messages.load().id_by_name(name)
    }

    /// Descriptor of a registered mixin.
    pub fn mixin_info(&self, id: MixinId) -> Result<Arc<MixinDescriptor>> {
        self.inner.mixins.read().info(id)
    }

    /// Descriptor of a registered message.
    pub fn message_info(&self, id: MessageId) -> Result<Arc<MessageDescriptor>> {
        self.inner.messages.load().info(id)
    }

    // ========================================================================
    // Composition
    // ========================================================================

    /// Resolves an id set to its canonical composed type. Order and
    /// duplicates in `ids` are irrelevant: any sequence naming the same set
    /// yields the same `Arc`.
    pub fn compose(&self, ids: &[MixinId]) -> Result<Arc<ComposedType>> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.is_empty() {
            return Ok(self.empty_type());
        }
        let mixins = self.inner.mixins.read();
        for &id in &sorted {
            if !mixins.contains(id) {
                return Err(Error::UnknownMixin(id));
            }
        }
        let message_count = self.inner.messages.load().len();
        self.inner
            .cache
            .resolve(&sorted, || build_composed(&sorted, &mixins, message_count))
    }

    /// Runs the rule set over a requested change and resolves the outcome
    /// to its canonical composed type.
    pub(crate) fn resolve_mutation(
        &self,
        base: &[MixinId],
        add: &[MixinId],
        remove: &[MixinId],
    ) -> Result<Arc<ComposedType>> {
        {
            let mixins = self.inner.mixins.read();
            for &id in add.iter().chain(remove) {
                if !mixins.contains(id) {
                    return Err(Error::UnknownMixin(id));
                }
            }
        }
        let mut mutation = Mutation::new(base);
        // Removals first, so a mixin both removed and added ends up added
        // (the addition is the more recent request).
        for &id in remove {
            mutation.remove(id);
        }
        for &id in add {
            mutation.add(id);
        }
        let rules = self.inner.rules.load();
        let final_ids = resolve_rules(&rules, &mut mutation)?;
        self.compose(&final_ids)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Creates an empty object using the domain's default allocator.
    pub fn create_object(&self) -> Object {
        Object::empty(self.clone(), self.default_allocator())
    }

    /// Creates an empty object served by the given allocator.
    pub fn create_object_with(&self, alloc: Arc<dyn ObjectAllocator>) -> Object {
        Object::empty(self.clone(), alloc)
    }

    /// Resolves `mixins` through the current rule set once and freezes the
    /// outcome into a reusable template.
    pub fn build_template(&self, mixins: &[MixinId]) -> Result<ObjectTypeTemplate> {
        let ty = self.resolve_mutation(&[], mixins, &[])?;
        Ok(ObjectTypeTemplate {
            domain: self.clone(),
            ty,
        })
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("messages", &self.inner.messages.load().len())
            .finish()
    }
}
