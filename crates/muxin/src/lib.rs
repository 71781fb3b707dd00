// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Muxin - Runtime object composition
//!
//! A pure Rust engine for building objects out of mixins at runtime:
//! components are added and removed on live objects, every distinct
//! combination resolves to one canonical composed type, and behavior is
//! invoked through messages dispatched over precomputed call tables.
//!
//! ## Quick Start
//!
//! ```rust
//! use muxin::{Domain, MessageDescriptor, MixinBuilder, Result};
//!
//! #[derive(Default, Clone)]
//! struct Health { points: u32 }
//!
//! #[derive(Default, Clone)]
//! struct Armor { rating: u32 }
//!
//! fn main() -> Result<()> {
//!     let domain = Domain::new();
//!     let damage = domain.register_message(MessageDescriptor::multicast("damage"))?;
//!
//!     let health = domain.register_mixin(
//!         MixinBuilder::<Health>::new("health")
//!             .default_constructible()
//!             .cloneable()
//!             .message(damage, 0, |h: &mut Health, amount: &mut u32| {
//!                 h.points = h.points.saturating_sub(*amount);
//!                 h.points
//!             })
//!             .build(),
//!     )?;
//!     let armor = domain.register_mixin(
//!         MixinBuilder::<Armor>::new("armor").default_constructible().build(),
//!     )?;
//!
//!     // Compose an object and talk to it.
//!     let mut hero = domain.create_object();
//!     hero.mutate(&[health, armor], &[])?;
//!     hero.get_mut::<Health>().unwrap().points = 100;
//!
//!     let remaining: Vec<u32> = hero.send_multicast(damage, &mut 30u32)?;
//!     assert_eq!(remaining, vec![70]);
//!
//!     // Recompose in place; surviving mixins keep their state.
//!     hero.mutate(&[], &[armor])?;
//!     assert_eq!(hero.get::<Health>().unwrap().points, 70);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                             Objects                                 |
//! |   Object (buffer + slot table) | ObjectTypeTemplate | send_* API    |
//! +---------------------------------------------------------------------+
//! |                            Composition                              |
//! |   Mutation + rules fixpoint | ComposedType cache | call tables      |
//! +---------------------------------------------------------------------+
//! |                            Registration                             |
//! |   Domain | MixinBuilder / MessageDescriptor | dense ids             |
//! +---------------------------------------------------------------------+
//! |                              Memory                                 |
//! |   MixinAllocator / SlotAllocator / ObjectAllocator tiers            |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Domain`] | Registration scope; factory for objects and templates |
//! | [`Object`] | A runtime-composed object, mutable in place |
//! | [`MixinBuilder`] | Captures a Rust type as a registerable mixin kind |
//! | [`MessageDescriptor`] | A named message with a call discipline |
//! | [`MutationRule`] | Constraint applied to every mutation (fixpoint) |
//! | [`ComposedType`] | Canonical layout + dispatch record for one mixin set |
//!
//! ## Dispatch disciplines
//!
//! - **Unicast**: the highest-priority implementer answers.
//! - **Multicast**: every implementer answers, results in call order.
//! - **Priority chain**: implementers cooperate through [`Next`].
//!
//! Per-send cost is a table walk over the object's composed type; it does
//! not depend on how many mutations produced that type.

/// Pluggable memory providers (mixin buffers, slot tables, lifecycle hooks).
pub mod alloc;
/// Canonical composed types and the cache guaranteeing their identity.
pub mod compose;
/// Message dispatch over precomputed call tables.
pub mod dispatch;
/// Domains: registration scope for mixins, messages and rules.
pub mod domain;
/// Error types for composition, mutation and dispatch operations.
pub mod error;
/// Mutation values and the rule engine.
pub mod mutate;
/// Composed objects and type templates.
pub mod object;
/// Mixin and message descriptors, builders and registries.
pub mod registry;

pub use alloc::{
    mem_size_for_mixin, mixin_offset, DefaultAllocator, MixinAllocator, ObjectAllocator,
    SlotAllocator, SLOT_SIZE,
};
pub use compose::ComposedType;
pub use dispatch::Next;
pub use domain::Domain;
pub use error::{Error, Result};
pub use mutate::{Mutation, MutationRule, MutationRuleHook};
pub use object::{Object, ObjectTypeTemplate};
pub use registry::{
    CallDiscipline, ConstructFn, CopyFn, DestroyFn, LifecycleOps, MessageDescriptor, MessageId,
    MixinBuilder, MixinDescriptor, MixinId, MoveFn,
};

/// Muxin version string.
pub const VERSION: &str = "0.4.2";
