// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Canonical composed types and the cache that guarantees their identity.
//!
//! A [`ComposedType`] is the shared, immutable record for one exact mixin-id
//! set: the packed buffer layout plus one precomputed call table per message
//! any member implements. Two mutations producing the same final id set
//! resolve to the same `Arc` (pointer identity), so dispatch-table reuse and
//! type-equality checks are O(1).
//!
//! # Thread safety
//!
//! The cache is a sharded map; candidates are built outside any lock and
//! inserted first-writer-wins, losers discard their candidate and adopt the
//! winner. Once published, a composed type never changes.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::alloc::next_multiple;
use crate::error::{Error, Result};
use crate::registry::{Handler, MessageId, MixinDescriptor, MixinId, MixinRegistry};

/// Where a mixin's instance lives relative to its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// At a fixed offset inside the object's packed instance buffer.
    Inline { offset: usize },
    /// In a buffer obtained from the mixin's custom allocator.
    OutOfLine,
}

/// Per-slot layout record; slot order is ascending mixin id.
pub(crate) struct SlotLayout {
    pub(crate) id: MixinId,
    pub(crate) info: Arc<MixinDescriptor>,
    pub(crate) placement: Placement,
}

/// One entry of a message call table.
pub(crate) struct CallEntry {
    pub(crate) slot: usize,
    pub(crate) priority: i32,
    pub(crate) mixin: MixinId,
    pub(crate) handler: Handler,
}

/// Precomputed implementer list for one message, ordered by descending
/// priority, ties by ascending mixin registration order.
pub(crate) struct CallTable {
    pub(crate) entries: Box<[CallEntry]>,
}

/// Canonical layout + dispatch record for one exact mixin-id set.
pub struct ComposedType {
    ids: Box<[MixinId]>,
    slots: Box<[SlotLayout]>,
    buffer_size: usize,
    buffer_align: usize,
    /// Slot indices in destruction order: ascending buffer offset, then
    /// out-of-line slots by id.
    drop_order: Box<[u32]>,
    /// Indexed by message id; `None` where no member implements the message.
    tables: Box<[Option<CallTable>]>,
}

impl ComposedType {
    pub(crate) fn empty() -> Self {
        Self {
            ids: Box::new([]),
            slots: Box::new([]),
            buffer_size: 0,
            buffer_align: 1,
            drop_order: Box::new([]),
            tables: Box::new([]),
        }
    }

    /// The sorted, deduplicated mixin ids this type is composed of.
    pub fn mixin_ids(&self) -> &[MixinId] {
        &self.ids
    }

    /// Number of mixins.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True for the empty composition.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the given mixin participates in this type.
    pub fn contains(&self, id: MixinId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Whether any member implements the given message.
    pub fn implements(&self, message: MessageId) -> bool {
        self.table(message).is_some()
    }

    /// Required instance-buffer size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Required instance-buffer alignment in bytes.
    pub fn buffer_align(&self) -> usize {
        self.buffer_align
    }

    pub(crate) fn slot_of(&self, id: MixinId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    pub(crate) fn slots(&self) -> &[SlotLayout] {
        &self.slots
    }

    pub(crate) fn drop_order(&self) -> &[u32] {
        &self.drop_order
    }

    pub(crate) fn table(&self, message: MessageId) -> Option<&CallTable> {
        self.tables.get(message.index()).and_then(Option::as_ref)
    }
}

impl std::fmt::Debug for ComposedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedType")
            .field("ids", &self.ids)
            .field("buffer_size", &self.buffer_size)
            .field("buffer_align", &self.buffer_align)
            .finish()
    }
}

/// Builds the layout and call tables for a sorted, deduplicated id set.
///
/// Offset policy: descending alignment, ties ascending id, which keeps
/// padding minimal. Mixins with a custom allocator are placed out-of-line;
/// their slot carries no buffer offset.
pub(crate) fn build_composed(
    ids: &[MixinId],
    mixins: &MixinRegistry,
    message_count: usize,
) -> Result<ComposedType> {
    debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids must be sorted unique");

    let mut slots = Vec::with_capacity(ids.len());
    for &id in ids {
        let info = mixins.info(id)?;
        let placement = if info.allocator().is_some() {
            Placement::OutOfLine
        } else {
            Placement::Inline { offset: 0 }
        };
        slots.push(SlotLayout { id, info, placement });
    }

    // Offset assignment over the inline slots.
    let mut order: Vec<usize> = (0..slots.len())
        .filter(|&i| matches!(slots[i].placement, Placement::Inline { .. }))
        .collect();
    order.sort_by(|&a, &b| {
        slots[b]
            .info
            .align()
            .cmp(&slots[a].info.align())
            .then(slots[a].id.cmp(&slots[b].id))
    });

    let mut cursor = 0usize;
    let mut buffer_align = 1usize;
    for &i in &order {
        let (size, align) = (slots[i].info.size(), slots[i].info.align());
        buffer_align = buffer_align.max(align);
        cursor = next_multiple(cursor, align);
        slots[i].placement = Placement::Inline { offset: cursor };
        cursor += size;
    }
    // Zero-sized mixins still get a live, non-null address.
    let buffer_size = if !order.is_empty() && cursor == 0 { 1 } else { cursor };

    let mut drop_order: Vec<u32> = (0..slots.len() as u32).collect();
    drop_order.sort_by_key(|&i| match slots[i as usize].placement {
        Placement::Inline { offset } => (0usize, offset),
        Placement::OutOfLine => (1usize, slots[i as usize].id.index()),
    });

    // Call tables: collect every binding, group per message, order by
    // priority descending then mixin registration order.
    let mut tables: Vec<Option<Vec<CallEntry>>> = Vec::new();
    tables.resize_with(message_count, || None);
    for (slot, layout) in slots.iter().enumerate() {
        for binding in &layout.info.bindings {
            let entry = CallEntry {
                slot,
                priority: binding.priority,
                mixin: layout.id,
                handler: binding.handler.clone(),
            };
            match tables.get_mut(binding.message.index()) {
                Some(bucket) => bucket.get_or_insert_with(Vec::new).push(entry),
                None => return Err(Error::UnknownMessage(binding.message)),
            }
        }
    }
    let tables: Box<[Option<CallTable>]> = tables
        .into_iter()
        .map(|bucket| {
            bucket.map(|mut entries| {
                entries.sort_by(|a, b| {
                    b.priority.cmp(&a.priority).then(a.mixin.cmp(&b.mixin))
                });
                CallTable {
                    entries: entries.into_boxed_slice(),
                }
            })
        })
        .collect();

    log::debug!(
        "built composed type for {:?}: {} bytes, align {}",
        ids,
        buffer_size,
        buffer_align
    );

    Ok(ComposedType {
        ids: ids.into(),
        slots: slots.into_boxed_slice(),
        buffer_size,
        buffer_align,
        drop_order: drop_order.into_boxed_slice(),
        tables,
    })
}

/// The canonicalizer: maps a normalized id set to its shared composed type.
pub(crate) struct TypeCache {
    map: DashMap<Box<[MixinId]>, Arc<ComposedType>>,
}

impl TypeCache {
    pub(crate) fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Resolves `ids` to the canonical composed type, building it with
    /// `build` on a miss. Concurrent resolution of the same id sequence
    /// yields one instance: first writer wins.
    pub(crate) fn resolve(
        &self,
        ids: &[MixinId],
        build: impl FnOnce() -> Result<ComposedType>,
    ) -> Result<Arc<ComposedType>> {
        if let Some(existing) = self.map.get(ids) {
            return Ok(Arc::clone(&existing));
        }
        // Build outside the map lock; the entry below decides who won.
        let candidate = Arc::new(build()?);
        match self.map.entry(ids.into()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&candidate));
                Ok(candidate)
            }
        }
    }
}
