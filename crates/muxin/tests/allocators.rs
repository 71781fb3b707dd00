// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::module_name_repetitions)] // Test modules
#![allow(clippy::similar_names)] // Test variable naming

//! Allocator integration tests: custom object allocators see every block,
//! per-mixin allocators get out-of-line placement, lifecycle hooks fire
//! once per association, and a failed allocation aborts the mutation
//! without leaks or partial state.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use muxin::{
    DefaultAllocator, Domain, Error, MixinAllocator, MixinBuilder, MixinDescriptor, Object,
    ObjectAllocator, Result, SlotAllocator,
};

/// Delegates to the global allocator while counting every operation, so
/// tests can assert on balance and hook cardinality.
#[derive(Default)]
struct CountingAllocator {
    mixin_allocs: AtomicUsize,
    mixin_deallocs: AtomicUsize,
    block_allocs: AtomicUsize,
    block_deallocs: AtomicUsize,
    attaches: AtomicUsize,
    releases: AtomicUsize,
    fail_buffers: AtomicBool,
}

impl CountingAllocator {
    fn blocks_balanced(&self) -> bool {
        self.mixin_allocs.load(Ordering::SeqCst) == self.mixin_deallocs.load(Ordering::SeqCst)
            && self.block_allocs.load(Ordering::SeqCst)
                == self.block_deallocs.load(Ordering::SeqCst)
    }
}

impl MixinAllocator for CountingAllocator {
    fn alloc_mixin(&self, info: &MixinDescriptor) -> Result<NonNull<u8>> {
        self.mixin_allocs.fetch_add(1, Ordering::SeqCst);
        DefaultAllocator.alloc_mixin(info)
    }

    unsafe fn dealloc_mixin(&self, base: NonNull<u8>, info: &MixinDescriptor) {
        self.mixin_deallocs.fetch_add(1, Ordering::SeqCst);
        DefaultAllocator.dealloc_mixin(base, info);
    }
}

impl SlotAllocator for CountingAllocator {
    fn alloc_slots(&self, count: usize) -> Result<NonNull<u8>> {
        self.block_allocs.fetch_add(1, Ordering::SeqCst);
        DefaultAllocator.alloc_slots(count)
    }

    unsafe fn dealloc_slots(&self, ptr: NonNull<u8>, count: usize) {
        self.block_deallocs.fetch_add(1, Ordering::SeqCst);
        DefaultAllocator.dealloc_slots(ptr, count);
    }

    fn alloc_buffer(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        if self.fail_buffers.load(Ordering::SeqCst) {
            return Err(Error::AllocationFailed { size, align });
        }
        self.block_allocs.fetch_add(1, Ordering::SeqCst);
        DefaultAllocator.alloc_buffer(size, align)
    }

    unsafe fn dealloc_buffer(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        self.block_deallocs.fetch_add(1, Ordering::SeqCst);
        DefaultAllocator.dealloc_buffer(ptr, size, align);
    }
}

impl ObjectAllocator for CountingAllocator {
    fn on_attach(&self, _object: &Object) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
    }

    fn on_release(&self, _object: &Object) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default, Clone)]
struct Body {
    mass: f64,
}

#[derive(Default, Clone)]
struct Brain {
    neurons: u64,
}

fn domain_with(alloc: Arc<CountingAllocator>) -> (Domain, muxin::MixinId, muxin::MixinId) {
    let domain = Domain::with_allocator(alloc);
    let body = domain
        .register_mixin(
            MixinBuilder::<Body>::new("body")
                .default_constructible()
                .cloneable()
                .build(),
        )
        .unwrap();
    let brain = domain
        .register_mixin(
            MixinBuilder::<Brain>::new("brain")
                .default_constructible()
                .cloneable()
                .build(),
        )
        .unwrap();
    (domain, body, brain)
}

#[test]
fn object_allocator_sees_every_block_and_balances() {
    let alloc = Arc::new(CountingAllocator::default());
    let (domain, body, brain) = domain_with(Arc::clone(&alloc));
    {
        let mut object = domain.create_object();
        object.mutate(&[body], &[]).unwrap();
        object.mutate(&[brain], &[]).unwrap();
        object.mutate(&[], &[body]).unwrap();
        object.clear().unwrap();
        object.mutate(&[body, brain], &[]).unwrap();
    }
    assert!(alloc.blocks_balanced());
    assert!(alloc.block_allocs.load(Ordering::SeqCst) > 0);
}

#[test]
fn lifecycle_hooks_fire_once_per_association() {
    let alloc = Arc::new(CountingAllocator::default());
    let (domain, body, _) = domain_with(Arc::clone(&alloc));
    {
        let mut object = domain.create_object();
        object.mutate(&[body], &[]).unwrap();
        assert_eq!(alloc.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(alloc.releases.load(Ordering::SeqCst), 0);
    }
    assert_eq!(alloc.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_allocation_aborts_the_mutation_cleanly() {
    let alloc = Arc::new(CountingAllocator::default());
    let (domain, body, brain) = domain_with(Arc::clone(&alloc));
    {
        let mut object = domain.create_object();
        object.mutate(&[body], &[]).unwrap();
        object.get_mut::<Body>().unwrap().mass = 80.0;
        let before = Arc::clone(object.type_of());

        alloc.fail_buffers.store(true, Ordering::SeqCst);
        let err = object.mutate(&[brain], &[]).unwrap_err();
        assert!(matches!(err, Error::AllocationFailed { .. }));
        assert!(Arc::ptr_eq(object.type_of(), &before));
        assert_eq!(object.get::<Body>().unwrap().mass, 80.0);

        alloc.fail_buffers.store(false, Ordering::SeqCst);
        object.mutate(&[brain], &[]).unwrap();
        assert!(object.has::<Brain>());
    }
    assert!(alloc.blocks_balanced());
}

/// Mixin-level allocator: counts its buffers; instances of the mixin kind
/// carrying it are placed out-of-line.
#[derive(Default)]
struct ArenaLike {
    live: AtomicUsize,
    total: AtomicUsize,
}

impl MixinAllocator for ArenaLike {
    fn alloc_mixin(&self, info: &MixinDescriptor) -> Result<NonNull<u8>> {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        DefaultAllocator.alloc_mixin(info)
    }

    unsafe fn dealloc_mixin(&self, base: NonNull<u8>, info: &MixinDescriptor) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        DefaultAllocator.dealloc_mixin(base, info);
    }
}

#[test]
fn per_mixin_allocator_owns_its_instances() {
    let arena = Arc::new(ArenaLike::default());
    let domain = Domain::new();
    let brain = domain
        .register_mixin(
            MixinBuilder::<Brain>::new("brain")
                .default_constructible()
                .cloneable()
                .allocator(Arc::clone(&arena) as Arc<dyn MixinAllocator>)
                .build(),
        )
        .unwrap();
    let body = domain
        .register_mixin(MixinBuilder::<Body>::new("body").default_constructible().build())
        .unwrap();

    {
        let mut object = domain.create_object();
        object.mutate(&[brain], &[]).unwrap();
        assert_eq!(arena.live.load(Ordering::SeqCst), 1);
        object.get_mut::<Brain>().unwrap().neurons = 86;

        // Layout changes re-acquire the out-of-line buffer from the same
        // allocator and keep the instance state.
        object.mutate(&[body], &[]).unwrap();
        assert_eq!(arena.live.load(Ordering::SeqCst), 1);
        assert_eq!(object.get::<Brain>().unwrap().neurons, 86);
        assert!(arena.total.load(Ordering::SeqCst) >= 2);
    }
    assert_eq!(arena.live.load(Ordering::SeqCst), 0);
}

#[test]
fn clone_target_can_get_its_own_allocator() {
    struct Splitting {
        inner: CountingAllocator,
        spawned: Arc<CountingAllocator>,
    }

    impl MixinAllocator for Splitting {
        fn alloc_mixin(&self, info: &MixinDescriptor) -> Result<NonNull<u8>> {
            self.inner.alloc_mixin(info)
        }
        unsafe fn dealloc_mixin(&self, base: NonNull<u8>, info: &MixinDescriptor) {
            self.inner.dealloc_mixin(base, info);
        }
    }
    impl SlotAllocator for Splitting {
        fn alloc_slots(&self, count: usize) -> Result<NonNull<u8>> {
            self.inner.alloc_slots(count)
        }
        unsafe fn dealloc_slots(&self, ptr: NonNull<u8>, count: usize) {
            self.inner.dealloc_slots(ptr, count);
        }
        fn alloc_buffer(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
            self.inner.alloc_buffer(size, align)
        }
        unsafe fn dealloc_buffer(&self, ptr: NonNull<u8>, size: usize, align: usize) {
            self.inner.dealloc_buffer(ptr, size, align);
        }
    }
    impl ObjectAllocator for Splitting {
        fn on_copy(&self, _source: &Object) -> Option<Arc<dyn ObjectAllocator>> {
            Some(Arc::clone(&self.spawned) as Arc<dyn ObjectAllocator>)
        }
    }

    let spawned = Arc::new(CountingAllocator::default());
    let splitting = Arc::new(Splitting {
        inner: CountingAllocator::default(),
        spawned: Arc::clone(&spawned),
    });

    let domain = Domain::new();
    let body = domain
        .register_mixin(
            MixinBuilder::<Body>::new("body")
                .default_constructible()
                .cloneable()
                .build(),
        )
        .unwrap();

    let mut original = domain.create_object_with(splitting);
    original.mutate(&[body], &[]).unwrap();
    {
        let clone = original.try_clone().unwrap();
        // The clone's blocks come from the allocator the copy hook returned.
        assert_eq!(spawned.attaches.load(Ordering::SeqCst), 1);
        assert!(spawned.block_allocs.load(Ordering::SeqCst) > 0);
        assert!(clone.has::<Body>());
    }
    assert_eq!(spawned.releases.load(Ordering::SeqCst), 1);
    assert!(spawned.blocks_balanced());
}
