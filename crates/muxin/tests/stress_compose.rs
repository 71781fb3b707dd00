// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::similar_names)] // Test variable naming

//! Randomized mutation stress: long add/remove sequences against a mirror
//! model, canonical-type identity under concurrency, and construct/drop
//! balance across the whole run.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use muxin::{Domain, MixinBuilder, MixinId};

static TRACER_BORN: AtomicUsize = AtomicUsize::new(0);
static TRACER_DIED: AtomicUsize = AtomicUsize::new(0);

/// Counts constructions and drops so the run can prove nothing leaks and
/// nothing is destroyed twice.
struct Tracer {
    #[allow(dead_code)]
    payload: Vec<u8>,
}

impl Default for Tracer {
    fn default() -> Self {
        TRACER_BORN.fetch_add(1, Ordering::SeqCst);
        Self {
            payload: vec![0xAB; 24],
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        TRACER_DIED.fetch_add(1, Ordering::SeqCst);
    }
}

// A spread of sizes and alignments so random sets exercise the packing.
#[derive(Default, Clone)]
struct Tiny(#[allow(dead_code)] u8);
#[derive(Default, Clone)]
struct Small(#[allow(dead_code)] u16);
#[derive(Default, Clone)]
struct Mid(u32);
#[derive(Default, Clone)]
struct Wide(#[allow(dead_code)] u64);
#[derive(Default, Clone)]
struct Huge(#[allow(dead_code)] u128);
#[derive(Default, Clone)]
struct Odd(#[allow(dead_code)] [u8; 3]);
#[derive(Default, Clone)]
struct Heap(#[allow(dead_code)] String);

fn pool(domain: &Domain) -> Vec<MixinId> {
    vec![
        domain
            .register_mixin(MixinBuilder::<Tiny>::new("tiny").default_constructible().build())
            .unwrap(),
        domain
            .register_mixin(MixinBuilder::<Small>::new("small").default_constructible().build())
            .unwrap(),
        domain
            .register_mixin(MixinBuilder::<Mid>::new("mid").default_constructible().build())
            .unwrap(),
        domain
            .register_mixin(MixinBuilder::<Wide>::new("wide").default_constructible().build())
            .unwrap(),
        domain
            .register_mixin(MixinBuilder::<Huge>::new("huge").default_constructible().build())
            .unwrap(),
        domain
            .register_mixin(MixinBuilder::<Odd>::new("odd").default_constructible().build())
            .unwrap(),
        domain
            .register_mixin(MixinBuilder::<Heap>::new("heap").default_constructible().build())
            .unwrap(),
        domain
            .register_mixin(MixinBuilder::<Tracer>::new("tracer").default_constructible().build())
            .unwrap(),
    ]
}

#[test]
fn random_mutations_track_the_mirror_model() {
    let mut rng = fastrand::Rng::with_seed(0x6d75_7869_6e01);
    let domain = Domain::new();
    let pool = pool(&domain);

    let born_before = TRACER_BORN.load(Ordering::SeqCst);
    {
        let mut object = domain.create_object();
        let mut mirror: BTreeSet<MixinId> = BTreeSet::new();
        let mut sentinel: Option<u32> = None;

        for step in 0..300u32 {
            let mut add = Vec::new();
            let mut remove = Vec::new();
            for &id in &pool {
                match rng.u8(0..6) {
                    0 => add.push(id),
                    1 => remove.push(id),
                    _ => {}
                }
            }
            object.mutate(&add, &remove).unwrap();
            for id in remove {
                mirror.remove(&id);
            }
            mirror.extend(add);

            let expected: Vec<MixinId> = mirror.iter().copied().collect();
            assert_eq!(object.mixin_ids(), expected.as_slice(), "step {}", step);

            // Canonical identity: resolving the mirror set independently
            // lands on the very same type.
            let composed = domain.compose(&expected).unwrap();
            assert!(Arc::ptr_eq(object.type_of(), &composed), "step {}", step);

            // State integrity: a sentinel written into one mixin survives
            // every relocation until that mixin is dropped.
            match (object.get_mut::<Mid>(), sentinel) {
                (Some(mid), Some(value)) => assert_eq!(mid.0, value, "step {}", step),
                (Some(mid), None) => {
                    mid.0 = step;
                    sentinel = Some(step);
                }
                (None, _) => sentinel = None,
            }
        }
    }
    // Every construction of the traced mixin was matched by exactly one
    // drop once the object is gone.
    let born = TRACER_BORN.load(Ordering::SeqCst) - born_before;
    assert!(born > 0);
    assert_eq!(TRACER_DIED.load(Ordering::SeqCst), TRACER_BORN.load(Ordering::SeqCst));
}

#[test]
fn concurrent_composition_yields_one_canonical_type() {
    let domain = Domain::new();
    let pool = pool(&domain);
    let target: Vec<MixinId> = pool.iter().copied().step_by(2).collect();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let domain = domain.clone();
        let target = target.clone();
        handles.push(std::thread::spawn(move || {
            let mut object = domain.create_object();
            object.mutate(&target, &[]).unwrap();
            Arc::as_ptr(object.type_of()) as usize
        }));
    }
    let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(addresses.windows(2).all(|w| w[0] == w[1]));
}
