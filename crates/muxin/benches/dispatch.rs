// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Benches panic on failure
#![allow(clippy::items_after_statements)] // Bench helpers
#![allow(clippy::semicolon_if_nothing_returned)] // Benchmark code formatting
#![allow(clippy::similar_names)] // Bench variable naming

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use muxin::{Domain, MessageDescriptor, MessageId, MixinBuilder, Object};

#[derive(Default, Clone)]
struct Hull {
    integrity: u32,
}

#[derive(Default, Clone)]
struct Shield {
    charge: u32,
}

#[derive(Default, Clone)]
struct Engine {
    thrust: u32,
}

fn ship() -> (Object, MessageId, MessageId, MessageId) {
    let domain = Domain::new();
    let hit = domain.register_message(MessageDescriptor::unicast("hit")).unwrap();
    let tick = domain.register_message(MessageDescriptor::multicast("tick")).unwrap();
    let absorb = domain
        .register_message(MessageDescriptor::chain("absorb").with_fallback(|d: &mut u32| *d))
        .unwrap();

    let hull = domain
        .register_mixin(
            MixinBuilder::<Hull>::new("hull")
                .default_constructible()
                .message(hit, 0, |h: &mut Hull, d: &mut u32| {
                    h.integrity = h.integrity.wrapping_sub(*d);
                    h.integrity
                })
                .message(tick, 0, |h: &mut Hull, _a: &mut ()| h.integrity)
                .chained(absorb, 0, |_h: &mut Hull, d: &mut u32, next| {
                    next.call::<u32, u32>(d)
                })
                .build(),
        )
        .unwrap();
    let shield = domain
        .register_mixin(
            MixinBuilder::<Shield>::new("shield")
                .default_constructible()
                .message(tick, 5, |s: &mut Shield, _a: &mut ()| s.charge)
                .chained(absorb, 5, |s: &mut Shield, d: &mut u32, next| {
                    *d = d.wrapping_sub(s.charge.min(*d));
                    next.call::<u32, u32>(d)
                })
                .build(),
        )
        .unwrap();
    let engine = domain
        .register_mixin(
            MixinBuilder::<Engine>::new("engine")
                .default_constructible()
                .message(tick, 3, |e: &mut Engine, _a: &mut ()| e.thrust)
                .build(),
        )
        .unwrap();

    let mut object = domain.create_object();
    object.mutate(&[hull, shield, engine], &[]).unwrap();
    (object, hit, tick, absorb)
}

/// Benchmark: unicast send through the call table
/// Target: < 100 ns
fn bench_send_unicast(c: &mut Criterion) {
    let (mut ship, hit, _, _) = ship();
    c.bench_function("send_unicast", |b| {
        b.iter(|| {
            let left: u32 = ship.send_unicast(hit, black_box(&mut 3u32)).unwrap();
            black_box(left)
        })
    });
}

/// Benchmark: multicast send over three implementers
fn bench_send_multicast(c: &mut Criterion) {
    let (mut ship, _, tick, _) = ship();
    c.bench_function("send_multicast_x3", |b| {
        b.iter(|| {
            let readings: Vec<u32> = ship.send_multicast(tick, black_box(&mut ())).unwrap();
            black_box(readings)
        })
    });
}

/// Benchmark: two-deep chain delegation ending at the fallback
fn bench_send_chain(c: &mut Criterion) {
    let (mut ship, _, _, absorb) = ship();
    c.bench_function("send_chain_x2_fallback", |b| {
        b.iter(|| {
            let taken: u32 = ship.send_chain(absorb, black_box(&mut 40u32)).unwrap();
            black_box(taken)
        })
    });
}

/// Benchmark: typed access through the slot table
fn bench_typed_get(c: &mut Criterion) {
    let (ship, ..) = ship();
    c.bench_function("get_typed", |b| {
        b.iter(|| black_box(ship.get::<Shield>().unwrap().charge))
    });
}

criterion_group!(
    benches,
    bench_send_unicast,
    bench_send_multicast,
    bench_send_chain,
    bench_typed_get
);
criterion_main!(benches);
