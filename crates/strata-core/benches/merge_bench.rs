//! Merge path benchmarks
//!
//! Measures sequencing and planning throughput over synthetic change
//! batches with out-of-order arrivals.
//!
//! Run with: cargo bench --bench merge_bench

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use strata_core::event::{ChangeEvent, ChangeOp, Key, Row, SequenceNumber, SourceOffset};
use strata_core::plan::MergePlanner;
use strata_core::sequence::Sequencer;
use strata_core::state::KeyState;
use strata_core::MergeConfig;

/// Build a batch of `keys * events_per_key` upserts, round-robin across
/// keys, with every other key's changes delivered in reverse order.
fn batch(keys: usize, events_per_key: usize) -> Vec<ChangeEvent> {
    let mut events = Vec::with_capacity(keys * events_per_key);
    let mut offset = 0u64;
    for step in 0..events_per_key {
        for key in 0..keys {
            let position = if key % 2 == 0 {
                step
            } else {
                events_per_key - 1 - step
            };
            offset += 1;
            events.push(ChangeEvent {
                key: Key::new(format!("key:{key:06}")),
                sequence: SequenceNumber((position as i64 + 1) * 10),
                op: ChangeOp::Upsert,
                payload: Row::new()
                    .with("name", serde_json::json!(format!("supplier-{key}")))
                    .with("revision", serde_json::json!(position)),
                source_offset: SourceOffset(offset),
            });
        }
    }
    events
}

fn bench_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence");
    for keys in [16usize, 256, 4096] {
        let events = batch(keys, 8);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(keys), &events, |b, events| {
            let sequencer = Sequencer::default();
            b.iter(|| {
                let sequenced = sequencer
                    .sequence(black_box(events.clone()))
                    .expect("no collisions in synthetic batch");
                black_box(sequenced)
            });
        });
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    for (name, config) in [
        ("overwrite", MergeConfig::overwrite()),
        ("history", MergeConfig::history()),
    ] {
        let sequenced = Sequencer::default()
            .sequence(batch(256, 8))
            .expect("no collisions in synthetic batch");
        group.throughput(Throughput::Elements(sequenced.event_count() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &sequenced,
            |b, sequenced| {
                let planner = MergePlanner::new(config);
                b.iter(|| {
                    for transitions in &sequenced.keys {
                        let state = KeyState::untouched(transitions.key.clone());
                        black_box(planner.plan(transitions, &state));
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_sequence, bench_plan);
criterion_main!(benches);
