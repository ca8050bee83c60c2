//! Benchmarks for the hot interception paths
//!
//! Compares OFF / RECORDING / REPLAYING cost of a sample, and the recorder
//! post path against store lookups.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use forensic_core::interceptor::DEFAULT_ORIGIN;
use forensic_core::{
    Event, EventKind, EventPayload, ForensicDataStore, ManualClock, ModeController,
    NondeterminismInterceptor, Phase, SampleKind, SequenceEntropy, Session, SessionEpoch,
    SessionMode,
};

fn interceptor(mode: SessionMode) -> NondeterminismInterceptor {
    let controller = Arc::new(ModeController::new());
    if mode != SessionMode::Off {
        controller.transition(mode).unwrap();
    }
    NondeterminismInterceptor::new(
        controller,
        Arc::new(ManualClock::new(0.0)),
        Arc::new(SequenceEntropy::new([0.25, 0.5, 0.75])),
    )
}

// =============================================================================
// Interceptor
// =============================================================================

fn bench_sample_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_random");

    group.bench_function(BenchmarkId::new("off", "live"), |b| {
        let interceptor = interceptor(SessionMode::Off);
        b.iter(|| black_box(interceptor.sample_random()))
    });

    group.bench_function(BenchmarkId::new("recording", "capture"), |b| {
        let interceptor = interceptor(SessionMode::Recording);
        b.iter(|| {
            let value = interceptor.sample_random();
            if interceptor.pending_count() > 10_000 {
                interceptor.dump_and_clear();
            }
            black_box(value)
        })
    });

    group.bench_function(BenchmarkId::new("replaying", "stream"), |b| {
        let interceptor = interceptor(SessionMode::Replaying);
        interceptor.load(DEFAULT_ORIGIN, SampleKind::Random, vec![0.5; 1024]);
        b.iter(|| {
            let value = interceptor.sample_random();
            if value < 0.0 {
                interceptor.rewind();
            }
            black_box(value)
        })
    });

    group.finish();
}

fn bench_clock_extrapolation(c: &mut Criterion) {
    c.bench_function("sample_clock_exhausted", |b| {
        let interceptor = interceptor(SessionMode::Replaying);
        interceptor.start_replay();
        b.iter(|| black_box(interceptor.sample_clock()))
    });
}

// =============================================================================
// Store
// =============================================================================

fn bench_store_insert_next(c: &mut Criterion) {
    c.bench_function("store_insert_then_next_1000", |b| {
        b.iter(|| {
            let store = ForensicDataStore::new(Arc::new(SessionEpoch::new()));
            for seq in 0..1000 {
                store.insert(Event::new(
                    "F1",
                    seq,
                    seq as f64,
                    EventPayload::TimerLifecycle {
                        timer_id: seq,
                        phase: Phase::Begin,
                    },
                ));
            }
            let mut consumed = 0;
            while store.next("F1", EventKind::TimerLifecycle).is_some() {
                consumed += 1;
            }
            black_box(consumed)
        })
    });
}

// =============================================================================
// Recorder
// =============================================================================

fn bench_recorder_post(c: &mut Criterion) {
    let session = Session::new().unwrap();
    session.enable();
    session.start_record().unwrap();

    c.bench_function("recorder_timer_event", |b| {
        let mut id = 0;
        b.iter(|| {
            id += 1;
            black_box(session.recorder().timer_event("F1", id, Phase::Begin))
        })
    });

    session.stop_record().unwrap();

    c.bench_function("recorder_off_noop", |b| {
        let recorder = session.recorder();
        b.iter(|| black_box(recorder.navigation("F1", "https://example.test/")))
    });
}

criterion_group!(
    benches,
    bench_sample_random,
    bench_clock_extrapolation,
    bench_store_insert_next,
    bench_recorder_post,
);
criterion_main!(benches);
