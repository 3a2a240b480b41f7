use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use railtwin::{
    GateId, GateSnapshot, GateState, SafetyVerifier, SignalId, SignalSnapshot, SignalState, StateSync,
    TrackId, TrackSnapshot, TrainId, TrainSnapshot,
};

fn make_verifier(platforms: usize) -> SafetyVerifier {
    let mut verifier = SafetyVerifier::default();

    // One signal per platform and a train every 5 minutes so the timing
    // check has real work to do.
    let tracks = (0..platforms).map(|i| TrackSnapshot::free(format!("P{i}"), 120));
    let signals = (0..platforms).map(|i| SignalSnapshot::red(format!("S{i}"), format!("P{i}")));
    #[allow(clippy::cast_precision_loss)]
    let trains = (0..platforms).map(|i| {
        let n = i as f64;
        TrainSnapshot::new(format!("T{i}"), 2.0 + n, 60.0).with_eta(300.0 * n)
    });
    verifier.sync_state(
        StateSync::new()
            .tracks(tracks)
            .signals(signals)
            .trains(trains)
            .gates([GateSnapshot::closed("G1")]),
    );
    verifier
}

// Every verdict is appended to the verifier's log, so each iteration runs
// against a fresh clone to keep the log from growing across samples.
fn bench_verify_track_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify");
    group.throughput(Throughput::Elements(1));

    for platforms in [4usize, 32] {
        let verifier = make_verifier(platforms);
        let train = TrainId::from("T_NEW");
        let track = TrackId::from("P0");
        group.bench_function(format!("track_allocation_{platforms}"), |b| {
            b.iter_batched(
                || verifier.clone(),
                |mut v| {
                    let verdict = v.verify_track_allocation(&train, &track, 150.0);
                    (v, verdict)
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_verify_signal_and_gate(c: &mut Criterion) {
    let verifier = make_verifier(16);
    let signal = SignalId::from("S3");
    let track = TrackId::from("P3");
    let gate = GateId::from("G1");

    c.bench_function("verify/signal_change", |b| {
        b.iter_batched(
            || verifier.clone(),
            |mut v| {
                let verdict = v.verify_signal_change(&signal, SignalState::Yellow, &track);
                (v, verdict)
            },
            BatchSize::SmallInput,
        );
    });
    c.bench_function("verify/gate_operation", |b| {
        b.iter_batched(
            || verifier.clone(),
            |mut v| {
                let verdict = v.verify_gate_operation(&gate, GateState::Open, 800.0);
                (v, verdict)
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_monitor(c: &mut Criterion) {
    let mut verifier = make_verifier(64);
    c.bench_function("verify/monitor_64", |b| {
        b.iter(|| verifier.monitor());
    });
}

criterion_group!(
    benches,
    bench_verify_track_allocation,
    bench_verify_signal_and_gate,
    bench_monitor
);
criterion_main!(benches);
