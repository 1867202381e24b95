use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pool::config::PaymentConfig;
use pool::ledger::ShareLedger;
use pool::payment::{PaymentProcessor, PaymentStrategy};
use pool::registry::FarmerRegistry;
use pool::{bridge::MemoryBridge, Farmer, LauncherId};
use pprof::criterion::{Output, PProfProfiler};
use rand::{Rng, RngCore};

fn setup(strategy: PaymentStrategy, farmers: usize) -> (PaymentProcessor, Vec<Farmer>) {
    let bridge = Arc::new(MemoryBridge::new());
    let registry = Arc::new(FarmerRegistry::new(bridge.clone()));
    let ledger = Arc::new(ShareLedger::new(Duration::from_secs(24 * 60 * 60)));
    let cfg = PaymentConfig {
        strategy,
        min_payout: 1,
        ..Default::default()
    };

    let mut rng = rand::thread_rng();
    let farmers: Vec<_> = (0..farmers)
        .map(|_| {
            let mut id = [0u8; 32];
            rng.fill_bytes(&mut id);
            let mut farmer = Farmer::new(LauncherId::new(id), "bench", 1000);
            farmer.points = rng.gen_range(1000..1_000_000);
            for _ in 0..10 {
                ledger.record(farmer.launcher_id, farmer.points / 10);
            }
            farmer
        })
        .collect();

    let processor = PaymentProcessor::new(&cfg, registry, bridge, ledger);
    (processor, farmers)
}

fn bench_total_payouts(c: &mut Criterion) {
    let mut group = c.benchmark_group("calculate_total_payouts");
    for strategy in [PaymentStrategy::Pps, PaymentStrategy::Pplns] {
        for farmers in [100, 10_000] {
            let (processor, farmers) = setup(strategy, farmers);
            let total: u64 = farmers.iter().map(|f| f.points).sum();
            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), farmers.len()),
                &farmers,
                |b, farmers| {
                    b.iter(|| {
                        processor.calculate_total_payouts(
                            farmers,
                            total,
                            black_box(1_750_000_000_000),
                        )
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_pplns_window(c: &mut Criterion) {
    let ledger = ShareLedger::new(Duration::from_secs(24 * 60 * 60));
    let mut rng = rand::thread_rng();
    let ids: Vec<_> = (0..1000)
        .map(|_| {
            let mut id = [0u8; 32];
            rng.fill_bytes(&mut id);
            LauncherId::new(id)
        })
        .collect();
    for i in 0..100_000 {
        ledger.record(ids[i % ids.len()], rng.gen_range(1..10_000));
    }

    c.bench_function("ledger_window", |b| {
        b.iter(|| ledger.window(black_box(50_000_000)))
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(1000, Output::Flamegraph(None)));
    targets=bench_total_payouts,bench_pplns_window
);

criterion_main!(benches);
