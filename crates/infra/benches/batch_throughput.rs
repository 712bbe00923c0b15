use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};

use std::sync::Arc;

use airdrop_core::{AirdropStatus, Recipient, WalletAddress};
use airdrop_infra::jobs::BatchProcessor;
use airdrop_infra::mint::ScriptedMinter;
use airdrop_infra::recipients::{InMemoryRecipientStore, RecipientStore};
use chrono::Utc;

fn seeded_store(pending: usize) -> InMemoryRecipientStore {
    let store = InMemoryRecipientStore::new();
    for i in 0..pending {
        let mut r = Recipient::register(
            WalletAddress::parse(format!("0xbench{i}")).unwrap(),
            Utc::now(),
        );
        r.airdrop_status = AirdropStatus::Pending;
        store.seed(r).unwrap();
    }
    store
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// One full batch through the in-memory store and an instant minter.
fn bench_run_batch(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("run_batch");

    for batch_size in [1usize, 20, 200].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("in_memory", batch_size),
            batch_size,
            |b, &size| {
                let minter = Arc::new(ScriptedMinter::default());
                b.iter_batched(
                    || Arc::new(seeded_store(size)),
                    |store| {
                        let processor = BatchProcessor::new(store, Arc::clone(&minter));
                        black_box(rt.block_on(processor.run_batch(size)))
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

/// Claim latency when most rows are already terminal.
fn bench_claim_with_terminal_backlog(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("claim_one_pending");

    for backlog in [100usize, 10_000].iter() {
        let store = InMemoryRecipientStore::new();
        for i in 0..*backlog {
            let mut r = Recipient::register(
                WalletAddress::parse(format!("0xdone{i}")).unwrap(),
                Utc::now(),
            );
            r.airdrop_status = AirdropStatus::Error;
            store.seed(r).unwrap();
        }
        let mut pending = Recipient::register(WalletAddress::parse("0xlast").unwrap(), Utc::now());
        pending.airdrop_status = AirdropStatus::Pending;
        store.seed(pending).unwrap();

        group.bench_with_input(BenchmarkId::new("backlog", backlog), backlog, |b, _| {
            b.iter(|| {
                let claim = rt.block_on(store.claim_one_pending(&[])).unwrap();
                black_box(claim.is_some())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_run_batch, bench_claim_with_terminal_backlog);
criterion_main!(benches);
