//! Benchmarks for appends and fetches against the `PostgreSQL` backend.
//!
//! These benchmarks require Docker to be running and will spin up a `PostgreSQL`
//! container using testcontainers.
//!
//! Run with: `cargo bench -p chronicle-postgres`

use std::sync::OnceLock;

use chronicle_core::{
    event::{DomainEvent, PayloadShape},
    event_set,
    identity::{StreamId, StreamIdentity},
    projection::Aggregate,
    store::{Store as EventStore, StoreOptions},
};
use chronicle_postgres::Store;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::runtime::Runtime;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LedgerOpened {
    owner: String,
}

impl DomainEvent for LedgerOpened {
    const KIND: &'static str = "ledger_opened";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EntryPosted {
    amount: i64,
    memo: String,
}

impl DomainEvent for EntryPosted {
    const KIND: &'static str = "entry_posted";
}

event_set! {
    #[derive(Clone, Debug)]
    enum LedgerEvent {
        Opened(LedgerOpened),
        Posted(EntryPosted),
    }
}

#[derive(Default, Serialize, Deserialize)]
struct Balance {
    total: i64,
}

impl Aggregate<LedgerEvent> for Balance {
    const KIND: &'static str = "balance";

    fn stream_starters() -> Vec<PayloadShape> {
        vec![PayloadShape::of::<LedgerOpened>()]
    }

    fn apply(&mut self, event: &LedgerEvent) {
        if let LedgerEvent::Posted(posted) = event {
            self.total += posted.amount;
        }
    }
}

type BenchStore = EventStore<Store, LedgerEvent>;

/// Shared test database for benchmarks (to avoid spinning up containers per benchmark)
struct BenchDb {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

static BENCH_DB: OnceLock<BenchDb> = OnceLock::new();

fn get_runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| Runtime::new().expect("Failed to create Tokio runtime"))
}

fn get_bench_db() -> &'static BenchDb {
    BENCH_DB.get_or_init(|| {
        get_runtime().block_on(async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string = format!("postgres://postgres:postgres@{host}:{port}/postgres");
            let pool = PgPool::connect(&connection_string).await.unwrap();

            Store::new(pool.clone(), StreamIdentity::AsUuid)
                .migrate()
                .await
                .unwrap();

            BenchDb {
                _container: container,
                pool,
            }
        })
    })
}

fn bench_store() -> BenchStore {
    let options = StoreOptions::<LedgerEvent>::builder()
        .event_types_from_set()
        .unwrap()
        .inline_projection::<Balance>()
        .unwrap()
        .build();
    EventStore::new(
        Store::new(get_bench_db().pool.clone(), StreamIdentity::AsUuid),
        options,
    )
}

fn opened() -> LedgerEvent {
    LedgerOpened {
        owner: "bench".to_owned(),
    }
    .into()
}

fn posted(amount: i64) -> LedgerEvent {
    EntryPosted {
        amount,
        memo: "x".repeat(64),
    }
    .into()
}

async fn seeded_stream(store: &BenchStore, events: usize) -> StreamId {
    let batch = std::iter::once(opened()).chain((1..events).map(|i| posted(i as i64)));
    store.session().start_stream(None, batch).await.unwrap().id
}

fn bench_start_stream(c: &mut Criterion) {
    let rt = get_runtime();
    let store = bench_store();

    let mut group = c.benchmark_group("start_stream");
    group.throughput(Throughput::Elements(1));

    group.bench_function("projected_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .session()
                    .start_stream(None, [opened()])
                    .await
                    .unwrap()
            })
        });
    });

    group.bench_function("untagged_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .session()
                    .start_stream(None, [posted(1)])
                    .await
                    .unwrap()
            })
        });
    });

    group.finish();
}

fn bench_append(c: &mut Criterion) {
    let rt = get_runtime();
    let store = bench_store();

    let mut group = c.benchmark_group("append");

    for batch in [1u64, 10, 100] {
        group.throughput(Throughput::Elements(batch));

        group.bench_function(format!("expected_version_batch_{batch}"), |b| {
            let id = rt.block_on(seeded_stream(&store, 1));
            let mut version = 1;
            b.iter(|| {
                let events = (0..batch).map(|i| posted(i as i64));
                let handle = rt.block_on(async {
                    store
                        .session()
                        .append(&id, Some(version), events)
                        .await
                        .unwrap()
                });
                version = handle.version;
            });
        });
    }

    group.finish();
}

fn bench_fetch(c: &mut Criterion) {
    let rt = get_runtime();
    let store = bench_store();

    let mut group = c.benchmark_group("fetch");

    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        let id = rt.block_on(seeded_stream(&store, size));

        group.bench_function(format!("fetch_stream_{size}"), |b| {
            b.iter(|| rt.block_on(async { store.fetch_stream(&id).await.unwrap() }));
        });

        group.bench_function(format!("aggregate_stream_{size}"), |b| {
            b.iter(|| rt.block_on(async { store.aggregate_stream::<Balance>(&id).await.unwrap() }));
        });

        group.bench_function(format!("load_aggregate_{size}"), |b| {
            b.iter(|| rt.block_on(async { store.load_aggregate::<Balance>(&id).await.unwrap() }));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_start_stream, bench_append, bench_fetch);
criterion_main!(benches);
