use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lowmesh_core::constants::UNKNOWN_PATH_COST;
use lowmesh_core::{ExtAddr, ManyToOne, ShortAddr};
use lowmesh_nwk::config::EvictionPolicy;
use lowmesh_nwk::discovery::{DiscoveryEntry, DiscoveryTable, DiscoveryTarget};
use lowmesh_nwk::neighbor::{Neighbor, NeighborArena, NeighborSlot, NeighborTable, Relationship};
use lowmesh_nwk::passive_ack::PassiveAckTracker;
use lowmesh_nwk::route_record::SourceRouteCache;
use lowmesh_nwk::transport::TxHandle;

fn make_entry(initiator: u16, id: u8, now: u64) -> DiscoveryEntry {
    DiscoveryEntry {
        initiator: ShortAddr(initiator),
        id,
        sender: ShortAddr(0x0001),
        forward_cost: 3,
        residual_cost: UNKNOWN_PATH_COST,
        many_to_one: ManyToOne::None,
        target: DiscoveryTarget::Device(ShortAddr(0x0999)),
        created_at: now,
        expires_at: now + 10_000,
    }
}

fn bench_discovery_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("discovery_table");

    for size in [8usize, 32, 64] {
        let mut table = DiscoveryTable::new(size, EvictionPolicy::OldestFirst);
        for i in 0..size {
            table.insert(make_entry(i as u16 + 1, 1, 0), 0).unwrap();
        }
        group.bench_with_input(BenchmarkId::new("lookup_miss", size), &table, |b, t| {
            b.iter(|| t.get(ShortAddr(0xBEEF), 9));
        });
    }

    group.bench_function("insert_with_eviction", |b| {
        b.iter_custom(|iters| {
            let mut table = DiscoveryTable::new(16, EvictionPolicy::OldestFirst);
            let start = std::time::Instant::now();
            for i in 0..iters {
                let _ = table.insert(make_entry((i % 4096) as u16 + 1, i as u8, i), i);
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_passive_ack(c: &mut Criterion) {
    let mut group = c.benchmark_group("passive_ack");

    group.bench_function("track_observe_release", |b| {
        let mut tracker = PassiveAckTracker::new(16, 2, 500);
        let expected = (1u64 << 32) - 1;
        let mut n = 0u32;
        b.iter(|| {
            n = n.wrapping_add(1);
            let handle = TxHandle(n);
            let seq = n as u8;
            tracker
                .begin_tracking(handle, ShortAddr(0x0001), seq, expected, 0)
                .unwrap();
            for slot in 0..32u8 {
                tracker.observed_relay(NeighborSlot(slot), ShortAddr(0x0001), seq);
            }
            tracker.release(handle)
        });
    });

    group.bench_function("poll_full_table", |b| {
        let mut tracker = PassiveAckTracker::new(64, u8::MAX, 1);
        for i in 0..64u32 {
            tracker
                .begin_tracking(TxHandle(i + 1), ShortAddr(0x0001), i as u8, u64::MAX, 0)
                .unwrap();
        }
        let mut now = 0;
        b.iter(|| {
            now += 1;
            tracker.poll(now)
        });
    });

    group.finish();
}

fn bench_neighbors(c: &mut Criterion) {
    let mut group = c.benchmark_group("neighbors");
    let mut table = NeighborArena::new(64);
    for i in 0..64u16 {
        let rel = if i % 3 == 0 { Relationship::Child } else { Relationship::Sibling };
        table
            .upsert(Neighbor::router(ShortAddr(i + 1), rel, 180).with_ext(ExtAddr(i as u64 + 1)))
            .unwrap();
    }
    group.bench_function("relay_slots", |b| b.iter(|| table.relay_slots()));
    group.bench_function("find_ext", |b| b.iter(|| table.find_ext(ExtAddr(63))));
    group.finish();
}

fn bench_source_routes(c: &mut Criterion) {
    let mut cache = SourceRouteCache::new(32);
    for i in 0..32u16 {
        cache.insert(ShortAddr(i + 1), (0..8).map(|r| ShortAddr(0x100 + r)).collect(), 0);
    }
    c.bench_function("source_route_build", |b| b.iter(|| cache.source_route(ShortAddr(17))));
}

criterion_group!(
    benches,
    bench_discovery_table,
    bench_passive_ack,
    bench_neighbors,
    bench_source_routes
);
criterion_main!(benches);
