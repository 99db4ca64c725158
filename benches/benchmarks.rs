//! Performance benchmarks for harmony-mesh
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use harmony_mesh::config::Config;
use harmony_mesh::ipam::AddressPool;
use harmony_mesh::model::NetworkRecord;
use harmony_mesh::policy;
use harmony_mesh::registry::{NetworkSpec, PeerSpec, PeerVariant};
use harmony_mesh::store::MemoryStore;
use harmony_mesh::wireguard::KeyPair;
use harmony_mesh::Mesh;
use ipnet::Ipv4Net;
use std::sync::Arc;

fn bench_key_generation(c: &mut Criterion) {
    c.bench_function("key_generation", |b| {
        b.iter(|| {
            let _pair = KeyPair::generate();
        });
    });
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_full_pool");

    for prefix in [28u8, 24, 22] {
        let cidr: Ipv4Net = format!("10.0.0.0/{}", prefix).parse().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(prefix), &cidr, |b, cidr| {
            b.iter(|| {
                let mut pool = AddressPool::new(*cidr, None);
                while let Ok(ip) = pool.allocate() {
                    black_box(ip);
                }
            });
        });
    }

    group.finish();
}

/// Network with two jumps and `regular` regular peers, some isolated
fn network_with(regular: usize) -> NetworkRecord {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let mesh = Mesh::open(Arc::new(MemoryStore::new()), &Config::default()).unwrap();
        let id = mesh
            .create_network(NetworkSpec {
                name: "bench".to_string(),
                cidr: "10.0.0.0/20".to_string(),
                domain: "bench.mesh".to_string(),
                reserve_gateway: false,
            })
            .await
            .unwrap();

        let mut txn = mesh.begin(&id).await.unwrap();
        txn.create_peer(PeerSpec::new("hub-1", PeerVariant::Jump)).unwrap();
        txn.create_peer(PeerSpec::new("hub-2", PeerVariant::Jump)).unwrap();
        for i in 0..regular {
            let mut spec = PeerSpec::new(format!("peer-{}", i), PeerVariant::RegularDynamic);
            spec.full_encapsulation = i % 3 == 0;
            spec.is_isolated = i % 5 == 0;
            txn.create_peer(spec).unwrap();
        }
        txn.commit().await.unwrap();
        mesh.snapshot(&id).await.unwrap()
    })
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_network");

    for size in [10usize, 100, 1000] {
        let record = network_with(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &record, |b, record| {
            b.iter(|| policy::compile(black_box(record)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_key_generation, bench_allocation, bench_compile);

criterion_main!(benches);
