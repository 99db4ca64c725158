//! Property tests for address allocation

use harmony_mesh::config::Config;
use harmony_mesh::ipam::AddressPool;
use harmony_mesh::registry::{NetworkSpec, PeerSpec, PeerVariant};
use harmony_mesh::store::MemoryStore;
use harmony_mesh::{Mesh, MeshError};
use ipnet::Ipv4Net;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Allocate,
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Allocate),
        1 => any::<usize>().prop_map(Op::Release),
    ]
}

#[derive(Debug, Clone)]
enum MeshOp {
    Create,
    Delete(usize),
    MoveTo(usize),
}

const CIDRS: &[&str] = &["10.0.0.0/27", "10.1.0.0/28", "172.16.4.0/26"];

fn mesh_op() -> impl Strategy<Value = MeshOp> {
    prop_oneof![
        4 => Just(MeshOp::Create),
        2 => any::<usize>().prop_map(MeshOp::Delete),
        1 => (0..CIDRS.len()).prop_map(MeshOp::MoveTo),
    ]
}

/// Apply `ops` one transaction each, checking peer addresses after every step
async fn run_mesh_ops(ops: Vec<MeshOp>) -> Result<(), String> {
    let mesh = Mesh::open(Arc::new(MemoryStore::new()), &Config::default()).unwrap();
    let id = mesh
        .create_network(NetworkSpec {
            name: "prop".to_string(),
            cidr: CIDRS[0].to_string(),
            domain: "prop.mesh".to_string(),
            reserve_gateway: false,
        })
        .await
        .unwrap();

    for (n, op) in ops.into_iter().enumerate() {
        let mut txn = mesh.begin(&id).await.unwrap();
        let outcome = match op {
            MeshOp::Create => txn
                .create_peer(PeerSpec::new(format!("p{}", n), PeerVariant::RegularDynamic))
                .map(|_| ()),
            MeshOp::Delete(i) => {
                let ids: Vec<_> = txn.record().peers.keys().copied().collect();
                if ids.is_empty() {
                    continue;
                }
                txn.delete_peer(&ids[i % ids.len()])
            }
            MeshOp::MoveTo(i) => txn.update_cidr(CIDRS[i]),
        };
        match outcome {
            Ok(()) => {
                txn.commit().await.unwrap();
            }
            Err(MeshError::AddressSpaceExhausted(_)) => {}
            Err(e) => return Err(format!("unexpected error {}", e)),
        }

        let record = mesh.snapshot(&id).await.unwrap();
        let cidr = record.network.cidr;
        let mut seen = BTreeSet::new();
        for peer in record.peers.values() {
            if !seen.insert(peer.address) {
                return Err(format!("{} assigned twice", peer.address));
            }
            if !cidr.contains(&peer.address)
                || peer.address == cidr.network()
                || peer.address == cidr.broadcast()
            {
                return Err(format!("{} is not a host of {}", peer.address, cidr));
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mesh_addresses_stay_unique(ops in prop::collection::vec(mesh_op(), 1..60)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(run_mesh_ops(ops));
        prop_assert!(result.is_ok(), "{:?}", result);
    }
}

proptest! {
    #[test]
    fn allocations_stay_unique_and_in_range(
        prefix in 26u8..=30,
        reserve_gateway in any::<bool>(),
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let cidr = Ipv4Net::new(Ipv4Addr::new(10, 20, 30, 0), prefix).unwrap();
        let gateway = reserve_gateway.then(|| Ipv4Addr::from(u32::from(cidr.network()) + 1));
        let mut pool = AddressPool::new(cidr, gateway);
        let mut held: BTreeSet<Ipv4Addr> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Allocate => match pool.allocate() {
                    Ok(ip) => {
                        prop_assert!(cidr.contains(&ip));
                        prop_assert_ne!(ip, cidr.network());
                        prop_assert_ne!(ip, cidr.broadcast());
                        prop_assert_ne!(Some(ip), gateway);
                        prop_assert!(held.insert(ip), "{} handed out twice", ip);
                        // Lowest free address first
                        let below = u32::from(cidr.network()) + 1..u32::from(ip);
                        prop_assert!(below
                            .map(Ipv4Addr::from)
                            .all(|a| held.contains(&a) || Some(a) == gateway));
                    }
                    Err(MeshError::AddressSpaceExhausted(_)) => {
                        prop_assert_eq!(pool.available_count(), 0);
                    }
                    Err(e) => prop_assert!(false, "unexpected error {}", e),
                },
                Op::Release(n) => {
                    if held.is_empty() {
                        continue;
                    }
                    let ip = *held.iter().nth(n % held.len()).unwrap();
                    prop_assert!(pool.release(ip));
                    held.remove(&ip);
                }
            }
            prop_assert_eq!(pool.allocated_ips(), held.iter().copied().collect::<Vec<_>>());
        }
    }

    #[test]
    fn restored_pool_never_reissues_held_addresses(
        taken in prop::collection::btree_set(1u32..255, 0..40),
    ) {
        let cidr: Ipv4Net = "192.168.7.0/24".parse().unwrap();
        let held: Vec<Ipv4Addr> = taken
            .iter()
            .map(|host| Ipv4Addr::from(u32::from(cidr.network()) + host))
            .collect();
        let mut pool = AddressPool::new(cidr, None).with_allocated(&held);

        let next = pool.allocate().unwrap();
        prop_assert!(!held.contains(&next));
        let lowest = (1u32..255).find(|h| !taken.contains(h)).unwrap();
        prop_assert_eq!(next, Ipv4Addr::from(u32::from(cidr.network()) + lowest));
    }
}
