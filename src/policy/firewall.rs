//! Firewall rule synthesis for jump peers
//!
//! Rules are emitted stage by stage in the order of [`FIREWALL_STAGES`]:
//!
//! 1. `block`: drop everything to or from Blocked peers
//! 2. `isolate`: drop tunnel-to-tunnel forwarding for Isolated peers
//! 3. `encapsulate`: forward and masquerade full-encapsulation peers out of
//!    the NAT interface
//! 4. `accept`: tunnel-to-tunnel forwarding for Active peers
//!
//! Within a stage peers are visited in address order and the jump itself is
//! skipped, so unchanged input always yields byte-identical output. Every
//! drop precedes every accept, which makes blocking win over broader allow
//! rules.

use crate::model::{JumpSettings, Peer, TrustState};
use crate::policy::Topology;

/// One row of the firewall table
pub struct FirewallStage {
    /// Stage name, used in logs and tests
    pub name: &'static str,
    /// Rules contributed for one peer as seen from a jump
    pub contribute: fn(&JumpSettings, &Peer) -> Vec<String>,
}

/// Ordered firewall stages
pub const FIREWALL_STAGES: &[FirewallStage] = &[
    FirewallStage {
        name: "block",
        contribute: block_rules,
    },
    FirewallStage {
        name: "isolate",
        contribute: isolate_rules,
    },
    FirewallStage {
        name: "encapsulate",
        contribute: encapsulate_rules,
    },
    FirewallStage {
        name: "accept",
        contribute: accept_rules,
    },
];

fn block_rules(settings: &JumpSettings, peer: &Peer) -> Vec<String> {
    if peer.trust != TrustState::Blocked {
        return Vec::new();
    }
    let host = peer.host_net();
    vec![
        format!("-A FORWARD -s {} -j DROP", host),
        format!("-A FORWARD -d {} -j DROP", host),
        format!("-A INPUT -i {} -s {} -j DROP", settings.tunnel_interface, host),
    ]
}

fn isolate_rules(settings: &JumpSettings, peer: &Peer) -> Vec<String> {
    if peer.trust != TrustState::Isolated {
        return Vec::new();
    }
    let wg = &settings.tunnel_interface;
    let host = peer.host_net();
    vec![
        format!("-A FORWARD -i {} -o {} -s {} -j DROP", wg, wg, host),
        format!("-A FORWARD -i {} -o {} -d {} -j DROP", wg, wg, host),
    ]
}

fn encapsulate_rules(settings: &JumpSettings, peer: &Peer) -> Vec<String> {
    if peer.is_jump() || peer.is_blocked() || !peer.full_encapsulation {
        return Vec::new();
    }
    let wg = &settings.tunnel_interface;
    let eth = &settings.nat_interface;
    let host = peer.host_net();
    vec![
        format!("-A FORWARD -i {} -o {} -s {} -j ACCEPT", wg, eth, host),
        format!(
            "-A FORWARD -i {} -o {} -d {} -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT",
            eth, wg, host
        ),
        format!("-t nat -A POSTROUTING -s {} -o {} -j MASQUERADE", host, eth),
    ]
}

fn accept_rules(settings: &JumpSettings, peer: &Peer) -> Vec<String> {
    if peer.trust != TrustState::Active {
        return Vec::new();
    }
    let wg = &settings.tunnel_interface;
    vec![format!(
        "-A FORWARD -i {} -o {} -s {} -j ACCEPT",
        wg,
        wg,
        peer.host_net()
    )]
}

/// Compile the ordered rule list enforced by `jump`
pub fn compile_rules(topology: &Topology<'_>, jump: &Peer, settings: &JumpSettings) -> Vec<String> {
    let mut rules = Vec::new();
    for stage in FIREWALL_STAGES {
        for peer in &topology.peers {
            if peer.id == jump.id {
                continue;
            }
            rules.extend((stage.contribute)(settings, peer));
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeerKind;
    use crate::policy::test_support::*;

    fn rules_for(record: &crate::model::NetworkRecord, jump_id: &crate::model::PeerId) -> Vec<String> {
        let topology = Topology::new(record).unwrap();
        let jump = &record.peers[jump_id];
        let settings = jump.kind.jump_settings().unwrap();
        compile_rules(&topology, jump, settings)
    }

    #[test]
    fn test_stage_order() {
        let names: Vec<_> = FIREWALL_STAGES.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["block", "isolate", "encapsulate", "accept"]);
    }

    #[test]
    fn test_encapsulated_and_plain_peers() {
        let mut record = record("10.0.0.0/24");
        let j = add(&mut record, "j", 1, jump());
        let a = add(&mut record, "a", 2, PeerKind::RegularDynamic);
        add(&mut record, "b", 3, PeerKind::RegularDynamic);
        record.peers.get_mut(&a).unwrap().full_encapsulation = true;

        let rules = rules_for(&record, &j);
        assert_eq!(
            rules,
            vec![
                "-A FORWARD -i wg0 -o eth0 -s 10.0.0.2/32 -j ACCEPT",
                "-A FORWARD -i eth0 -o wg0 -d 10.0.0.2/32 -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT",
                "-t nat -A POSTROUTING -s 10.0.0.2/32 -o eth0 -j MASQUERADE",
                "-A FORWARD -i wg0 -o wg0 -s 10.0.0.2/32 -j ACCEPT",
                "-A FORWARD -i wg0 -o wg0 -s 10.0.0.3/32 -j ACCEPT",
            ]
        );
        assert!(rules.iter().all(|r| !r.contains("DROP")));
    }

    #[test]
    fn test_block_precedes_accept() {
        let mut record = record("10.0.0.0/24");
        let j = add(&mut record, "j", 1, jump());
        let a = add(&mut record, "a", 2, PeerKind::RegularDynamic);
        let b = add(&mut record, "b", 3, PeerKind::RegularDynamic);
        let c = add(&mut record, "c", 4, PeerKind::RegularDynamic);
        record.peers.get_mut(&a).unwrap().trust = TrustState::Active;
        {
            let peer = record.peers.get_mut(&c).unwrap();
            peer.trust = TrustState::Blocked;
            peer.full_encapsulation = true;
        }
        record.peers.get_mut(&b).unwrap().trust = TrustState::Isolated;

        let rules = rules_for(&record, &j);
        let last_drop = rules.iter().rposition(|r| r.contains("DROP")).unwrap();
        let first_accept = rules.iter().position(|r| r.contains("ACCEPT")).unwrap();
        assert!(last_drop < first_accept);

        assert_eq!(rules[0], "-A FORWARD -s 10.0.0.4/32 -j DROP");
        assert!(rules.contains(&"-A FORWARD -i wg0 -o wg0 -s 10.0.0.3/32 -j DROP".to_string()));
        assert!(!rules.iter().any(|r| r.contains("MASQUERADE")));
        assert!(!rules.iter().any(|r| r.contains("10.0.0.3/32 -j ACCEPT")));
        assert!(!rules.iter().any(|r| r.contains("10.0.0.4/32 -j ACCEPT")));
    }

    #[test]
    fn test_jump_skips_itself_and_accepts_other_jumps() {
        let mut record = record("10.0.0.0/24");
        let j1 = add(&mut record, "j1", 1, jump());
        add(&mut record, "j2", 2, jump());

        let rules = rules_for(&record, &j1);
        assert_eq!(rules, vec!["-A FORWARD -i wg0 -o wg0 -s 10.0.0.2/32 -j ACCEPT"]);
    }

    #[test]
    fn test_custom_interfaces() {
        let mut record = record("10.0.0.0/24");
        let j = add(
            &mut record,
            "j",
            1,
            PeerKind::Jump(JumpSettings {
                listen_port: 51000,
                tunnel_interface: "wg-mesh".to_string(),
                nat_interface: "ens3".to_string(),
            }),
        );
        let a = add(&mut record, "a", 2, PeerKind::RegularDynamic);
        record.peers.get_mut(&a).unwrap().full_encapsulation = true;

        let rules = rules_for(&record, &j);
        assert!(rules.contains(&"-t nat -A POSTROUTING -s 10.0.0.2/32 -o ens3 -j MASQUERADE".to_string()));
        assert!(rules.contains(&"-A FORWARD -i wg-mesh -o wg-mesh -s 10.0.0.2/32 -j ACCEPT".to_string()));
    }

    #[test]
    fn test_idempotent() {
        let mut record = record("10.0.0.0/24");
        let j = add(&mut record, "j", 1, jump());
        for i in 2..20u8 {
            let id = add(&mut record, &format!("p{}", i), i, PeerKind::RegularDynamic);
            let peer = record.peers.get_mut(&id).unwrap();
            peer.full_encapsulation = i % 3 == 0;
            peer.trust = match i % 4 {
                0 => TrustState::Blocked,
                1 => TrustState::Isolated,
                _ => TrustState::Active,
            };
        }
        assert_eq!(rules_for(&record, &j), rules_for(&record.clone(), &j));
    }
}
