//! Peer and network registry
//!
//! [`Mesh`] owns every network record and is the only way to reach them.
//! There is no ambient global state: a `Mesh` is constructed over a
//! [`Store`] and handed to whoever needs it, so tests build isolated
//! fixtures freely.
//!
//! Mutations go through a per-network [`NetworkTxn`] obtained from
//! [`Mesh::begin`]. Transactions on the same network are serialized; those
//! on different networks proceed in parallel. Reads of compiled policy use
//! the last committed snapshot and never see a transaction in flight.
//! Enrollment fetches are answered from committed indexes alone and never
//! wait for a transaction.

mod request;
mod txn;

pub use request::{CreatedPeer, NetworkSpec, PeerSpec, PeerUpdate, PeerVariant};
pub use txn::{CommitReceipt, NetworkTxn};

use crate::config::{Config, NetworkConfig};
use crate::error::{MeshError, Result};
use crate::model::{JumpSettings, Network, NetworkId, NetworkRecord, PeerId};
use crate::monitoring::{MetricType, Monitor, NetworkStats};
use crate::notify::{ChangeEvent, ChangeKind, Notifier, Subscription};
use crate::policy::{self, CompiledNetwork, JumpPolicy, PeerPolicy};
use crate::store::Store;
use crate::wireguard::{render_wg_quick, EnrollmentToken, PrivateKey};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

type Shared = Arc<Mutex<NetworkRecord>>;

/// Committed owner of an enrollment token
#[derive(Debug, Clone)]
struct TokenEntry {
    network: NetworkId,
    peer: PeerId,
    name: String,
}

/// The orchestration core
pub struct Mesh {
    store: Arc<dyn Store>,
    networks: RwLock<HashMap<NetworkId, Shared>>,
    names: StdRwLock<HashMap<String, NetworkId>>,
    tokens: StdRwLock<HashMap<String, TokenEntry>>,
    blocked: StdRwLock<HashMap<NetworkId, BTreeSet<PeerId>>>,
    compiled: StdRwLock<HashMap<NetworkId, Arc<CompiledNetwork>>>,
    notifier: Arc<Notifier>,
    monitor: Arc<Monitor>,
    jump_defaults: JumpSettings,
}

impl Mesh {
    /// Build the registry over a store, loading every persisted network
    pub fn open(store: Arc<dyn Store>, config: &Config) -> Result<Self> {
        let monitor = Arc::new(Monitor::new());
        let notifier = Arc::new(Notifier::new(config.notifier.clone(), monitor.metrics()));

        let mut mesh = Self {
            store,
            networks: RwLock::new(HashMap::new()),
            names: StdRwLock::new(HashMap::new()),
            tokens: StdRwLock::new(HashMap::new()),
            blocked: StdRwLock::new(HashMap::new()),
            compiled: StdRwLock::new(HashMap::new()),
            notifier,
            monitor,
            jump_defaults: config.jump.clone(),
        };

        let records = mesh.store.load_all()?;
        let mut networks = HashMap::with_capacity(records.len());
        for record in records {
            let id = record.id();
            if write(&mesh.names).insert(record.network.name.clone(), id).is_some() {
                return Err(MeshError::Store(format!(
                    "Duplicate network name '{}' in store",
                    record.network.name
                )));
            }
            mesh.apply_commit(&NetworkRecord::new(record.network.clone()), &record);
            info!(
                "Loaded network '{}' v{} with {} peer(s)",
                record.network.name,
                record.version,
                record.peers.len()
            );
            networks.insert(id, Arc::new(Mutex::new(record)));
        }
        *mesh.networks.get_mut() = networks;

        Ok(mesh)
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub(crate) fn jump_defaults(&self) -> &JumpSettings {
        &self.jump_defaults
    }

    /// Statistics and metrics
    pub fn monitor(&self) -> Arc<Monitor> {
        self.monitor.clone()
    }

    /// Create a network
    pub async fn create_network(&self, spec: NetworkSpec) -> Result<NetworkId> {
        let cidr = spec.validate()?;

        let mut networks = self.networks.write().await;
        if read(&self.names).contains_key(&spec.name) {
            return Err(MeshError::NetworkExists(spec.name));
        }

        let mut record = NetworkRecord::new(Network {
            id: NetworkId::new(),
            name: spec.name,
            cidr,
            domain: spec.domain,
            reserve_gateway: spec.reserve_gateway,
            blocked: BTreeSet::new(),
        });
        record.version = 1;
        self.store.put(&record)?;

        let id = record.id();
        info!(
            "Created network '{}' ({}) as {}",
            record.network.name, record.network.cidr, id
        );
        write(&self.names).insert(record.network.name.clone(), id);
        self.apply_commit(&NetworkRecord::new(record.network.clone()), &record);
        self.notifier.publish(&[ChangeEvent::new(id, record.version, ChangeKind::NetworkUpdated)]);
        networks.insert(id, Arc::new(Mutex::new(record)));
        Ok(id)
    }

    /// Create configured networks that do not exist yet
    pub async fn seed<'a, I>(&self, networks: I) -> Result<Vec<NetworkId>>
    where
        I: IntoIterator<Item = (&'a String, &'a NetworkConfig)>,
    {
        let mut created = Vec::new();
        for (name, network) in networks {
            if read(&self.names).contains_key(name) {
                debug!("Seed network '{}' already present", name);
                continue;
            }
            let id = self
                .create_network(NetworkSpec {
                    name: name.clone(),
                    cidr: network.cidr.clone(),
                    domain: network.domain.clone(),
                    reserve_gateway: network.reserve_gateway,
                })
                .await?;
            created.push(id);
        }
        Ok(created)
    }

    /// Delete a network with all its peers
    pub async fn delete_network(&self, id: &NetworkId) -> Result<()> {
        let shared = self.shared(id).await?;
        let record = shared.lock().await;

        let mut networks = self.networks.write().await;
        if !networks.contains_key(id) {
            return Err(MeshError::NetworkNotFound(id.to_string()));
        }
        self.store.delete(*id)?;
        networks.remove(id);
        drop(networks);

        write(&self.names).remove(&record.network.name);
        {
            let mut tokens = write(&self.tokens);
            for peer in record.peers.values() {
                if let Some(token) = &peer.enrollment_token {
                    tokens.remove(token.expose());
                }
            }
        }
        write(&self.blocked).remove(id);
        write(&self.compiled).remove(id);
        self.monitor.remove_network(id);

        self.notifier.publish(&[ChangeEvent::new(
            *id,
            record.version + 1,
            ChangeKind::NetworkDeleted,
        )]);
        self.notifier.close_network(id);
        info!(
            "Deleted network '{}' and {} peer(s)",
            record.network.name,
            record.peers.len()
        );
        Ok(())
    }

    /// Start a transaction on a network
    ///
    /// Waits for any transaction already open on the same network. Holding
    /// a transaction while calling other `Mesh` methods that touch the same
    /// network deadlocks.
    pub async fn begin(&self, id: &NetworkId) -> Result<NetworkTxn<'_>> {
        let shared = self.shared(id).await?;
        let guard = shared.lock_owned().await;
        // The network may have been deleted while we waited
        if !self.networks.read().await.contains_key(id) {
            return Err(MeshError::NetworkNotFound(id.to_string()));
        }
        Ok(NetworkTxn::new(self, guard))
    }

    /// Resolve a network by name or id
    pub fn resolve(&self, name_or_id: &str) -> Result<NetworkId> {
        if let Some(id) = read(&self.names).get(name_or_id) {
            return Ok(*id);
        }
        name_or_id
            .parse::<NetworkId>()
            .ok()
            .filter(|id| read(&self.names).values().any(|known| known == id))
            .ok_or_else(|| MeshError::NetworkNotFound(name_or_id.to_string()))
    }

    /// Summaries of every network
    pub fn list_networks(&self) -> Vec<NetworkStats> {
        self.monitor.get_all_stats()
    }

    /// Snapshot of a network's committed record
    pub async fn snapshot(&self, id: &NetworkId) -> Result<NetworkRecord> {
        let shared = self.shared(id).await?;
        let record = shared.lock().await;
        Ok(record.clone())
    }

    /// Last successfully compiled artifacts of a network
    pub fn compiled(&self, id: &NetworkId) -> Result<Arc<CompiledNetwork>> {
        read(&self.compiled)
            .get(id)
            .cloned()
            .ok_or_else(|| MeshError::NetworkNotFound(id.to_string()))
    }

    /// Follow committed changes of a network
    pub fn subscribe(&self, id: &NetworkId) -> Result<Subscription> {
        if !read(&self.compiled).contains_key(id) {
            return Err(MeshError::NetworkNotFound(id.to_string()));
        }
        Ok(self.notifier.subscribe(*id))
    }

    /// Compiled configuration for the peer holding `token`
    ///
    /// Answered from the last commit; an open transaction on the network
    /// does not delay it.
    pub async fn fetch_config(&self, token: &str) -> Result<PeerPolicy> {
        let (network_id, peer_id) = self.authorize(token)?;
        let compiled = self.compiled(&network_id)?;
        compiled.peers.get(&peer_id).cloned().ok_or_else(|| {
            MeshError::InvalidState(format!("No compiled configuration for peer {} yet", peer_id))
        })
    }

    /// Firewall policy for the jump peer holding `token`
    pub async fn fetch_jump_policy(&self, token: &str) -> Result<JumpPolicy> {
        let (network_id, peer_id) = self.authorize(token)?;
        let compiled = self.compiled(&network_id)?;
        match compiled.jump_policies.get(&peer_id) {
            Some(policy) => Ok(policy.clone()),
            None if compiled.peers.contains_key(&peer_id) => Err(MeshError::Validation(format!(
                "Peer {} is not a jump peer",
                peer_id
            ))),
            None => Err(MeshError::InvalidState(format!(
                "No compiled policy for peer {} yet",
                peer_id
            ))),
        }
    }

    /// Render the wg-quick file of a peer from the compiled policy
    pub fn render_config(
        &self,
        network_id: &NetworkId,
        peer_id: &PeerId,
        private_key: Option<&PrivateKey>,
    ) -> Result<String> {
        let compiled = self.compiled(network_id)?;
        let policy = compiled
            .peers
            .get(peer_id)
            .ok_or_else(|| MeshError::PeerNotFound(peer_id.to_string()))?;
        Ok(render_wg_quick(policy, private_key))
    }

    fn authorize(&self, token: &str) -> Result<(NetworkId, PeerId)> {
        let token = EnrollmentToken::from_presented(token);
        let lookup = read(&self.tokens).get(token.expose()).cloned();
        let result = match lookup {
            None => Err(MeshError::TokenInvalid),
            Some(entry) => {
                let blocked = read(&self.blocked)
                    .get(&entry.network)
                    .is_some_and(|set| set.contains(&entry.peer));
                if blocked {
                    warn!("Withholding configuration from quarantined peer '{}'", entry.name);
                    Err(MeshError::Quarantined(entry.name))
                } else {
                    Ok((entry.network, entry.peer))
                }
            }
        };
        if result.is_err() {
            self.monitor.metrics().increment(MetricType::FetchRejections);
        }
        result
    }

    async fn shared(&self, id: &NetworkId) -> Result<Shared> {
        self.networks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| MeshError::NetworkNotFound(id.to_string()))
    }

    /// Refresh indexes and compiled policy after `current` replaced `previous`
    ///
    /// Returns the compilation error when the previous artifacts are kept.
    pub(crate) fn apply_commit(
        &self,
        previous: &NetworkRecord,
        current: &NetworkRecord,
    ) -> Option<String> {
        // Blocked set first so a freshly blocked token is never served
        write(&self.blocked).insert(current.id(), current.network.blocked.clone());
        {
            let mut tokens = write(&self.tokens);
            for peer in previous.peers.values() {
                if let Some(token) = &peer.enrollment_token {
                    tokens.remove(token.expose());
                }
            }
            for peer in current.peers.values() {
                if let Some(token) = &peer.enrollment_token {
                    tokens.insert(
                        token.expose().to_string(),
                        TokenEntry {
                            network: current.id(),
                            peer: peer.id,
                            name: peer.name.clone(),
                        },
                    );
                }
            }
        }

        let metrics = self.monitor.metrics();
        metrics.increment(MetricType::Commits);

        let policy_error = match policy::compile(current) {
            Ok(compiled) => {
                write(&self.compiled).insert(current.id(), Arc::new(compiled));
                None
            }
            Err(e) => {
                error!(
                    "Policy for network '{}' v{} not updated: {}",
                    current.network.name, current.version, e
                );
                metrics.increment(MetricType::CompileFailures);
                Some(e.to_string())
            }
        };

        self.monitor
            .update_network(NetworkStats::from_record(current, policy_error.is_none()));
        policy_error
    }
}

fn read<T>(lock: &StdRwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &StdRwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReasonCode, TrustState};
    use crate::store::{MemoryStore, MockStore};

    fn mesh() -> Mesh {
        Mesh::open(Arc::new(MemoryStore::new()), &Config::default()).unwrap()
    }

    fn office() -> NetworkSpec {
        NetworkSpec {
            name: "office".to_string(),
            cidr: "10.0.0.0/24".to_string(),
            domain: "office.mesh".to_string(),
            reserve_gateway: false,
        }
    }

    #[tokio::test]
    async fn test_create_network_rejects_duplicates_and_bad_cidr() {
        let mesh = mesh();
        mesh.create_network(office()).await.unwrap();
        assert!(matches!(
            mesh.create_network(office()).await,
            Err(MeshError::NetworkExists(_))
        ));

        let mut bad = office();
        bad.name = "lab".to_string();
        bad.cidr = "10.0.0.0/33".to_string();
        assert!(matches!(mesh.create_network(bad).await, Err(MeshError::InvalidCidr(_))));
        assert_eq!(mesh.list_networks().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_by_name_or_id() {
        let mesh = mesh();
        let id = mesh.create_network(office()).await.unwrap();
        assert_eq!(mesh.resolve("office").unwrap(), id);
        assert_eq!(mesh.resolve(&id.to_string()).unwrap(), id);
        assert!(matches!(mesh.resolve("lab"), Err(MeshError::NetworkNotFound(_))));
    }

    #[tokio::test]
    async fn test_dropped_txn_changes_nothing() {
        let mesh = mesh();
        let id = mesh.create_network(office()).await.unwrap();
        {
            let mut txn = mesh.begin(&id).await.unwrap();
            txn.create_peer(PeerSpec::new("a", PeerVariant::RegularDynamic)).unwrap();
        }
        let record = mesh.snapshot(&id).await.unwrap();
        assert!(record.peers.is_empty());
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_state_untouched() {
        let mut store = MockStore::new();
        store.expect_load_all().returning(|| Ok(Vec::new()));
        let mut puts = 0;
        store.expect_put().returning(move |_| {
            puts += 1;
            if puts == 1 {
                Ok(())
            } else {
                Err(MeshError::Store("disk full".to_string()))
            }
        });
        let mesh = Mesh::open(Arc::new(store), &Config::default()).unwrap();
        let id = mesh.create_network(office()).await.unwrap();

        let mut txn = mesh.begin(&id).await.unwrap();
        let created = txn
            .create_peer(PeerSpec::new("a", PeerVariant::RegularDynamic))
            .unwrap();
        assert!(matches!(txn.commit().await, Err(MeshError::Store(_))));

        let record = mesh.snapshot(&id).await.unwrap();
        assert!(record.peers.is_empty());
        assert_eq!(record.version, 1);
        let token = created.enrollment_token.unwrap();
        assert!(matches!(
            mesh.fetch_config(token.expose()).await,
            Err(MeshError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_token_lifecycle() {
        let mesh = mesh();
        let id = mesh.create_network(office()).await.unwrap();

        let mut txn = mesh.begin(&id).await.unwrap();
        txn.create_peer(PeerSpec::new("hub", PeerVariant::Jump)).unwrap();
        let a = txn
            .create_peer(PeerSpec::new("a", PeerVariant::RegularDynamic))
            .unwrap();
        let s = txn
            .create_peer(PeerSpec::new("s", PeerVariant::RegularStatic))
            .unwrap();
        txn.commit().await.unwrap();

        assert!(s.enrollment_token.is_none());
        assert!(s.private_key.is_some());
        let token = a.enrollment_token.unwrap();
        let config = mesh.fetch_config(token.expose()).await.unwrap();
        assert_eq!(config.address, a.address);
        assert!(matches!(
            mesh.fetch_jump_policy(token.expose()).await,
            Err(MeshError::Validation(_))
        ));

        let mut txn = mesh.begin(&id).await.unwrap();
        txn.open_incident(BTreeSet::from([a.peer_id]), ReasonCode::CompromisedKey, None, None)
            .unwrap();
        let receipt = txn.commit().await.unwrap();
        assert!(receipt.events.iter().any(|e| matches!(
            e.change,
            ChangeKind::AclChanged { to: TrustState::Blocked, .. }
        )));
        assert!(matches!(
            mesh.fetch_config(token.expose()).await,
            Err(MeshError::Quarantined(_))
        ));

        let mut txn = mesh.begin(&id).await.unwrap();
        txn.delete_peer(&a.peer_id).unwrap();
        txn.commit().await.unwrap();
        assert!(matches!(
            mesh.fetch_config(token.expose()).await,
            Err(MeshError::TokenInvalid)
        ));
        assert!(matches!(mesh.fetch_config("garbage").await, Err(MeshError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_fetch_does_not_wait_for_open_txn() {
        let mesh = mesh();
        let id = mesh.create_network(office()).await.unwrap();

        let mut txn = mesh.begin(&id).await.unwrap();
        txn.create_peer(PeerSpec::new("hub", PeerVariant::Jump)).unwrap();
        let a = txn
            .create_peer(PeerSpec::new("a", PeerVariant::RegularDynamic))
            .unwrap();
        let b = txn
            .create_peer(PeerSpec::new("b", PeerVariant::RegularDynamic))
            .unwrap();
        txn.open_incident(BTreeSet::from([b.peer_id]), ReasonCode::CompromisedKey, None, None)
            .unwrap();
        txn.commit().await.unwrap();

        let mut open = mesh.begin(&id).await.unwrap();
        open.delete_peer(&a.peer_id).unwrap();

        let token_a = a.enrollment_token.unwrap();
        let config = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            mesh.fetch_config(token_a.expose()),
        )
        .await
        .expect("fetch waited for the open transaction")
        .unwrap();
        assert_eq!(config.address, a.address);

        let token_b = b.enrollment_token.unwrap();
        let blocked = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            mesh.fetch_config(token_b.expose()),
        )
        .await
        .expect("fetch waited for the open transaction");
        assert!(matches!(blocked, Err(MeshError::Quarantined(name)) if name == "b"));

        open.commit().await.unwrap();
        assert!(matches!(
            mesh.fetch_config(token_a.expose()).await,
            Err(MeshError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_invalid_topology_keeps_last_good_policy() {
        let mesh = mesh();
        let id = mesh.create_network(office()).await.unwrap();

        let mut txn = mesh.begin(&id).await.unwrap();
        txn.create_peer(PeerSpec::new("hub", PeerVariant::Jump)).unwrap();
        let a = txn
            .create_peer(PeerSpec::new("a", PeerVariant::RegularDynamic))
            .unwrap();
        txn.create_peer(PeerSpec::new("b", PeerVariant::RegularDynamic)).unwrap();
        txn.commit().await.unwrap();
        let good = mesh.compiled(&id).unwrap();

        let mut txn = mesh.begin(&id).await.unwrap();
        txn.update_peer(
            &a.peer_id,
            PeerUpdate {
                is_isolated: Some(true),
                additional_allowed_ips: Some(vec!["10.0.0.0/24".to_string()]),
                ..PeerUpdate::default()
            },
        )
        .unwrap();
        let receipt = txn.commit().await.unwrap();

        assert!(receipt.policy_error.is_some());
        assert_eq!(receipt.version, 3);
        let kept = mesh.compiled(&id).unwrap();
        assert_eq!(kept.version, good.version);
        assert_eq!(*kept, *good);
        assert_eq!(mesh.monitor().metrics().value(MetricType::CompileFailures), 1.0);
    }

    #[tokio::test]
    async fn test_delete_network_revokes_everything() {
        let mesh = mesh();
        let id = mesh.create_network(office()).await.unwrap();
        let mut sub = mesh.subscribe(&id).unwrap();

        let mut txn = mesh.begin(&id).await.unwrap();
        let a = txn
            .create_peer(PeerSpec::new("a", PeerVariant::RegularDynamic))
            .unwrap();
        txn.commit().await.unwrap();

        mesh.delete_network(&id).await.unwrap();
        assert!(matches!(mesh.begin(&id).await, Err(MeshError::NetworkNotFound(_))));
        assert!(matches!(
            mesh.fetch_config(a.enrollment_token.unwrap().expose()).await,
            Err(MeshError::TokenInvalid)
        ));
        assert!(mesh.list_networks().is_empty());

        assert!(matches!(
            sub.recv().await.unwrap().change,
            ChangeKind::PeerCreated { .. }
        ));
        assert_eq!(sub.recv().await.unwrap().change, ChangeKind::NetworkDeleted);
        assert!(sub.recv().await.is_none());

        // The name is free again
        mesh.create_network(office()).await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_from_store() {
        let store = Arc::new(MemoryStore::new());
        let token = {
            let mesh = Mesh::open(store.clone(), &Config::default()).unwrap();
            let id = mesh.create_network(office()).await.unwrap();
            let mut txn = mesh.begin(&id).await.unwrap();
            let a = txn
                .create_peer(PeerSpec::new("a", PeerVariant::RegularDynamic))
                .unwrap();
            txn.commit().await.unwrap();
            a.enrollment_token.unwrap()
        };

        let mesh = Mesh::open(store, &Config::default()).unwrap();
        let config = mesh.fetch_config(token.expose()).await.unwrap();
        assert_eq!(config.name, "a");
        assert_eq!(config.version, 2);
    }
}
