//! Peer discovery, connection pool, and flood propagation (spec §4.8).
//! Grounded in the teacher's `SyncManager`/`SyncScheduler`
//! (`network/sync.rs`): the same `Arc<RwLock<State>>` holder with an
//! `update_state(|state| ...)` closure, and a periodic `tokio::time::
//! interval` loop driving the bootstrap/maintenance cycle, generalized
//! from block-sync bookkeeping to peer-pool and flood-fill bookkeeping.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::inventory::Inventory;
use crate::object::InventoryVector;
use crate::repository::{KnownNode, NodeRegistry};

/// Target outbound peer count, per spec §4.8 (default 8 matches
/// `NodeConfig::connection_limit`).
#[derive(Debug, Clone)]
pub struct AgentState {
    pub connected: HashMap<SocketAddr, u64>,
    pub target_outbound: usize,
}

impl AgentState {
    fn new(target_outbound: usize) -> Self {
        Self {
            connected: HashMap::new(),
            target_outbound,
        }
    }

    fn peers_for_stream(&self, stream: u64) -> usize {
        self.connected.values().filter(|&&s| s == stream).count()
    }
}

/// Owns the connection pool and flood-fill bookkeeping across peer
/// sessions. Individual sessions are driven by
/// [`crate::network::session::PeerSession`]; this agent only tracks who
/// is connected to what stream and who has already seen which object.
pub struct NetworkAgent {
    state: Arc<RwLock<AgentState>>,
    registry: Arc<dyn NodeRegistry>,
    inventory: Arc<Inventory>,
    /// Per-IV set of peers that are known to already have it, so flood
    /// announce excludes the originator (spec §4.8: "all ACTIVE peers
    /// except the originator").
    seen_by: Arc<RwLock<HashMap<InventoryVector, HashSet<SocketAddr>>>>,
}

impl NetworkAgent {
    pub fn new(registry: Arc<dyn NodeRegistry>, inventory: Arc<Inventory>, target_outbound: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(AgentState::new(target_outbound))),
            registry,
            inventory,
            seen_by: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state.read().clone()
    }

    pub fn update_state(&self, update: impl FnOnce(&mut AgentState)) {
        let mut state = self.state.write();
        update(&mut state);
    }

    pub fn mark_connected(&self, addr: SocketAddr, stream: u64) {
        self.update_state(|state| {
            state.connected.insert(addr, stream);
        });
    }

    pub fn mark_disconnected(&self, addr: &SocketAddr) {
        self.update_state(|state| {
            state.connected.remove(addr);
        });
    }

    /// How many additional outbound connections this stream needs to
    /// reach `target_outbound`.
    pub fn deficit(&self, stream: u64) -> usize {
        let state = self.state.read();
        state
            .target_outbound
            .saturating_sub(state.peers_for_stream(stream))
    }

    pub async fn bootstrap_candidates(&self, stream: u64) -> Vec<KnownNode> {
        let deficit = self.deficit(stream);
        if deficit == 0 {
            return Vec::new();
        }
        self.registry
            .known_nodes(stream, deficit)
            .await
            .unwrap_or_default()
    }

    pub async fn offer_node(&self, node: KnownNode) {
        let _ = self.registry.offer(node).await;
    }

    /// Records that `originator` already has `iv` (it sent us the object)
    /// so a subsequent flood round excludes it.
    pub fn record_originator(&self, iv: InventoryVector, originator: SocketAddr) {
        self.seen_by.write().entry(iv).or_default().insert(originator);
    }

    /// Peers that should receive an INV announce for `iv`: all connected
    /// peers on its stream minus those already known to have it.
    pub fn flood_targets(&self, iv: InventoryVector, stream: u64) -> Vec<SocketAddr> {
        let state = self.state.read();
        let seen = self.seen_by.read();
        let already_has = seen.get(&iv);
        state
            .connected
            .iter()
            .filter(|(_, &s)| s == stream)
            .filter(|(addr, _)| already_has.map_or(true, |set| !set.contains(addr)))
            .map(|(addr, _)| *addr)
            .collect()
    }

    pub async fn cleanup_inventory(&self) -> usize {
        self.inventory.cleanup(SystemTime::now()).await.unwrap_or(0)
    }
}

/// Spawns the periodic maintenance loop: bootstrap deficits, then
/// inventory cleanup. `announce` is called by the session layer directly
/// for the immediate flood-on-accept path; this loop only covers the
/// slower periodic housekeeping.
pub fn spawn_maintenance_loop(
    agent: Arc<NetworkAgent>,
    streams: Vec<u64>,
    interval: Duration,
) -> mpsc::UnboundedReceiver<Vec<KnownNode>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for &stream in &streams {
                let candidates = agent.bootstrap_candidates(stream).await;
                if !candidates.is_empty() && tx.send(candidates).is_err() {
                    return;
                }
            }
            let removed = agent.cleanup_inventory().await;
            if removed > 0 {
                log::debug!("inventory cleanup removed {removed} expired objects");
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;
    use crate::inventory::MemoryInventoryRepository;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};

    struct EmptyRegistry;

    #[async_trait]
    impl NodeRegistry for EmptyRegistry {
        async fn known_nodes(&self, _stream: u64, _limit: usize) -> Result<Vec<KnownNode>, crate::error::BmError> {
            Ok(Vec::new())
        }
        async fn offer(&self, _node: KnownNode) -> Result<(), crate::error::BmError> {
            Ok(())
        }
    }

    fn agent() -> NetworkAgent {
        let inventory = Arc::new(Inventory::new(
            Arc::new(MemoryInventoryRepository::new()),
            Arc::new(NativeCryptography::new()),
            1000,
            1000,
        ));
        NetworkAgent::new(Arc::new(EmptyRegistry), inventory, 8)
    }

    #[test]
    fn deficit_reflects_target_minus_connected() {
        let agent = agent();
        assert_eq!(agent.deficit(1), 8);
        let addr: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8444);
        agent.mark_connected(addr, 1);
        assert_eq!(agent.deficit(1), 7);
    }

    #[test]
    fn flood_excludes_originator() {
        let agent = agent();
        let peer_a: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        let peer_b: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2);
        agent.mark_connected(peer_a, 1);
        agent.mark_connected(peer_b, 1);

        let iv = InventoryVector([9; 32]);
        agent.record_originator(iv, peer_a);

        let targets = agent.flood_targets(iv, 1);
        assert_eq!(targets, vec![peer_b]);
    }
}
