use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{Result, SwarmError};
use crate::identity::{IdScheme, NodeId};

/// Protocol timings.
///
/// The follower timeout is three heartbeat periods so a single lost datagram
/// never triggers an election on its own.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// How often a leader broadcasts a heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat staleness after which a follower starts proposing itself.
    pub heartbeat_timeout_ms: u64,
    /// How often a follower checks heartbeat staleness.
    pub monitor_poll_interval_ms: u64,
    /// Period of the all-pairs connectivity probe.
    pub connectivity_probe_interval_ms: u64,
    /// How long a single probe waits for its response.
    pub connectivity_probe_timeout_ms: u64,
    /// Delay before the single bind retry.
    pub bind_retry_delay_ms: u64,
    /// Upper bound on joining a node's background tasks during shutdown.
    pub shutdown_join_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            heartbeat_timeout_ms: 3000,
            monitor_poll_interval_ms: 1000,
            connectivity_probe_interval_ms: 5000,
            connectivity_probe_timeout_ms: 500,
            bind_retry_delay_ms: 1000,
            shutdown_join_timeout_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn monitor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_interval_ms)
    }

    pub fn connectivity_probe_interval(&self) -> Duration {
        Duration::from_millis(self.connectivity_probe_interval_ms)
    }

    pub fn connectivity_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity_probe_timeout_ms)
    }

    pub fn bind_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bind_retry_delay_ms)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    /// Seeds the node as leader. Normally exactly one member sets this.
    pub initial_leader: bool,
    pub peers: Vec<PeerConfig>,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            host: "127.0.0.1".to_string(),
            port: 5000,
            initial_leader: false,
            peers: Vec::new(),
            timing: TimingConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: NodeId, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id,
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, node_id: NodeId, host: impl Into<String>, port: u16) -> Self {
        self.peers.push(PeerConfig {
            node_id,
            host: host.into(),
            port,
        });
        self
    }

    pub fn as_leader(mut self) -> Self {
        self.initial_leader = true;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// `host:port` this node binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One configured member of a cluster, before its identifier is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberConfig {
    pub host: String,
    pub port: u16,
}

/// The static membership every node of a simulated cluster is built from.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub members: Vec<MemberConfig>,
    pub id_scheme: IdScheme,
    /// Seeded leader. `None` seeds the lowest identifier.
    pub initial_leader: Option<NodeId>,
    pub timing: TimingConfig,
}

impl ClusterConfig {
    /// `count` nodes on `127.0.0.1`, ports `base_port..base_port + count`,
    /// identified by port offset.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPeer` if the port range runs past 65535.
    pub fn localhost(count: u16, base_port: u16) -> Result<Self> {
        let members = (0..count)
            .map(|i| {
                let port = base_port.checked_add(i).ok_or_else(|| {
                    SwarmError::InvalidPeer(format!(
                        "{} nodes from port {} exceed the port range",
                        count, base_port
                    ))
                })?;
                Ok(MemberConfig {
                    host: "127.0.0.1".to_string(),
                    port,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            members,
            id_scheme: IdScheme::PortOffset { base_port },
            initial_leader: None,
            timing: TimingConfig::default(),
        })
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_leader(mut self, leader: NodeId) -> Self {
        self.initial_leader = Some(leader);
        self
    }

    /// Every member's identifier, in member order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .map(|m| self.id_scheme.derive(&m.host, m.port))
            .collect()
    }

    /// Build one `NodeConfig` per member, each listing all other members as peers.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentifier` if the scheme maps two members to the same id.
    pub fn node_configs(&self) -> Result<Vec<NodeConfig>> {
        let ids = self.node_ids();

        let mut seen = BTreeSet::new();
        for &id in &ids {
            if !seen.insert(id) {
                return Err(SwarmError::DuplicateIdentifier(id));
            }
        }

        let leader = match self.initial_leader {
            Some(id) => Some(id),
            None => seen.iter().next().copied(),
        };

        let configs = self
            .members
            .iter()
            .zip(&ids)
            .map(|(member, &id)| {
                let peers = self
                    .members
                    .iter()
                    .zip(&ids)
                    .filter(|(_, &peer_id)| peer_id != id)
                    .map(|(peer, &peer_id)| PeerConfig {
                        node_id: peer_id,
                        host: peer.host.clone(),
                        port: peer.port,
                    })
                    .collect();

                NodeConfig {
                    node_id: id,
                    host: member.host.clone(),
                    port: member.port,
                    initial_leader: leader == Some(id),
                    peers,
                    timing: self.timing.clone(),
                }
            })
            .collect();

        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_config_default() {
        let cfg = TimingConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.monitor_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.connectivity_probe_interval(), Duration::from_secs(5));
        assert_eq!(cfg.connectivity_probe_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.bind_retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.node_id, 0);
        assert_eq!(cfg.listen_addr(), "127.0.0.1:5000");
        assert!(!cfg.initial_leader);
        assert!(cfg.peers.is_empty());
    }

    #[test]
    fn node_config_with_peer() {
        let cfg = NodeConfig::new(1, "127.0.0.1", 5001)
            .with_peer(2, "127.0.0.1", 5002)
            .with_peer(3, "drone-3.local", 6000)
            .as_leader();
        assert!(cfg.initial_leader);
        assert_eq!(cfg.peers.len(), 2);
        assert_eq!(cfg.peers[0].node_id, 2);
        assert_eq!(cfg.peers[1].host, "drone-3.local");
        assert_eq!(cfg.peers[1].port, 6000);
    }

    #[test]
    fn localhost_cluster_seeds_lowest_id_as_leader() {
        let cluster = ClusterConfig::localhost(5, 5000).unwrap();
        assert_eq!(cluster.node_ids(), vec![0, 1, 2, 3, 4]);

        let configs = cluster.node_configs().unwrap();
        assert_eq!(configs.len(), 5);
        assert!(configs[0].initial_leader);
        assert!(configs[1..].iter().all(|c| !c.initial_leader));
    }

    #[test]
    fn node_configs_exclude_self_from_peers() {
        let configs = ClusterConfig::localhost(3, 7000).unwrap().node_configs().unwrap();
        for cfg in &configs {
            assert_eq!(cfg.peers.len(), 2);
            assert!(cfg.peers.iter().all(|p| p.node_id != cfg.node_id));
        }
        assert_eq!(configs[2].port, 7002);
        assert_eq!(configs[2].node_id, 2);
    }

    #[test]
    fn explicit_leader_overrides_lowest() {
        let configs = ClusterConfig::localhost(3, 7000)
            .unwrap()
            .with_leader(2)
            .node_configs()
            .unwrap();
        assert!(!configs[0].initial_leader);
        assert!(configs[2].initial_leader);
    }

    #[test]
    fn duplicate_derived_ids_are_rejected() {
        let mut cluster = ClusterConfig::localhost(3, 7000).unwrap();
        cluster.id_scheme = IdScheme::DigitSum;
        match cluster.node_configs() {
            Err(SwarmError::DuplicateIdentifier(id)) => assert_eq!(id, 128),
            other => panic!("expected duplicate identifier, got {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn localhost_rejects_port_overflow() {
        match ClusterConfig::localhost(10, 65530) {
            Err(SwarmError::InvalidPeer(msg)) => assert!(msg.contains("65530")),
            other => panic!("expected InvalidPeer, got {:?}", other.map(|c| c.members.len())),
        }
    }

    #[test]
    fn localhost_fills_port_range_exactly() {
        let cluster = ClusterConfig::localhost(6, 65530).unwrap();
        assert_eq!(cluster.members.last().map(|m| m.port), Some(65535));
        assert_eq!(cluster.node_ids(), vec![0, 1, 2, 3, 4, 5]);
    }
}
