use std::collections::BTreeMap;
use std::fmt;

use crate::config::NodeConfig;
use crate::error::{Result, SwarmError};
use crate::identity::NodeId;

/// Network location of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Static address book of every other configured node.
///
/// Built once when a node is constructed and never mutated afterwards, so it
/// is shared between a node's tasks without locking.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    self_id: NodeId,
    peers: BTreeMap<NodeId, PeerAddr>,
}

impl PeerRegistry {
    /// Build the registry from a node's configuration.
    ///
    /// Entries carrying the node's own identifier are skipped.
    ///
    /// # Errors
    ///
    /// - `DuplicateIdentifier` if two peers share an identifier
    /// - `InvalidPeer` if a peer has an empty host or port 0
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let mut peers = BTreeMap::new();

        for peer in &config.peers {
            if peer.node_id == config.node_id {
                continue;
            }
            if peer.host.is_empty() || peer.port == 0 {
                return Err(SwarmError::InvalidPeer(format!(
                    "{}:{}:{}",
                    peer.node_id, peer.host, peer.port
                )));
            }
            let addr = PeerAddr::new(peer.host.clone(), peer.port);
            if peers.insert(peer.node_id, addr).is_some() {
                return Err(SwarmError::DuplicateIdentifier(peer.node_id));
            }
        }

        Ok(Self {
            self_id: config.node_id,
            peers,
        })
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn get(&self, id: NodeId) -> Option<&PeerAddr> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Peers in ascending identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PeerAddr)> {
        self.peers.iter().map(|(id, addr)| (*id, addr))
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.peers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
