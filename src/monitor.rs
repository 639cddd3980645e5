//! All-pairs connectivity probing.
//!
//! Purely observational: results only feed [`ClusterEvent::ConnectivityChanged`]
//! notifications and never influence heartbeats or elections.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::TimingConfig;
use crate::events::{ClusterEvent, EventSender};
use crate::identity::NodeId;
use crate::network::codec::{self, Message, MAX_DATAGRAM_SIZE};
use crate::network::PeerAddr;

/// Unordered node pair, stored as `(low, high)`.
pub type Link = (NodeId, NodeId);

pub fn link(a: NodeId, b: NodeId) -> Link {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConnectivityMonitor {
    nodes: Arc<RwLock<BTreeMap<NodeId, PeerAddr>>>,
    connections: Arc<RwLock<BTreeSet<Link>>>,
    timing: TimingConfig,
    events: EventSender,
    running: Mutex<Option<Running>>,
}

impl ConnectivityMonitor {
    pub fn new(timing: TimingConfig, events: EventSender) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(BTreeMap::new())),
            connections: Arc::new(RwLock::new(BTreeSet::new())),
            timing,
            events,
            running: Mutex::new(None),
        }
    }

    /// Start probing `nodes` every probe interval. A second call only
    /// replaces the node set.
    pub async fn start(&self, nodes: BTreeMap<NodeId, PeerAddr>) {
        self.set_nodes(nodes).await;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let probe = Prober {
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
            timeout: self.timing.connectivity_probe_timeout(),
            events: self.events.clone(),
        };
        let interval = self.timing.connectivity_probe_interval();
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                probe.cycle().await;
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::debug!("Connectivity monitor exited");
        });

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "Connectivity monitor started"
        );
        *running = Some(Running { token, handle });
    }

    /// Stop probing, waiting at most the shutdown join timeout.
    pub async fn stop(&self) {
        let Some(Running { token, mut handle }) = self.running.lock().await.take() else {
            return;
        };
        token.cancel();

        let timeout = self.timing.shutdown_join_timeout();
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            tracing::warn!("Connectivity monitor did not stop in time, aborting");
            handle.abort();
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Replace the probed node set, dropping links to nodes no longer in it.
    pub async fn set_nodes(&self, nodes: BTreeMap<NodeId, PeerAddr>) {
        let mut current = self.nodes.write().await;
        self.connections
            .write()
            .await
            .retain(|(a, b)| nodes.contains_key(a) && nodes.contains_key(b));
        *current = nodes;
    }

    /// Forget `id` and every link touching it.
    pub async fn remove_node(&self, id: NodeId) {
        let mut nodes = self.nodes.write().await;
        nodes.remove(&id);
        self.connections
            .write()
            .await
            .retain(|&(a, b)| a != id && b != id);
    }

    /// Links that answered during the last completed cycle.
    pub async fn active_connections(&self) -> BTreeSet<Link> {
        self.connections.read().await.clone()
    }

    /// Run one probe cycle immediately and return the connected links.
    pub async fn probe_once(&self) -> BTreeSet<Link> {
        let probe = Prober {
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
            timeout: self.timing.connectivity_probe_timeout(),
            events: self.events.clone(),
        };
        probe.cycle().await;
        self.active_connections().await
    }
}

struct Prober {
    nodes: Arc<RwLock<BTreeMap<NodeId, PeerAddr>>>,
    connections: Arc<RwLock<BTreeSet<Link>>>,
    timeout: Duration,
    events: EventSender,
}

impl Prober {
    async fn cycle(&self) {
        let at = chrono::Local::now().format("%H:%M:%S").to_string();
        let _ = self.events.send(ClusterEvent::MonitoringUpdate { at });

        let nodes: Vec<(NodeId, PeerAddr)> = self
            .nodes
            .read()
            .await
            .iter()
            .map(|(id, addr)| (*id, addr.clone()))
            .collect();

        let mut probes = JoinSet::new();
        for (i, (a, _)) in nodes.iter().enumerate() {
            for (b, b_addr) in &nodes[i + 1..] {
                let (a, b, target, timeout) = (*a, *b, b_addr.clone(), self.timeout);
                probes.spawn(async move { (link(a, b), check_connection(a, &target, timeout).await) });
            }
        }

        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(error = %e, "Connectivity probe task failed"),
            }
        }
        results.sort_unstable();

        // Lock order: nodes, then connections.
        let members = self.nodes.read().await;
        results.retain(|((a, b), _)| members.contains_key(a) && members.contains_key(b));
        let mut connections = self.connections.write().await;
        let mut current = BTreeSet::new();
        for ((a, b), connected) in results {
            if connected {
                current.insert((a, b));
            }
            if connected != connections.contains(&(a, b)) {
                tracing::info!(a, b, connected, "Connectivity changed");
                let _ = self
                    .events
                    .send(ClusterEvent::ConnectivityChanged { a, b, connected });
            }
        }
        *connections = current;
    }
}

/// Probe `target` on behalf of `from_id`. `true` if a response arrives within `timeout`.
async fn check_connection(from_id: NodeId, target: &PeerAddr, timeout: Duration) -> bool {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to bind probe socket");
            return false;
        }
    };

    let bytes = match codec::encode(&Message::probe(from_id)) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode probe");
            return false;
        }
    };

    if let Err(e) = socket
        .send_to(&bytes, (target.host.as_str(), target.port))
        .await
    {
        tracing::debug!(from_id, target = %target, error = %e, "Probe send failed");
        return false;
    }

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => matches!(
            codec::decode(&buf[..len]),
            Ok(Message::ConnectivityProbeResponse { .. })
        ),
        Ok(Err(e)) => {
            tracing::debug!(from_id, target = %target, error = %e, "Probe receive failed");
            false
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_order_independent() {
        assert_eq!(link(3, 1), (1, 3));
        assert_eq!(link(1, 3), (1, 3));
        assert_eq!(link(2, 2), (2, 2));
    }

    #[tokio::test]
    async fn unreachable_target_is_disconnected() {
        // Bound but silent: never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = PeerAddr::new("127.0.0.1", silent.local_addr().unwrap().port());
        assert!(!check_connection(0, &target, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn responder_is_connected() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = PeerAddr::new("127.0.0.1", responder.local_addr().unwrap().port());

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            let (_, from) = responder.recv_from(&mut buf).await.unwrap();
            let reply = codec::encode(&Message::probe_response(1)).unwrap();
            responder.send_to(&reply, from).await.unwrap();
        });

        assert!(check_connection(0, &target, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn remove_node_drops_its_links() {
        let (tx, _rx) = crate::events::channel();
        let monitor = ConnectivityMonitor::new(TimingConfig::default(), tx);
        monitor
            .connections
            .write()
            .await
            .extend([(0, 1), (1, 2), (0, 2)]);

        monitor.remove_node(1).await;
        let links: Vec<Link> = monitor.active_connections().await.into_iter().collect();
        assert_eq!(links, vec![(0, 2)]);
    }

    #[tokio::test]
    async fn set_nodes_prunes_stale_links() {
        let (tx, _rx) = crate::events::channel();
        let monitor = ConnectivityMonitor::new(TimingConfig::default(), tx);
        monitor
            .connections
            .write()
            .await
            .extend([(0, 1), (1, 2), (0, 2)]);

        let kept: BTreeMap<NodeId, PeerAddr> = [
            (0, PeerAddr::new("127.0.0.1", 5000)),
            (2, PeerAddr::new("127.0.0.1", 5002)),
        ]
        .into_iter()
        .collect();
        monitor.set_nodes(kept).await;
        let links: Vec<Link> = monitor.active_connections().await.into_iter().collect();
        assert_eq!(links, vec![(0, 2)]);

        monitor.set_nodes(BTreeMap::new()).await;
        assert!(monitor.active_connections().await.is_empty());
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let (tx, _rx) = crate::events::channel();
        let monitor = ConnectivityMonitor::new(TimingConfig::default(), tx);
        monitor.stop().await;
        assert!(!monitor.is_running().await);
    }
}
