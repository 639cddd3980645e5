use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::error::{Result, SwarmError};
use crate::events::{self, ClusterEvent, EventReceiver, EventSender};
use crate::identity::NodeId;
use crate::monitor::{ConnectivityMonitor, Link};
use crate::network::PeerAddr;
use crate::node::{Node, NodeStatus};

/// How many events [`Cluster::recent_events`] keeps.
const EVENT_HISTORY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub leader_id: Option<NodeId>,
    pub active_nodes: usize,
    pub nodes: Vec<NodeStatus>,
    pub connections: Vec<Link>,
}

/// Supervisor for a set of in-process nodes.
///
/// Nodes only detect leader loss and flood proposals; leadership itself is
/// assigned here. When the leader dies the supervisor promotes the highest
/// remaining identifier.
pub struct Cluster {
    config: ClusterConfig,
    nodes: RwLock<BTreeMap<NodeId, Arc<Node>>>,
    leader: RwLock<Option<NodeId>>,
    monitor: ConnectivityMonitor,
    monitor_enabled: bool,
    events: EventSender,
    observers: broadcast::Sender<ClusterEvent>,
    history: Mutex<VecDeque<ClusterEvent>>,
    /// Serializes death handling and restore.
    membership: Mutex<()>,
    shutdown: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    /// Bind and start every configured node.
    ///
    /// # Errors
    ///
    /// Fails if identifiers collide or any node cannot bind; nodes already
    /// bound are torn down first.
    pub async fn start(config: ClusterConfig, monitor_enabled: bool) -> Result<Arc<Self>> {
        let (tx, rx) = events::channel();
        let (observers, _) = broadcast::channel(EVENT_HISTORY);

        let cluster = Arc::new(Self {
            monitor: ConnectivityMonitor::new(config.timing.clone(), tx.clone()),
            config,
            nodes: RwLock::new(BTreeMap::new()),
            leader: RwLock::new(None),
            monitor_enabled,
            events: tx,
            observers,
            history: Mutex::new(VecDeque::with_capacity(EVENT_HISTORY)),
            membership: Mutex::new(()),
            shutdown: CancellationToken::new(),
            pump: Mutex::new(None),
        });

        let pump = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                cluster.event_pump(rx).await;
            })
        };
        *cluster.pump.lock().await = Some(pump);

        if let Err(e) = cluster.build_nodes().await {
            cluster.shutdown().await;
            return Err(e);
        }

        if cluster.monitor_enabled {
            cluster.monitor.start(cluster.node_addrs().await).await;
        }

        Ok(cluster)
    }

    async fn build_nodes(&self) -> Result<()> {
        let configs = self.config.node_configs()?;
        let leader = configs.iter().find(|c| c.initial_leader).map(|c| c.node_id);

        let mut bound = Vec::with_capacity(configs.len());
        for config in configs {
            match Node::bind(config, self.events.clone()).await {
                Ok(node) => bound.push(node),
                Err(e) => {
                    for node in &bound {
                        node.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        for node in &bound {
            if let Err(e) = node.start().await {
                for node in &bound {
                    node.shutdown().await;
                }
                return Err(e);
            }
        }

        let mut nodes = self.nodes.write().await;
        nodes.clear();
        nodes.extend(bound.into_iter().map(|node| (node.id, node)));
        *self.leader.write().await = leader;

        tracing::info!(nodes = nodes.len(), leader = ?leader, "Cluster started");
        Ok(())
    }

    async fn node_addrs(&self) -> BTreeMap<NodeId, PeerAddr> {
        self.nodes
            .read()
            .await
            .values()
            .map(|node| {
                let cfg = node.config();
                (node.id, PeerAddr::new(cfg.host.clone(), cfg.port))
            })
            .collect()
    }

    async fn event_pump(self: Arc<Self>, mut rx: EventReceiver) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let ClusterEvent::NodeDied { node_id } = event {
                self.handle_node_died(node_id).await;
            }

            {
                let mut history = self.history.lock().await;
                if history.len() == EVENT_HISTORY {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
            let _ = self.observers.send(event);
        }
    }

    /// Drop a dead node and, if it led, promote the highest remaining id.
    async fn handle_node_died(&self, node_id: NodeId) {
        let _membership = self.membership.lock().await;
        {
            let mut nodes = self.nodes.write().await;
            // A node rebuilt by `restore` may reuse the id of one that died earlier.
            match nodes.get(&node_id) {
                Some(node) if !node.is_alive() => {
                    nodes.remove(&node_id);
                }
                _ => return,
            }
        }
        self.monitor.remove_node(node_id).await;
        tracing::info!(node_id, "Node removed from cluster");

        let was_leader = *self.leader.read().await == Some(node_id);
        if was_leader {
            self.reelect().await;
        }
    }

    async fn reelect(&self) -> Option<NodeId> {
        let next = {
            let nodes = self.nodes.read().await;
            nodes
                .iter()
                .rev()
                .find(|(_, node)| node.is_alive())
                .map(|(id, node)| (*id, node.clone()))
        };

        let Some((id, node)) = next else {
            tracing::warn!("No nodes left to lead");
            *self.leader.write().await = None;
            return None;
        };

        *self.leader.write().await = Some(id);
        node.promote().await;
        tracing::info!(leader_id = id, "Elected highest remaining node");
        Some(id)
    }

    /// Kill one node.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if `node_id` is not a live member.
    pub async fn kill_node(&self, node_id: NodeId) -> Result<()> {
        let node = self
            .nodes
            .read()
            .await
            .get(&node_id)
            .cloned()
            .ok_or(SwarmError::NodeNotFound(node_id))?;

        node.stop();
        node.join().await;
        self.handle_node_died(node_id).await;
        Ok(())
    }

    /// Kill the current leader and return its id.
    pub async fn kill_leader(&self) -> Result<NodeId> {
        let leader = (*self.leader.read().await).ok_or(SwarmError::NoLiveNodes)?;
        self.kill_node(leader).await?;
        Ok(leader)
    }

    /// Kill a uniformly random node and return its id.
    pub async fn kill_random(&self) -> Result<NodeId> {
        let ids: Vec<NodeId> = self.nodes.read().await.keys().copied().collect();
        let victim = *ids
            .choose(&mut rand::thread_rng())
            .ok_or(SwarmError::NoLiveNodes)?;
        self.kill_node(victim).await?;
        Ok(victim)
    }

    /// Tear every node down and rebuild the configured cluster.
    ///
    /// # Errors
    ///
    /// Fails if a node cannot bind; the cluster is then left empty with no
    /// leader.
    pub async fn restore(&self) -> Result<()> {
        let _membership = self.membership.lock().await;
        let old: Vec<Arc<Node>> = {
            let mut nodes = self.nodes.write().await;
            let old = nodes.values().cloned().collect();
            nodes.clear();
            old
        };
        *self.leader.write().await = None;
        self.monitor.set_nodes(BTreeMap::new()).await;
        for node in old {
            node.shutdown().await;
        }

        self.build_nodes().await?;
        if self.monitor_enabled {
            self.monitor.set_nodes(self.node_addrs().await).await;
        }
        tracing::info!("Cluster restored");
        Ok(())
    }

    pub async fn leader_id(&self) -> Option<NodeId> {
        *self.leader.read().await
    }

    pub async fn node(&self, node_id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().await.get(&node_id).cloned()
    }

    pub async fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.read().await.keys().copied().collect()
    }

    pub async fn status(&self) -> ClusterStatus {
        let nodes: Vec<Arc<Node>> = self.nodes.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(nodes.len());
        for node in &nodes {
            statuses.push(node.status().await);
        }

        ClusterStatus {
            leader_id: self.leader_id().await,
            active_nodes: statuses.len(),
            nodes: statuses,
            connections: self.monitor.active_connections().await.into_iter().collect(),
        }
    }

    /// Oldest first.
    pub async fn recent_events(&self) -> Vec<ClusterEvent> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Receive every event after it has been applied to the cluster.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.observers.subscribe()
    }

    pub async fn shutdown(&self) {
        self.monitor.stop().await;

        let nodes: Vec<Arc<Node>> = {
            let mut nodes = self.nodes.write().await;
            let drained = nodes.values().cloned().collect();
            nodes.clear();
            drained
        };
        for node in nodes {
            node.shutdown().await;
        }

        self.shutdown.cancel();
        if let Some(pump) = self.pump.lock().await.take() {
            let _ = pump.await;
        }
        tracing::info!("Cluster shut down");
    }
}
