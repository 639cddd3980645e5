use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::election::{check_heartbeat_timeout, handle_message, Action, ElectionState, Role};
use crate::error::{Result, SwarmError};
use crate::events::{ClusterEvent, EventSender};
use crate::identity::NodeId;
use crate::network::{Message, PeerRegistry, Transport};

/// Consecutive socket errors after which the listener gives up on the node.
const MAX_CONSECUTIVE_RECEIVE_ERRORS: u32 = 16;

/// Why a node is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// Explicit kill by an operator or supervisor.
    Killed,
    /// The node detected an unrecoverable socket fault.
    Fault,
    /// Part of a cluster-wide teardown; nobody needs to be told.
    Teardown,
}

impl StopCause {
    fn notifies(self) -> bool {
        !matches!(self, StopCause::Teardown)
    }
}

/// Point-in-time view of a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub address: String,
    pub role: String,
    pub leader_id: Option<NodeId>,
    pub candidate: Option<NodeId>,
    pub alive: bool,
}

/// One swarm member: a bound transport, its peers, and the election state the
/// background tasks share.
///
/// # Lifecycle
///
/// 1. [`Node::bind`] builds the peer registry and binds the socket
/// 2. [`Node::start`] spawns the listener and the periodic loop (once)
/// 3. [`Node::stop`] / [`Node::stop_with`] flips `alive` to false exactly once,
///    closes the transport and, unless tearing down, raises `NodeDied`
/// 4. [`Node::join`] waits for both tasks with a bounded timeout
///
/// The periodic loop sends heartbeats while the node leads and checks
/// heartbeat staleness while it follows.
pub struct Node {
    pub id: NodeId,
    pub state: Arc<RwLock<ElectionState>>,
    config: NodeConfig,
    peers: Arc<PeerRegistry>,
    transport: Arc<Transport>,
    events: EventSender,
    alive: AtomicBool,
    started: AtomicBool,
    shutdown: CancellationToken,
    wake: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Build the peer registry and bind the node's socket.
    ///
    /// # Errors
    ///
    /// Fails if the configured peers are invalid or the address is still in
    /// use after one retry.
    pub async fn bind(config: NodeConfig, events: EventSender) -> Result<Arc<Self>> {
        let peers = PeerRegistry::from_config(&config)?;
        let transport =
            Transport::bind(&config.listen_addr(), config.timing.bind_retry_delay()).await?;

        let role = if config.initial_leader {
            Role::Leader
        } else {
            Role::Follower
        };

        tracing::info!(
            node_id = config.node_id,
            addr = %transport.local_addr(),
            role = %role,
            peers = peers.len(),
            "Node bound"
        );

        Ok(Arc::new(Self {
            id: config.node_id,
            state: Arc::new(RwLock::new(
                ElectionState::new(config.node_id, role, Instant::now())
                    .with_candidate_ttl(config.timing.heartbeat_timeout()),
            )),
            config,
            peers: Arc::new(peers),
            transport: Arc::new(transport),
            events,
            alive: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            wake: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the listener and the periodic loop.
    ///
    /// # Errors
    ///
    /// - `AlreadyStarted` on any call after the first
    /// - `NodeStopped` if the node was stopped before starting
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.is_alive() {
            return Err(SwarmError::NodeStopped(self.id));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SwarmError::AlreadyStarted(self.id));
        }

        // Followers measure heartbeat staleness from the moment they start listening.
        self.state.write().await.last_heartbeat = Instant::now();

        let listener = {
            let node = self.clone();
            tokio::spawn(async move {
                node.listen_loop().await;
            })
        };

        let periodic = {
            let node = self.clone();
            tokio::spawn(async move {
                node.periodic_loop().await;
            })
        };

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([listener, periodic]);

        tracing::info!(node_id = self.id, "Node started");
        Ok(())
    }

    /// Kill the node. Returns `true` only for the call that stopped it.
    pub fn stop(&self) -> bool {
        self.stop_with(StopCause::Killed)
    }

    /// Stop the node for `cause`. Safe to call concurrently and repeatedly;
    /// only the first call closes the transport and raises `NodeDied`.
    pub fn stop_with(&self, cause: StopCause) -> bool {
        if self
            .alive
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::trace!(node_id = self.id, ?cause, "Node already stopped");
            return false;
        }

        self.shutdown.cancel();
        self.transport.close();
        tracing::info!(node_id = self.id, ?cause, "Node stopped");

        if cause.notifies() {
            self.emit(ClusterEvent::NodeDied { node_id: self.id });
        }
        true
    }

    /// Wait for the background tasks to finish, aborting any that outlive
    /// the configured join timeout.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let timeout = self.config.timing.shutdown_join_timeout();
        for mut handle in handles {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                tracing::warn!(
                    node_id = self.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Task did not finish in time, aborting"
                );
                handle.abort();
            }
        }
    }

    /// Stop without raising `NodeDied` and wait for the tasks.
    pub async fn shutdown(&self) {
        self.stop_with(StopCause::Teardown);
        self.join().await;
    }

    /// Make this node the leader. Used by external re-election.
    ///
    /// Returns `true` if the role changed.
    pub async fn promote(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        let changed = self.state.write().await.become_leader(self.id);
        if changed {
            tracing::info!(node_id = self.id, "Promoted to leader");
            self.emit(ClusterEvent::LeadershipChanged {
                node_id: self.id,
                leader_id: self.id,
            });
            self.wake.notify_one();
        }
        changed
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub async fn role(&self) -> Role {
        self.state.read().await.role
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.is_leader()
    }

    pub async fn leader_id(&self) -> Option<NodeId> {
        self.state.read().await.leader_id
    }

    /// Highest identifier this node proposed or forwarded since its last heartbeat.
    pub async fn candidate(&self) -> Option<NodeId> {
        self.state.read().await.candidate()
    }

    pub async fn last_heartbeat(&self) -> Instant {
        self.state.read().await.last_heartbeat
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.state.read().await;
        NodeStatus {
            node_id: self.id,
            address: self.config.listen_addr(),
            role: state.role.to_string(),
            leader_id: state.leader_id,
            candidate: state.candidate(),
            alive: self.is_alive(),
        }
    }

    fn emit(&self, event: ClusterEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(node_id = self.id, "No event observer attached");
        }
    }

    async fn listen_loop(self: Arc<Self>) {
        let mut consecutive_errors = 0u32;

        loop {
            match self.transport.receive().await {
                Ok((message, from)) => {
                    consecutive_errors = 0;
                    self.handle_inbound(message, from).await;
                }
                Err(SwarmError::Closed) => break,
                Err(e @ (SwarmError::MalformedMessage(_) | SwarmError::MessageTooLarge { .. })) => {
                    if self.is_alive() {
                        tracing::warn!(node_id = self.id, error = %e, "Dropping undecodable datagram");
                    }
                }
                Err(e) => {
                    if !self.is_alive() {
                        break;
                    }
                    consecutive_errors += 1;
                    tracing::warn!(
                        node_id = self.id,
                        error = %e,
                        consecutive_errors,
                        "Receive failed"
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_RECEIVE_ERRORS {
                        tracing::error!(node_id = self.id, "Socket keeps failing, stopping node");
                        self.stop_with(StopCause::Fault);
                        break;
                    }
                }
            }
        }

        tracing::debug!(node_id = self.id, "Listener exited");
    }

    async fn handle_inbound(&self, message: Message, from: SocketAddr) {
        let outcome = {
            let mut state = self.state.write().await;
            handle_message(
                &mut state,
                self.id,
                &message,
                from,
                Instant::now(),
                self.config.timing.monitor_poll_interval(),
            )
        };

        if let Some(leader_id) = outcome.leader_changed {
            self.emit(ClusterEvent::LeadershipChanged {
                node_id: self.id,
                leader_id,
            });
        }

        for action in outcome.actions {
            match action {
                Action::Broadcast(message) => self.broadcast(&message).await,
                Action::Reply { to, message } => {
                    if let Err(e) = self.transport.send_to_addr(to, &message).await {
                        if self.is_alive() {
                            tracing::warn!(node_id = self.id, to = %to, error = %e, "Reply failed");
                        }
                    }
                }
            }
        }
    }

    async fn periodic_loop(self: Arc<Self>) {
        while self.is_alive() {
            let role = self.state.read().await.role;

            let period = match role {
                Role::Leader => {
                    self.broadcast(&Message::heartbeat(self.id)).await;
                    self.config.timing.heartbeat_interval()
                }
                Role::Follower => {
                    let proposal = {
                        let mut state = self.state.write().await;
                        check_heartbeat_timeout(
                            &mut state,
                            self.id,
                            Instant::now(),
                            self.config.timing.heartbeat_timeout(),
                        )
                    };
                    if let Some(proposal) = proposal {
                        self.broadcast(&proposal).await;
                    }
                    self.config.timing.monitor_poll_interval()
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(period) => {}
            }
        }

        tracing::debug!(node_id = self.id, "Periodic loop exited");
    }

    /// Send to every peer. Per-peer failures are logged and skipped.
    async fn broadcast(&self, message: &Message) {
        for (peer_id, addr) in self.peers.iter() {
            match self.transport.send_to_peer(addr, message).await {
                Ok(()) => {}
                Err(SwarmError::Closed) => return,
                Err(e) => {
                    if self.is_alive() {
                        tracing::warn!(
                            node_id = self.id,
                            peer_id,
                            kind = message.kind(),
                            error = %e,
                            "Send failed"
                        );
                    }
                }
            }
        }
    }
}
