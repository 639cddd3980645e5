use serde::Serialize;
use tokio::sync::mpsc;

use crate::identity::NodeId;

/// Notifications raised by nodes and the connectivity monitor.
///
/// Transient send and decode failures never become events; they are only
/// logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// `node_id` now believes `leader_id` is the leader.
    LeadershipChanged { node_id: NodeId, leader_id: NodeId },
    /// `node_id` stopped on its own or was killed.
    NodeDied { node_id: NodeId },
    /// Reachability between `a` and `b` (`a < b`) changed.
    ConnectivityChanged { a: NodeId, b: NodeId, connected: bool },
    /// A connectivity cycle started at local wall-clock `at` (`HH:MM:SS`).
    MonitoringUpdate { at: String },
}

pub type EventSender = mpsc::UnboundedSender<ClusterEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClusterEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
