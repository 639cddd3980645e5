use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use crate::election::state::{ElectionState, Role};
use crate::identity::NodeId;
use crate::network::Message;

/// What a node must send after handling an input.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send to every registered peer.
    Broadcast(Message),
    /// Send to one address (the source of a probe).
    Reply { to: SocketAddr, message: Message },
}

/// Result of feeding one input into the election state machine.
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    pub actions: Vec<Action>,
    /// Set when the believed leader changed.
    pub leader_changed: Option<NodeId>,
}

impl Outcome {
    fn broadcast(message: Message) -> Self {
        Self {
            actions: vec![Action::Broadcast(message)],
            leader_changed: None,
        }
    }
}

/// Highest-identifier-wins comparison of a received proposal against this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalDecision {
    /// The proposal outranks us: flood it onward unchanged.
    Forward,
    /// We outrank the proposal: assert ourselves instead.
    CounterPropose,
    /// Our own proposal came back.
    Ignore,
}

pub fn compare_proposal(my_id: NodeId, proposed_id: NodeId) -> ProposalDecision {
    match proposed_id.cmp(&my_id) {
        std::cmp::Ordering::Greater => ProposalDecision::Forward,
        std::cmp::Ordering::Less => ProposalDecision::CounterPropose,
        std::cmp::Ordering::Equal => ProposalDecision::Ignore,
    }
}

/// Handle one inbound datagram.
///
/// `cooldown` bounds how often this node re-broadcasts its own candidacy.
pub fn handle_message(
    state: &mut ElectionState,
    my_id: NodeId,
    message: &Message,
    from: SocketAddr,
    now: Instant,
    cooldown: Duration,
) -> Outcome {
    match message {
        Message::Heartbeat { leader_id, .. } => handle_heartbeat(state, my_id, *leader_id, now),
        Message::ElectionProposal {
            proposed_id,
            timestamp,
        } => handle_proposal(state, my_id, message, *proposed_id, *timestamp, now, cooldown),
        Message::ConnectivityProbe { from_id, .. } => {
            tracing::trace!(node_id = my_id, from_id, %from, "Answering connectivity probe");
            Outcome {
                actions: vec![Action::Reply {
                    to: from,
                    message: Message::probe_response(my_id),
                }],
                leader_changed: None,
            }
        }
        Message::ConnectivityProbeResponse { .. } => Outcome::default(),
    }
}

fn handle_heartbeat(
    state: &mut ElectionState,
    my_id: NodeId,
    leader_id: NodeId,
    now: Instant,
) -> Outcome {
    if state.role == Role::Leader {
        if leader_id != my_id {
            tracing::debug!(node_id = my_id, other_leader = leader_id, "Ignoring heartbeat while leader");
        }
        return Outcome::default();
    }

    let changed = state.record_heartbeat(leader_id, now);
    if changed {
        tracing::info!(node_id = my_id, leader_id, "Leader changed");
    } else {
        tracing::trace!(node_id = my_id, leader_id, "Heartbeat received");
    }

    Outcome {
        actions: Vec::new(),
        leader_changed: changed.then_some(leader_id),
    }
}

fn handle_proposal(
    state: &mut ElectionState,
    my_id: NodeId,
    message: &Message,
    proposed_id: NodeId,
    timestamp: f64,
    now: Instant,
    cooldown: Duration,
) -> Outcome {
    if state.role == Role::Leader {
        return Outcome::default();
    }
    if !state.mark_proposal_seen(proposed_id, timestamp) {
        tracing::trace!(node_id = my_id, proposed_id, "Duplicate proposal dropped");
        return Outcome::default();
    }

    match compare_proposal(my_id, proposed_id) {
        ProposalDecision::Forward => {
            state.note_candidate(proposed_id, now);
            tracing::debug!(node_id = my_id, proposed_id, "Forwarding higher proposal");
            Outcome::broadcast(message.clone())
        }
        ProposalDecision::CounterPropose => {
            if state.knows_higher_candidate(my_id, now) {
                tracing::trace!(
                    node_id = my_id,
                    proposed_id,
                    candidate = ?state.candidate_at(now),
                    "Lower proposal ignored, higher candidate already circulating"
                );
                return Outcome::default();
            }
            if !state.can_self_propose(now, cooldown) {
                return Outcome::default();
            }
            tracing::debug!(node_id = my_id, proposed_id, "Counter-proposing self");
            Outcome::broadcast(propose_self(state, my_id, now))
        }
        ProposalDecision::Ignore => Outcome::default(),
    }
}

/// Follower staleness check, run once per monitor poll.
///
/// Returns this node's proposal when the leader's heartbeat is older than
/// `timeout`.
pub fn check_heartbeat_timeout(
    state: &mut ElectionState,
    my_id: NodeId,
    now: Instant,
    timeout: Duration,
) -> Option<Message> {
    if state.role != Role::Follower || !state.is_heartbeat_stale(now, timeout) {
        return None;
    }

    tracing::info!(
        node_id = my_id,
        elapsed_ms = state.heartbeat_age(now).as_millis() as u64,
        "Leader heartbeat timed out, proposing self"
    );
    Some(propose_self(state, my_id, now))
}

fn propose_self(state: &mut ElectionState, my_id: NodeId, now: Instant) -> Message {
    let message = Message::proposal(my_id);
    state.note_candidate(my_id, now);
    state.last_self_proposal = Some(now);
    state.mark_proposal_seen(my_id, message.timestamp());
    message
}
