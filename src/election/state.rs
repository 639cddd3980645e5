use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::identity::NodeId;

/// How many recent proposals a node remembers for duplicate suppression.
const SEEN_PROPOSAL_CAPACITY: usize = 128;

/// Candidate lifetime when none is configured; matches the default heartbeat timeout.
const DEFAULT_CANDIDATE_TTL: Duration = Duration::from_secs(3);

/// Node role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Identity of one circulating proposal: the proposed id plus the origin's
/// timestamp, which forwarding leaves untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProposalKey {
    proposed_id: NodeId,
    timestamp_bits: u64,
}

/// Mutable election state of one node.
///
/// Shared by the listener (which records heartbeats and proposals) and the
/// periodic loop (which reads heartbeat staleness), so it always lives behind
/// a lock.
///
/// # Invariants
///
/// - A leader's `leader_id` is its own identifier
/// - `candidate` never decreases while the highest candidate keeps proposing;
///   once it has not been heard from for `candidate_ttl` it is forgotten
/// - Each `(proposed_id, timestamp)` proposal is acted on at most once while
///   it is remembered
#[derive(Debug)]
pub struct ElectionState {
    pub role: Role,

    /// Leader this node currently believes in, if any.
    pub leader_id: Option<NodeId>,

    /// When the last heartbeat was accepted (or monitoring started).
    pub last_heartbeat: Instant,

    /// When this node last broadcast its own proposal.
    pub last_self_proposal: Option<Instant>,

    // Highest identifier proposed or forwarded since the last heartbeat, and
    // when it was last heard.
    candidate: Option<(NodeId, Instant)>,
    candidate_ttl: Duration,

    seen_proposals: VecDeque<ProposalKey>,
}

impl ElectionState {
    pub fn new(my_id: NodeId, role: Role, now: Instant) -> Self {
        Self {
            role,
            leader_id: match role {
                Role::Leader => Some(my_id),
                Role::Follower => None,
            },
            last_heartbeat: now,
            last_self_proposal: None,
            candidate: None,
            candidate_ttl: DEFAULT_CANDIDATE_TTL,
            seen_proposals: VecDeque::with_capacity(SEEN_PROPOSAL_CAPACITY),
        }
    }

    /// How long a candidate is remembered without being heard again.
    pub fn with_candidate_ttl(mut self, ttl: Duration) -> Self {
        self.candidate_ttl = ttl;
        self
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Transition to leader. Returns `true` if the role changed.
    pub fn become_leader(&mut self, my_id: NodeId) -> bool {
        let changed = self.role != Role::Leader;
        self.role = Role::Leader;
        self.leader_id = Some(my_id);
        self.candidate = None;
        changed
    }

    /// Accept a heartbeat. Returns `true` if the believed leader changed.
    pub fn record_heartbeat(&mut self, leader_id: NodeId, now: Instant) -> bool {
        self.last_heartbeat = now;
        self.candidate = None;
        if self.leader_id == Some(leader_id) {
            return false;
        }
        self.leader_id = Some(leader_id);
        true
    }

    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }

    /// Strictly older than `timeout`.
    pub fn is_heartbeat_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.heartbeat_age(now) > timeout
    }

    /// Highest identifier proposed or forwarded since the last heartbeat,
    /// unless it has gone quiet for longer than the candidate TTL.
    pub fn candidate(&self) -> Option<NodeId> {
        self.candidate_at(Instant::now())
    }

    /// Current candidate as of `now`, ignoring one that has gone quiet.
    pub fn candidate_at(&self, now: Instant) -> Option<NodeId> {
        self.candidate
            .filter(|&(_, heard)| now.saturating_duration_since(heard) <= self.candidate_ttl)
            .map(|(id, _)| id)
    }

    /// Record that `id` was proposed or forwarded at `now`.
    pub fn note_candidate(&mut self, id: NodeId, now: Instant) {
        self.candidate = match self.candidate_at(now) {
            Some(current) if current > id => self.candidate,
            _ => Some((id, now)),
        };
    }

    /// Whether a live candidate above `id` is circulating.
    pub fn knows_higher_candidate(&self, id: NodeId, now: Instant) -> bool {
        self.candidate_at(now).is_some_and(|c| c > id)
    }

    /// Remember a proposal. Returns `false` if it was already seen.
    pub fn mark_proposal_seen(&mut self, proposed_id: NodeId, timestamp: f64) -> bool {
        let key = ProposalKey {
            proposed_id,
            timestamp_bits: timestamp.to_bits(),
        };
        if self.seen_proposals.contains(&key) {
            return false;
        }
        if self.seen_proposals.len() == SEEN_PROPOSAL_CAPACITY {
            self.seen_proposals.pop_front();
        }
        self.seen_proposals.push_back(key);
        true
    }

    /// Whether enough time passed since this node's last own proposal.
    pub fn can_self_propose(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_self_proposal {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= cooldown,
        }
    }
}
