//! Heartbeat and highest-identifier election state machine.
//!
//! Pure logic only: the handlers take the current state plus an input and
//! return the datagrams to send. [`crate::node::Node`] owns the locking,
//! the timers and the transport.

pub mod handler;
pub mod state;

pub use handler::{check_heartbeat_timeout, compare_proposal, handle_message, Action, Outcome, ProposalDecision};
pub use state::{ElectionState, Role};
