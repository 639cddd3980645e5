//! Datagram plumbing shared by every node.
//!
//! - [`codec`]: the four wire message kinds and their JSON encoding
//! - [`registry`]: static identifier → address book
//! - [`transport`]: one bound UDP socket per node

pub mod codec;
pub mod registry;
pub mod transport;

pub use codec::{Message, MAX_DATAGRAM_SIZE};
pub use registry::{PeerAddr, PeerRegistry};
pub use transport::Transport;
