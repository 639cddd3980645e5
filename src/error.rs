use thiserror::Error;

use crate::identity::NodeId;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Address already in use: {addr}")]
    AddressInUse {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send to {peer}: {source}")]
    SendFailure {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("Message of {size} bytes exceeds the {max} byte datagram limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Transport closed")]
    Closed,

    #[error("Node {0} was already started")]
    AlreadyStarted(NodeId),

    #[error("Node {0} is stopped")]
    NodeStopped(NodeId),

    #[error("Duplicate node identifier: {0}")]
    DuplicateIdentifier(NodeId),

    #[error("Invalid peer: {0}")]
    InvalidPeer(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("No live nodes")]
    NoLiveNodes,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
