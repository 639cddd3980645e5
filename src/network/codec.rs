//! Wire format for swarm datagrams.
//!
//! Messages are JSON objects with a `type` discriminator:
//!
//! ```text
//! {"type":"heartbeat","master_id":4,"timestamp":1700000000.25}
//! {"type":"master_election","proposed_master":7,"timestamp":1700000001.5}
//! {"type":"connectivity_test","from_id":2,"timestamp":1700000002.0}
//! {"type":"connectivity_test_response","from_id":3,"timestamp":1700000002.1}
//! ```
//!
//! Every encoded message must fit in one datagram of [`MAX_DATAGRAM_SIZE`] bytes.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwarmError};
use crate::identity::NodeId;

/// Largest datagram a node sends or reads.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Leader liveness broadcast.
    Heartbeat {
        #[serde(rename = "master_id")]
        leader_id: NodeId,
        timestamp: f64,
    },
    /// Candidacy broadcast. Forwarded unchanged by lower-id nodes.
    #[serde(rename = "master_election")]
    ElectionProposal {
        #[serde(rename = "proposed_master")]
        proposed_id: NodeId,
        timestamp: f64,
    },
    /// Out-of-band reachability check.
    #[serde(rename = "connectivity_test")]
    ConnectivityProbe { from_id: NodeId, timestamp: f64 },
    #[serde(rename = "connectivity_test_response")]
    ConnectivityProbeResponse { from_id: NodeId, timestamp: f64 },
}

impl Message {
    pub fn heartbeat(leader_id: NodeId) -> Self {
        Message::Heartbeat {
            leader_id,
            timestamp: now_timestamp(),
        }
    }

    pub fn proposal(proposed_id: NodeId) -> Self {
        Message::ElectionProposal {
            proposed_id,
            timestamp: now_timestamp(),
        }
    }

    pub fn probe(from_id: NodeId) -> Self {
        Message::ConnectivityProbe {
            from_id,
            timestamp: now_timestamp(),
        }
    }

    pub fn probe_response(from_id: NodeId) -> Self {
        Message::ConnectivityProbeResponse {
            from_id,
            timestamp: now_timestamp(),
        }
    }

    /// Wire discriminator, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Heartbeat { .. } => "heartbeat",
            Message::ElectionProposal { .. } => "master_election",
            Message::ConnectivityProbe { .. } => "connectivity_test",
            Message::ConnectivityProbeResponse { .. } => "connectivity_test_response",
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            Message::Heartbeat { timestamp, .. }
            | Message::ElectionProposal { timestamp, .. }
            | Message::ConnectivityProbe { timestamp, .. }
            | Message::ConnectivityProbeResponse { timestamp, .. } => *timestamp,
        }
    }
}

/// Seconds since the Unix epoch, with microsecond precision.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(SwarmError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Message> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(SwarmError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn roundtrip(message: Message) {
        let bytes = encode(&message).unwrap();
        assert!(bytes.len() <= MAX_DATAGRAM_SIZE);
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn all_kinds_roundtrip() {
        roundtrip(Message::Heartbeat {
            leader_id: 9,
            timestamp: 1_700_000_000.125,
        });
        roundtrip(Message::ElectionProposal {
            proposed_id: NodeId::MAX,
            timestamp: 0.0,
        });
        roundtrip(Message::ConnectivityProbe {
            from_id: 0,
            timestamp: 1.5e9,
        });
        roundtrip(Message::probe_response(42));
    }

    #[test]
    fn wire_field_names_match_protocol() {
        let bytes = encode(&Message::Heartbeat {
            leader_id: 3,
            timestamp: 10.5,
        })
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["master_id"], 3);
        assert_eq!(value["timestamp"], 10.5);

        let bytes = encode(&Message::ElectionProposal {
            proposed_id: 7,
            timestamp: 1.0,
        })
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "master_election");
        assert_eq!(value["proposed_master"], 7);

        let value: Value = serde_json::from_slice(&encode(&Message::probe(2)).unwrap()).unwrap();
        assert_eq!(value["type"], "connectivity_test");
        assert_eq!(value["from_id"], 2);
    }

    #[test]
    fn decodes_foreign_encoding() {
        let raw = br#"{"type": "master_election", "proposed_master": 5, "timestamp": 1712345678.9}"#;
        assert_eq!(
            decode(raw).unwrap(),
            Message::ElectionProposal {
                proposed_id: 5,
                timestamp: 1712345678.9
            }
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            decode(b"not json"),
            Err(SwarmError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode(br#"{"type":"gossip","timestamp":1.0}"#),
            Err(SwarmError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode(br#"{"type":"heartbeat","timestamp":1.0}"#),
            Err(SwarmError::MalformedMessage(_))
        ));
    }

    #[test]
    fn oversized_datagram_is_rejected() {
        let bytes = vec![b' '; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            decode(&bytes),
            Err(SwarmError::MessageTooLarge { size, .. }) if size == MAX_DATAGRAM_SIZE + 1
        ));
    }

    #[test]
    fn constructors_stamp_current_time() {
        let before = now_timestamp();
        let message = Message::heartbeat(1);
        assert!(message.timestamp() >= before);
        assert_eq!(message.kind(), "heartbeat");
    }
}
