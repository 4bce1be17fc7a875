//! Wire frames exchanged between bus clients and the realtime backend.
//!
//! Frames are JSON objects tagged by `type`. Requests from the client carry a `ref` that the
//! backend echoes in its `ack`/`nack` so acknowledgements can be correlated.

use crate::raffle::{ParticipantPresence, RaffleId, RaffleRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic channel name for one raffle instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn for_raffle(id: RaffleId) -> Self {
        Self(format!("raffle:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Restricts change events to a single record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFilter {
    pub record_id: RaffleId,
}

impl ChangeFilter {
    pub fn record(record_id: RaffleId) -> Self {
        Self { record_id }
    }

    pub fn matches(&self, record: &RaffleRecord) -> bool {
        record.id() == self.record_id
    }
}

/// Connection status of a channel subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Active,
    Closed,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        #[serde(rename = "ref")]
        reference: u64,
        filter: ChangeFilter,
    },
    Track {
        #[serde(rename = "ref")]
        reference: u64,
        presence: ParticipantPresence,
    },
    Untrack {
        #[serde(rename = "ref")]
        reference: u64,
    },
    Leave {
        #[serde(rename = "ref")]
        reference: u64,
    },
}

impl ClientFrame {
    pub fn reference(&self) -> u64 {
        match self {
            ClientFrame::Subscribe { reference, .. }
            | ClientFrame::Track { reference, .. }
            | ClientFrame::Untrack { reference }
            | ClientFrame::Leave { reference } => *reference,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack {
        #[serde(rename = "ref")]
        reference: u64,
    },
    Nack {
        #[serde(rename = "ref")]
        reference: u64,
        reason: String,
    },
    Status {
        status: ChannelStatus,
    },
    Change {
        record: RaffleRecord,
    },
    PresenceSync {
        presences: Vec<ParticipantPresence>,
    },
    PresenceJoin {
        presence: ParticipantPresence,
    },
    PresenceLeave {
        presence: ParticipantPresence,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raffle::{ParticipantId, RaffleState};

    #[test]
    fn test_channel_name_is_derived_from_raffle_id() {
        assert_eq!(ChannelName::for_raffle(RaffleId(7)).as_str(), "raffle:7");
        assert_eq!(
            ChannelName::for_raffle(RaffleId(7)),
            ChannelName::for_raffle(RaffleId(7))
        );
    }

    #[test]
    fn test_change_filter_matches_record_id() {
        let filter = ChangeFilter::record(RaffleId(1));
        assert!(filter.matches(&RaffleRecord::new(RaffleId(1), 0)));
        assert!(!filter.matches(&RaffleRecord::new(RaffleId(2), 0)));
    }

    #[test]
    fn test_client_frame_wire_format() {
        let frame = ClientFrame::Subscribe {
            reference: 3,
            filter: ChangeFilter::record(RaffleId(1)),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "subscribe", "ref": 3, "filter": { "recordId": 1 } })
        );
        assert_eq!(frame.reference(), 3);
    }

    #[test]
    fn test_server_frame_carries_whole_record() {
        let record = RaffleRecord::new(RaffleId(1), 10)
            .with_outcome(RaffleState::Drawn, Some(ParticipantId::new("p42")))
            .unwrap();
        let raw = serde_json::to_string(&ServerFrame::Change {
            record: record.clone(),
        })
        .unwrap();
        let decoded: ServerFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded, ServerFrame::Change { record });
    }

    #[test]
    fn test_server_frame_rejects_invalid_record() {
        let raw = r#"{"type":"change","record":{"id":1,"createdAt":0,"state":"DRAWN"}}"#;
        assert!(serde_json::from_str::<ServerFrame>(raw).is_err());
    }

    #[test]
    fn test_status_wire_format() {
        let raw = serde_json::to_string(&ServerFrame::Status {
            status: ChannelStatus::Active,
        })
        .unwrap();
        assert_eq!(raw, r#"{"type":"status","status":"ACTIVE"}"#);
    }
}
