//! Common types shared by the raffle execution layer, the local backend and the client SDK.
//!
//! The canonical entity is [`RaffleRecord`]. Its `winner` field is set if and only if its
//! state is [`RaffleState::Drawn`]; the type cannot be constructed (or deserialized) otherwise.

pub mod api;
pub use api::{ChangeFilter, ChannelName, ChannelStatus, ClientFrame, ServerFrame};
pub mod raffle;
pub use raffle::{
    ParticipantId, ParticipantPresence, RaffleId, RaffleRecord, RaffleState, RecordInvariant,
    RecordPatch, UnknownState,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
