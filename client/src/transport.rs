//! Seams between the synchronizer and its two external collaborators.
//!
//! [`RecordStore`] holds the canonical record; [`RealtimeBus`] hands out [`Channel`]s that
//! deliver change events, presence and connection status for one raffle. [`crate::Client`]
//! implements both against the backend; `mocks::MockBackend` implements them in memory.

use crate::Result;
use raffle_types::{
    ChangeFilter, ChannelName, ChannelStatus, ParticipantId, ParticipantPresence, RaffleId,
    RaffleRecord, RecordPatch,
};
use std::future::Future;
use tokio::sync::mpsc;

/// Everything a subscribed channel delivers, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Status(ChannelStatus),
    Change(RaffleRecord),
    PresenceSync(Vec<ParticipantPresence>),
    PresenceJoin(ParticipantPresence),
    PresenceLeave(ParticipantPresence),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Key under which this connection may track presence. Observers leave it unset.
    pub presence_key: Option<ParticipantId>,
}

impl ChannelOptions {
    pub fn observer() -> Self {
        Self::default()
    }

    pub fn participant(id: ParticipantId) -> Self {
        Self {
            presence_key: Some(id),
        }
    }
}

pub trait RecordStore: Send + Sync + 'static {
    /// Read the record, failing with [`crate::Error::RecordMissing`] when it does not exist.
    fn fetch_one(&self, id: RaffleId) -> impl Future<Output = Result<RaffleRecord>> + Send;

    /// Apply `patch` to the record with `id`. Last writer wins.
    fn update_where(
        &self,
        id: RaffleId,
        patch: &RecordPatch,
    ) -> impl Future<Output = Result<RaffleRecord>> + Send;
}

pub trait Channel: Send + Sync + 'static {
    /// Start receiving events that match `filter`, plus status and presence events.
    fn subscribe(
        &self,
        filter: ChangeFilter,
    ) -> impl Future<Output = Result<mpsc::Receiver<ChannelEvent>>> + Send;

    /// Register presence. Only valid once the subscription reported [`ChannelStatus::Active`].
    fn track_presence(
        &self,
        presence: ParticipantPresence,
    ) -> impl Future<Output = Result<()>> + Send;

    fn untrack_presence(&self) -> impl Future<Output = Result<()>> + Send;

    /// Leave the channel. No further events are delivered afterwards.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

pub trait RealtimeBus: Send + Sync + 'static {
    type Channel: Channel;

    fn open_channel(
        &self,
        name: ChannelName,
        options: ChannelOptions,
    ) -> impl Future<Output = Result<Self::Channel>> + Send;
}
