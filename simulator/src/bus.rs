//! Named channels with presence tracking.
//!
//! Every attached connection belongs to one channel. A connection opened with a presence key
//! may track a single presence entry under that key; the entry disappears when the connection
//! untracks or detaches. Each membership change is announced as an advisory join/leave followed
//! by a full sync, and [`Bus::sync_all`] re-broadcasts the complete set periodically.

use raffle_types::{ChannelName, ParticipantId, ParticipantPresence};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    Sync(Vec<ParticipantPresence>),
    Join(ParticipantPresence),
    Leave(ParticipantPresence),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresenceError {
    #[error("channel was opened without a presence key")]
    NoPresenceKey,
    #[error("presence for {got} does not match channel key {expected}")]
    KeyMismatch {
        expected: ParticipantId,
        got: ParticipantId,
    },
}

type ConnectionId = u64;

struct ChannelState {
    connections: usize,
    presences: HashMap<ConnectionId, ParticipantPresence>,
    events: broadcast::Sender<PresenceEvent>,
}

impl ChannelState {
    fn snapshot(&self) -> Vec<ParticipantPresence> {
        let mut presences: Vec<_> = self.presences.values().cloned().collect();
        presences.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        presences
    }

    fn announce(&self, event: PresenceEvent) {
        let _ = self.events.send(event);
        let _ = self.events.send(PresenceEvent::Sync(self.snapshot()));
    }
}

pub struct Bus {
    channels: Mutex<HashMap<ChannelName, ChannelState>>,
    next_connection: AtomicU64,
    capacity: usize,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelName, ChannelState>> {
        match self.channels.lock() {
            Ok(channels) => channels,
            Err(poisoned) => {
                tracing::warn!("Bus channel lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Attach a connection to `channel`, creating the channel on first use.
    pub fn attach(
        self: &Arc<Self>,
        channel: ChannelName,
        presence_key: Option<ParticipantId>,
    ) -> BusConnection {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let events = {
            let mut channels = self.channels();
            let state = channels
                .entry(channel.clone())
                .or_insert_with(|| ChannelState {
                    connections: 0,
                    presences: HashMap::new(),
                    events: broadcast::channel(self.capacity).0,
                });
            state.connections += 1;
            state.events.subscribe()
        };
        tracing::debug!(%channel, connection = id, "bus connection attached");
        BusConnection {
            bus: Arc::clone(self),
            channel,
            id,
            presence_key,
            events,
        }
    }

    pub fn presence(&self, channel: &ChannelName) -> Vec<ParticipantPresence> {
        self.channels()
            .get(channel)
            .map(ChannelState::snapshot)
            .unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }

    /// Broadcast a full presence sync on every channel.
    pub fn sync_all(&self) {
        for state in self.channels().values() {
            let _ = state.events.send(PresenceEvent::Sync(state.snapshot()));
        }
    }

    fn track(&self, channel: &ChannelName, id: ConnectionId, presence: ParticipantPresence) {
        let mut channels = self.channels();
        let Some(state) = channels.get_mut(channel) else {
            return;
        };
        let replaced = state.presences.insert(id, presence.clone());
        if replaced.as_ref() != Some(&presence) {
            state.announce(PresenceEvent::Join(presence));
        }
    }

    fn untrack(&self, channel: &ChannelName, id: ConnectionId) -> bool {
        let mut channels = self.channels();
        let Some(state) = channels.get_mut(channel) else {
            return false;
        };
        match state.presences.remove(&id) {
            Some(presence) => {
                state.announce(PresenceEvent::Leave(presence));
                true
            }
            None => false,
        }
    }

    fn detach(&self, channel: &ChannelName, id: ConnectionId) {
        let mut channels = self.channels();
        let Some(state) = channels.get_mut(channel) else {
            return;
        };
        if let Some(presence) = state.presences.remove(&id) {
            state.announce(PresenceEvent::Leave(presence));
        }
        state.connections = state.connections.saturating_sub(1);
        if state.connections == 0 {
            channels.remove(channel);
        }
        tracing::debug!(%channel, connection = id, "bus connection detached");
    }
}

/// A connection's membership in a channel. Dropping it removes its presence.
pub struct BusConnection {
    bus: Arc<Bus>,
    channel: ChannelName,
    id: ConnectionId,
    presence_key: Option<ParticipantId>,
    events: broadcast::Receiver<PresenceEvent>,
}

impl BusConnection {
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// Register presence for this connection. Only the connection's own key may be tracked.
    pub fn track(&self, presence: ParticipantPresence) -> Result<(), PresenceError> {
        let expected = self
            .presence_key
            .as_ref()
            .ok_or(PresenceError::NoPresenceKey)?;
        if *expected != presence.participant_id {
            return Err(PresenceError::KeyMismatch {
                expected: expected.clone(),
                got: presence.participant_id,
            });
        }
        self.bus.track(&self.channel, self.id, presence);
        Ok(())
    }

    /// Remove this connection's presence. Returns whether an entry existed.
    pub fn untrack(&self) -> bool {
        self.bus.untrack(&self.channel, self.id)
    }

    pub fn presence(&self) -> Vec<ParticipantPresence> {
        self.bus.presence(&self.channel)
    }

    pub async fn recv(&mut self) -> Result<PresenceEvent, broadcast::error::RecvError> {
        self.events.recv().await
    }
}

impl Drop for BusConnection {
    fn drop(&mut self) {
        self.bus.detach(&self.channel, self.id);
    }
}
