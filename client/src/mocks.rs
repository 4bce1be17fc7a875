//! In-memory record store and realtime bus for exercising the synchronizer.

use crate::transport::{Channel, ChannelEvent, ChannelOptions, RealtimeBus, RecordStore};
use crate::{Error, Result};
use raffle_execution::mocks::record_in;
use raffle_types::{
    ChangeFilter, ChannelName, ChannelStatus, ParticipantId, ParticipantPresence, RaffleId,
    RaffleRecord, RaffleState, RecordPatch,
};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const EVENT_CAPACITY: usize = 256;

/// A request observed by a [`MockChannel`], indexed by channel in open order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelCall {
    Open {
        channel: usize,
        presence_key: Option<ParticipantId>,
    },
    Subscribe {
        channel: usize,
    },
    Track {
        channel: usize,
    },
    Untrack {
        channel: usize,
    },
    Close {
        channel: usize,
    },
}

struct ChannelState {
    name: ChannelName,
    filter: Option<ChangeFilter>,
    events: Option<mpsc::Sender<ChannelEvent>>,
    presence: Option<ParticipantPresence>,
}

struct State {
    records: HashMap<RaffleId, RaffleRecord>,
    writes: Vec<(RaffleId, RecordPatch)>,
    fetches: usize,
    calls: Vec<ChannelCall>,
    channels: Vec<ChannelState>,
    fail_fetches: bool,
    fail_writes: bool,
    fail_track: bool,
    fail_untrack: bool,
    auto_activate: bool,
    broadcast_writes: bool,
}

impl State {
    fn broadcast(&self, name: Option<&ChannelName>, event: &ChannelEvent) {
        for channel in &self.channels {
            if name.is_some_and(|name| name != &channel.name) {
                continue;
            }
            if let ChannelEvent::Change(record) = event {
                if !channel.filter.is_some_and(|filter| filter.matches(record)) {
                    continue;
                }
            }
            if let Some(events) = &channel.events {
                let _ = events.try_send(event.clone());
            }
        }
    }

    fn presences(&self, name: &ChannelName) -> Vec<ParticipantPresence> {
        self.channels
            .iter()
            .filter(|channel| &channel.name == name)
            .filter_map(|channel| channel.presence.clone())
            .collect()
    }

    fn announce(&self, name: &ChannelName, event: ChannelEvent) {
        self.broadcast(Some(name), &event);
        self.broadcast(Some(name), &ChannelEvent::PresenceSync(self.presences(name)));
    }

    fn release_presence(&mut self, index: usize) {
        let channel = &mut self.channels[index];
        if let Some(presence) = channel.presence.take() {
            let name = channel.name.clone();
            self.announce(&name, ChannelEvent::PresenceLeave(presence));
        }
    }
}

struct Shared {
    state: Mutex<State>,
    fetch_gate: watch::Sender<bool>,
    write_gate: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn pass(gate: &watch::Sender<bool>) {
    let mut gate = gate.subscribe();
    let _ = gate.wait_for(|open| *open).await.map(|_| ());
}

/// Record store and bus sharing one in-memory record table.
///
/// Writes are broadcast to subscribed channels as change events, and presence changes are
/// announced as a join/leave followed by a full sync, like the real backend does.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend holding a `WAITING` mock record.
    pub fn new() -> Self {
        Self::with_record(record_in(RaffleState::Waiting))
    }

    pub fn empty() -> Self {
        let (fetch_gate, _) = watch::channel(true);
        let (write_gate, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    records: HashMap::new(),
                    writes: Vec::new(),
                    fetches: 0,
                    calls: Vec::new(),
                    channels: Vec::new(),
                    fail_fetches: false,
                    fail_writes: false,
                    fail_track: false,
                    fail_untrack: false,
                    auto_activate: true,
                    broadcast_writes: true,
                }),
                fetch_gate,
                write_gate,
            }),
        }
    }

    pub fn with_record(record: RaffleRecord) -> Self {
        let backend = Self::empty();
        backend.set_record(record);
        backend
    }

    /// Replace a record without notifying subscribers.
    pub fn set_record(&self, record: RaffleRecord) {
        self.shared.state().records.insert(record.id(), record);
    }

    pub fn record(&self, id: RaffleId) -> Option<RaffleRecord> {
        self.shared.state().records.get(&id).cloned()
    }

    /// Patches applied so far, in order.
    pub fn writes(&self) -> Vec<(RaffleId, RecordPatch)> {
        self.shared.state().writes.clone()
    }

    /// Number of completed record fetches.
    pub fn fetches(&self) -> usize {
        self.shared.state().fetches
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.shared.state().calls.clone()
    }

    /// Presence currently tracked by the channel at `index`.
    pub fn presence(&self, index: usize) -> Option<ParticipantPresence> {
        self.shared
            .state()
            .channels
            .get(index)
            .and_then(|channel| channel.presence.clone())
    }

    /// Deliver `event` to every subscribed channel.
    pub fn emit(&self, event: ChannelEvent) {
        self.shared.state().broadcast(None, &event);
    }

    pub fn hold_fetches(&self) {
        self.shared.fetch_gate.send_replace(false);
    }

    pub fn release_fetches(&self) {
        self.shared.fetch_gate.send_replace(true);
    }

    pub fn hold_writes(&self) {
        self.shared.write_gate.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.shared.write_gate.send_replace(true);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.shared.state().fail_fetches = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.shared.state().fail_writes = fail;
    }

    pub fn fail_track(&self, fail: bool) {
        self.shared.state().fail_track = fail;
    }

    pub fn fail_untrack(&self, fail: bool) {
        self.shared.state().fail_untrack = fail;
    }

    /// Whether subscribing reports `ACTIVE` and a presence sync right away (default on).
    pub fn auto_activate(&self, enabled: bool) {
        self.shared.state().auto_activate = enabled;
    }

    /// Whether applied writes are delivered as change events (default on).
    pub fn broadcast_writes(&self, enabled: bool) {
        self.shared.state().broadcast_writes = enabled;
    }

    /// Poll `condition` for up to two seconds.
    pub async fn wait_until(&self, condition: impl Fn(&MockBackend) -> bool) -> bool {
        for _ in 0..200 {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }
}

impl RecordStore for MockBackend {
    async fn fetch_one(&self, id: RaffleId) -> Result<RaffleRecord> {
        pass(&self.shared.fetch_gate).await;
        let mut state = self.shared.state();
        state.fetches += 1;
        if state.fail_fetches {
            return Err(Error::Failed(StatusCode::SERVICE_UNAVAILABLE));
        }
        state.records.get(&id).cloned().ok_or(Error::RecordMissing(id))
    }

    async fn update_where(&self, id: RaffleId, patch: &RecordPatch) -> Result<RaffleRecord> {
        pass(&self.shared.write_gate).await;
        let mut state = self.shared.state();
        if state.fail_writes {
            return Err(Error::Failed(StatusCode::INTERNAL_SERVER_ERROR));
        }
        let current = state.records.get(&id).ok_or(Error::RecordMissing(id))?;
        let updated = current
            .apply(patch)
            .map_err(|err| Error::InvalidPatch(err.to_string()))?;
        state.records.insert(id, updated.clone());
        state.writes.push((id, patch.clone()));
        if state.broadcast_writes {
            state.broadcast(None, &ChannelEvent::Change(updated.clone()));
        }
        Ok(updated)
    }
}

impl RealtimeBus for MockBackend {
    type Channel = MockChannel;

    async fn open_channel(&self, name: ChannelName, options: ChannelOptions) -> Result<MockChannel> {
        let mut state = self.shared.state();
        let index = state.channels.len();
        state.channels.push(ChannelState {
            name,
            filter: None,
            events: None,
            presence: None,
        });
        state.calls.push(ChannelCall::Open {
            channel: index,
            presence_key: options.presence_key,
        });
        Ok(MockChannel {
            index,
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct MockChannel {
    index: usize,
    shared: Arc<Shared>,
}

impl Channel for MockChannel {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<mpsc::Receiver<ChannelEvent>> {
        let (events, receiver) = mpsc::channel(EVENT_CAPACITY);
        let mut state = self.shared.state();
        state.calls.push(ChannelCall::Subscribe {
            channel: self.index,
        });
        if state.auto_activate {
            let name = state.channels[self.index].name.clone();
            let _ = events.try_send(ChannelEvent::Status(ChannelStatus::Active));
            let _ = events.try_send(ChannelEvent::PresenceSync(state.presences(&name)));
        }
        let channel = &mut state.channels[self.index];
        channel.filter = Some(filter);
        channel.events = Some(events);
        Ok(receiver)
    }

    async fn track_presence(&self, presence: ParticipantPresence) -> Result<()> {
        let mut state = self.shared.state();
        state.calls.push(ChannelCall::Track {
            channel: self.index,
        });
        if state.fail_track {
            return Err(Error::Nack("presence rejected".to_string()));
        }
        let channel = &mut state.channels[self.index];
        channel.presence = Some(presence.clone());
        let name = channel.name.clone();
        state.announce(&name, ChannelEvent::PresenceJoin(presence));
        Ok(())
    }

    async fn untrack_presence(&self) -> Result<()> {
        let mut state = self.shared.state();
        state.calls.push(ChannelCall::Untrack {
            channel: self.index,
        });
        if state.fail_untrack {
            return Err(Error::Nack("untrack rejected".to_string()));
        }
        state.release_presence(self.index);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.shared.state();
        state.calls.push(ChannelCall::Close {
            channel: self.index,
        });
        state.release_presence(self.index);
        let channel = &mut state.channels[self.index];
        channel.events = None;
        channel.filter = None;
        Ok(())
    }
}
