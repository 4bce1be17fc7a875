//! Presence registry derived from full bus snapshots.
//!
//! The bus owns the authoritative presence set. Each observer keeps a registry that is rebuilt
//! wholesale on every sync event; join and leave events are only logged because they can be
//! missed, while a sync always carries the complete view.

use raffle_types::{ParticipantId, ParticipantPresence};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Immutable set of present participants at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    entries: BTreeMap<ParticipantId, u64>,
}

impl PresenceSnapshot {
    /// Build a snapshot, keeping the earliest connect time of duplicated ids.
    pub fn from_presences(presences: impl IntoIterator<Item = ParticipantPresence>) -> Self {
        let mut entries = BTreeMap::new();
        for presence in presences {
            entries
                .entry(presence.participant_id)
                .and_modify(|connected_at: &mut u64| {
                    *connected_at = (*connected_at).min(presence.connected_at)
                })
                .or_insert(presence.connected_at);
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.entries.contains_key(participant)
    }

    pub fn connected_at(&self, participant: &ParticipantId) -> Option<u64> {
        self.entries.get(participant).copied()
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.entries.keys()
    }

    /// Capture the participants as a non-empty value, or `None` if nobody is present.
    pub fn candidates(&self) -> Option<Candidates> {
        Candidates::new(self.entries.keys().cloned())
    }
}

/// A non-empty, owned list of eligible participants.
///
/// Holding a `Candidates` value means the emptiness check already passed; it is never
/// refreshed from the live registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidates(Vec<ParticipantId>);

impl Candidates {
    pub fn new(participants: impl IntoIterator<Item = ParticipantId>) -> Option<Self> {
        let mut participants: Vec<_> = participants.into_iter().collect();
        participants.sort();
        participants.dedup();
        if participants.is_empty() {
            return None;
        }
        Some(Self(participants))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[ParticipantId] {
        &self.0
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.0.binary_search(participant).is_ok()
    }
}

/// Locally rebuilt view of who is attached to the channel.
#[derive(Clone, Debug, Default)]
pub struct PresenceRegistry {
    snapshot: Arc<PresenceSnapshot>,
    syncs: u64,
}

impl PresenceRegistry {
    /// Replace the registry with the complete set delivered by a sync event.
    pub fn apply_sync(
        &mut self,
        presences: impl IntoIterator<Item = ParticipantPresence>,
    ) -> Arc<PresenceSnapshot> {
        let snapshot = Arc::new(PresenceSnapshot::from_presences(presences));
        self.syncs = self.syncs.saturating_add(1);
        debug!(
            participants = snapshot.len(),
            syncs = self.syncs,
            "presence registry rebuilt"
        );
        self.snapshot = Arc::clone(&snapshot);
        snapshot
    }

    /// The current snapshot. Later syncs never mutate a snapshot already handed out.
    pub fn snapshot(&self) -> Arc<PresenceSnapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Number of sync events applied so far.
    pub fn syncs(&self) -> u64 {
        self.syncs
    }

    pub fn observe_join(&self, presence: &ParticipantPresence) {
        debug!(participant = %presence.participant_id, "presence join");
    }

    pub fn observe_leave(&self, presence: &ParticipantPresence) {
        debug!(participant = %presence.participant_id, "presence leave");
    }
}
