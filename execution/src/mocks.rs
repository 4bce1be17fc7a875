use crate::presence::PresenceSnapshot;
use raffle_types::{ParticipantId, ParticipantPresence, RaffleId, RaffleRecord, RaffleState};

/// Identifier used by every mock record.
pub const MOCK_RAFFLE_ID: RaffleId = RaffleId(1);

/// Winner assigned when a mock record is built in `Drawn`.
pub const MOCK_WINNER: &str = "p42";

/// Creates a presence entry connected at time zero
pub fn presence(id: &str) -> ParticipantPresence {
    ParticipantPresence {
        participant_id: ParticipantId::new(id),
        connected_at: 0,
    }
}

/// Creates presence entries for each id
pub fn presences(ids: &[&str]) -> Vec<ParticipantPresence> {
    ids.iter().map(|id| presence(id)).collect()
}

/// Creates a presence snapshot containing the given ids
pub fn snapshot_of(ids: &[&str]) -> PresenceSnapshot {
    PresenceSnapshot::from_presences(presences(ids))
}

/// Creates a valid record in the requested state (with a winner only when drawn)
pub fn record_in(state: RaffleState) -> RaffleRecord {
    let winner = (state == RaffleState::Drawn).then(|| ParticipantId::new(MOCK_WINNER));
    match RaffleRecord::new(MOCK_RAFFLE_ID, 0).with_outcome(state, winner) {
        Ok(record) => record,
        Err(err) => panic!("mock record violates invariant: {err}"),
    }
}
