use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;
use uuid::Uuid;


/// Lifecycle of a raffle cycle.
///
/// `Waiting` is initial, `Drawn` ends a cycle and `Error` is absorbing until an explicit reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaffleState {
    Waiting,
    Drawing,
    Drawn,
    Error,
}

impl RaffleState {
    pub const ALL: [RaffleState; 4] = [
        RaffleState::Waiting,
        RaffleState::Drawing,
        RaffleState::Drawn,
        RaffleState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RaffleState::Waiting => "WAITING",
            RaffleState::Drawing => "DRAWING",
            RaffleState::Drawn => "DRAWN",
            RaffleState::Error => "ERROR",
        }
    }
}

impl fmt::Display for RaffleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("unknown raffle state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for RaffleState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RaffleState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Stable identifier of a raffle instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RaffleId(pub u64);

impl fmt::Display for RaffleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-scoped participant identifier.
///
/// Unique per session, not per person: reconnecting with a fresh session yields a new id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Issue a fresh identifier for a new session.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RecordInvariant {
    #[error("record in state DRAWN has no winner")]
    MissingWinner,
    #[error("record in state {state} carries winner {winner}")]
    UnexpectedWinner {
        state: RaffleState,
        winner: ParticipantId,
    },
}

/// Check that `winner` is present exactly when `state` is `Drawn`.
pub fn check_outcome(
    state: RaffleState,
    winner: Option<&ParticipantId>,
) -> Result<(), RecordInvariant> {
    match (state, winner) {
        (RaffleState::Drawn, Some(_)) => Ok(()),
        (RaffleState::Drawn, None) => Err(RecordInvariant::MissingWinner),
        (_, None) => Ok(()),
        (state, Some(winner)) => Err(RecordInvariant::UnexpectedWinner {
            state,
            winner: winner.clone(),
        }),
    }
}

/// The canonical raffle entity. All participant-local copies are caches of this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireRecord", into = "WireRecord")]
pub struct RaffleRecord {
    id: RaffleId,
    created_at: u64,
    state: RaffleState,
    winner: Option<ParticipantId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    id: RaffleId,
    created_at: u64,
    state: RaffleState,
    #[serde(default)]
    winner: Option<ParticipantId>,
}

impl TryFrom<WireRecord> for RaffleRecord {
    type Error = RecordInvariant;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        RaffleRecord::new(wire.id, wire.created_at).with_outcome(wire.state, wire.winner)
    }
}

impl From<RaffleRecord> for WireRecord {
    fn from(record: RaffleRecord) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            state: record.state,
            winner: record.winner,
        }
    }
}

impl RaffleRecord {
    /// A fresh record in `Waiting` with no winner.
    pub fn new(id: RaffleId, created_at: u64) -> Self {
        Self {
            id,
            created_at,
            state: RaffleState::Waiting,
            winner: None,
        }
    }

    /// Replace state and winner together.
    pub fn with_outcome(
        self,
        state: RaffleState,
        winner: Option<ParticipantId>,
    ) -> Result<Self, RecordInvariant> {
        check_outcome(state, winner.as_ref())?;
        Ok(Self {
            state,
            winner,
            ..self
        })
    }

    /// Apply a partial update, yielding a new record. The original is untouched.
    pub fn apply(&self, patch: &RecordPatch) -> Result<Self, RecordInvariant> {
        let state = patch.state.unwrap_or(self.state);
        let winner = match &patch.winner {
            Some(winner) => winner.clone(),
            None => self.winner.clone(),
        };
        self.clone().with_outcome(state, winner)
    }

    pub fn id(&self) -> RaffleId {
        self.id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn state(&self) -> RaffleState {
        self.state
    }

    pub fn winner(&self) -> Option<&ParticipantId> {
        self.winner.as_ref()
    }

    pub fn is_winner(&self, participant: &ParticipantId) -> bool {
        self.state == RaffleState::Drawn && self.winner.as_ref() == Some(participant)
    }
}

/// Partial of `{state, winner}` submitted to the record store.
///
/// `winner: None` leaves the field untouched, `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RaffleState>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub winner: Option<Option<ParticipantId>>,
}

impl RecordPatch {
    /// A patch that sets both fields.
    pub fn outcome(state: RaffleState, winner: Option<ParticipantId>) -> Self {
        Self {
            state: Some(state),
            winner: Some(winner),
        }
    }
}

// Distinguishes an explicit `null` from an absent key.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// One connected session as seen by the bus presence layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPresence {
    pub participant_id: ParticipantId,
    pub connected_at: u64,
}
