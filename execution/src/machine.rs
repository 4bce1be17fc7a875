//! Raffle state machine.
//!
//! Every transition is admin-initiated and validated against the state the admin has
//! *observed locally*. The machine never reads back after a write: the authoritative outcome
//! arrives later as a change event.
//!
//! ## Guards
//!
//! | Command       | Allowed from              | Effect                          |
//! |---------------|---------------------------|---------------------------------|
//! | `start_draw`  | `WAITING`                 | `DRAWING`, winner cleared       |
//! | `pick_winner` | `DRAWING`, someone present| `DRAWN`, winner selected        |
//! | `reset`       | any state                 | `WAITING`, winner cleared       |

use crate::presence::{Candidates, PresenceSnapshot};
use crate::select::select;
use raffle_types::{ParticipantId, RaffleState, RecordPatch};
use rand::Rng;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    StartDraw,
    PickWinner,
    Reset,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::StartDraw => "start_draw",
            Command::PickWinner => "pick_winner",
            Command::Reset => "reset",
        }
    }

    /// Whether the command may be issued while the raffle is observed in `state`.
    pub fn allowed_from(&self, state: RaffleState) -> bool {
        match self {
            Command::StartDraw => state == RaffleState::Waiting,
            Command::PickWinner => state == RaffleState::Drawing,
            Command::Reset => true,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GuardViolation {
    #[error("{command} is not allowed while the raffle is {state}")]
    InvalidState {
        command: Command,
        state: RaffleState,
    },
    #[error("no participants are present to pick from")]
    NoCandidates,
}

/// A validated transition, ready to be written to the record store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    command: Command,
    state: RaffleState,
    winner: Option<ParticipantId>,
}

impl Transition {
    /// Validate `command` against the observed state and, for `pick_winner`, the presence
    /// snapshot captured for this decision.
    pub fn prepare<R: Rng + ?Sized>(
        command: Command,
        observed: RaffleState,
        presence: &PresenceSnapshot,
        rng: &mut R,
    ) -> Result<Self, GuardViolation> {
        if !command.allowed_from(observed) {
            return Err(GuardViolation::InvalidState {
                command,
                state: observed,
            });
        }
        match command {
            Command::StartDraw => Ok(Self {
                command,
                state: RaffleState::Drawing,
                winner: None,
            }),
            Command::PickWinner => {
                let candidates = presence.candidates().ok_or(GuardViolation::NoCandidates)?;
                Ok(Self::pick_from(&candidates, rng))
            }
            Command::Reset => Ok(Self {
                command,
                state: RaffleState::Waiting,
                winner: None,
            }),
        }
    }

    /// Draw from an already captured candidate set. Guards must have been checked.
    pub fn pick_from<R: Rng + ?Sized>(candidates: &Candidates, rng: &mut R) -> Self {
        Self {
            command: Command::PickWinner,
            state: RaffleState::Drawn,
            winner: Some(select(candidates, rng)),
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn state(&self) -> RaffleState {
        self.state
    }

    pub fn winner(&self) -> Option<&ParticipantId> {
        self.winner.as_ref()
    }

    /// The store update for this transition; always sets both fields.
    pub fn patch(&self) -> RecordPatch {
        RecordPatch::outcome(self.state, self.winner.clone())
    }
}
