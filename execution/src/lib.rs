//! Raffle execution layer.
//!
//! This crate contains the decision logic shared by every participant: the raffle state
//! machine ([`Transition`]), the presence registry ([`PresenceRegistry`]) and the winner
//! selector ([`select`]). Nothing here performs I/O; the client synchronizer feeds it
//! observed state and presence snapshots and submits the resulting patches.
//!
//! ## Preconditions, not exceptions
//! Guards run before any decision is made. [`Transition::prepare`] rejects a command from a
//! disallowed state or an empty candidate set with a [`GuardViolation`]; once a transition is
//! prepared, producing its [`RecordPatch`](raffle_types::RecordPatch) cannot fail.
//!
//! ## Snapshot atomicity
//! `pick_winner` captures the presence snapshot once. The captured [`Candidates`] value is both
//! the set checked for emptiness and the set indexed into, so a participant leaving after the
//! check cannot empty the pool mid-pick.
//!
//! ```rust
//! use raffle_execution::{Command, PresenceRegistry, Transition};
//! use raffle_types::{ParticipantId, ParticipantPresence, RaffleState};
//!
//! let mut registry = PresenceRegistry::default();
//! registry.apply_sync(["a", "b", "c"].into_iter().map(|id| ParticipantPresence {
//!     participant_id: ParticipantId::new(id),
//!     connected_at: 0,
//! }));
//!
//! let mut rng = rand::thread_rng();
//! let transition =
//!     Transition::prepare(Command::PickWinner, RaffleState::Drawing, &registry.snapshot(), &mut rng)
//!         .expect("guards hold");
//! assert_eq!(transition.state(), RaffleState::Drawn);
//! ```

pub mod machine;
pub use machine::{Command, GuardViolation, Transition};
pub mod presence;
pub use presence::{Candidates, PresenceRegistry, PresenceSnapshot};
pub mod select;
pub use select::select;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
