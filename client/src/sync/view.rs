use raffle_execution::{Command, PresenceSnapshot};
use raffle_types::{ChannelStatus, ParticipantId, RaffleId, RaffleRecord, RaffleState};
use std::sync::Arc;

/// Immutable snapshot of what one participant currently knows about the raffle.
///
/// Views are never mutated after publication; every update produces a new one. The
/// `state`/`winner` pair only ever comes from a [`RaffleRecord`] or the local error
/// placeholder, so a view can never show `DRAWN` without a winner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaffleView {
    raffle_id: RaffleId,
    state: RaffleState,
    winner: Option<ParticipantId>,
    loaded: bool,
    loading: bool,
    error: Option<String>,
    warning: Option<String>,
    channel: Option<ChannelStatus>,
    presence: Arc<PresenceSnapshot>,
    in_flight: Option<Command>,
    detached: bool,
}

impl RaffleView {
    pub(crate) fn initial(raffle_id: RaffleId) -> Self {
        Self {
            raffle_id,
            state: RaffleState::Waiting,
            winner: None,
            loaded: false,
            loading: true,
            error: None,
            warning: None,
            channel: None,
            presence: Arc::new(PresenceSnapshot::default()),
            in_flight: None,
            detached: false,
        }
    }

    pub fn raffle_id(&self) -> RaffleId {
        self.raffle_id
    }

    pub fn state(&self) -> RaffleState {
        self.state
    }

    pub fn winner(&self) -> Option<&ParticipantId> {
        self.winner.as_ref()
    }

    /// Whether `participant` is the announced winner.
    pub fn is_winner(&self, participant: &ParticipantId) -> bool {
        self.state == RaffleState::Drawn && self.winner.as_ref() == Some(participant)
    }

    /// Whether a record (from the cold fetch or a change event) has been applied.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn channel_status(&self) -> Option<ChannelStatus> {
        self.channel
    }

    pub fn presence(&self) -> &Arc<PresenceSnapshot> {
        &self.presence
    }

    pub fn in_flight(&self) -> Option<Command> {
        self.in_flight
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn with_record(&self, record: &RaffleRecord) -> Self {
        Self {
            state: record.state(),
            winner: record.winner().cloned(),
            loaded: true,
            loading: false,
            error: None,
            ..self.clone()
        }
    }

    /// Local `ERROR` placeholder. The shared record is not touched.
    pub(crate) fn with_error(&self, message: impl Into<String>) -> Self {
        Self {
            state: RaffleState::Error,
            winner: None,
            loading: false,
            error: Some(message.into()),
            ..self.clone()
        }
    }

    pub(crate) fn with_warning(&self, message: Option<String>) -> Self {
        Self {
            warning: message,
            ..self.clone()
        }
    }

    pub(crate) fn reloading(&self) -> Self {
        Self {
            loading: true,
            error: None,
            warning: None,
            ..self.clone()
        }
    }

    pub(crate) fn with_channel(&self, status: ChannelStatus) -> Self {
        Self {
            channel: Some(status),
            ..self.clone()
        }
    }

    pub(crate) fn with_presence(&self, presence: Arc<PresenceSnapshot>) -> Self {
        Self {
            presence,
            ..self.clone()
        }
    }

    pub(crate) fn with_in_flight(&self, command: Option<Command>) -> Self {
        Self {
            in_flight: command,
            ..self.clone()
        }
    }

    pub(crate) fn into_detached(self) -> Self {
        Self {
            detached: true,
            in_flight: None,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_execution::mocks::{record_in, MOCK_RAFFLE_ID, MOCK_WINNER};

    #[test]
    fn test_record_replaces_state_and_winner_together() {
        let drawing = RaffleView::initial(MOCK_RAFFLE_ID).with_record(&record_in(RaffleState::Drawing));
        assert_eq!(drawing.state(), RaffleState::Drawing);
        assert_eq!(drawing.winner(), None);

        let drawn = drawing.with_record(&record_in(RaffleState::Drawn));
        assert_eq!(drawn.state(), RaffleState::Drawn);
        assert_eq!(drawn.winner(), Some(&ParticipantId::new(MOCK_WINNER)));
        assert!(drawn.is_winner(&ParticipantId::new(MOCK_WINNER)));
        assert!(!drawn.is_winner(&ParticipantId::new("someone-else")));
        // The previous snapshot is untouched.
        assert_eq!(drawing.state(), RaffleState::Drawing);
    }

    #[test]
    fn test_error_placeholder_clears_winner() {
        let view = RaffleView::initial(MOCK_RAFFLE_ID)
            .with_record(&record_in(RaffleState::Drawn))
            .with_error("channel error");
        assert_eq!(view.state(), RaffleState::Error);
        assert_eq!(view.winner(), None);
        assert_eq!(view.error(), Some("channel error"));
        assert!(!view.is_winner(&ParticipantId::new(MOCK_WINNER)));
    }

    #[test]
    fn test_record_clears_error() {
        let view = RaffleView::initial(MOCK_RAFFLE_ID)
            .with_error("record missing")
            .with_record(&record_in(RaffleState::Waiting));
        assert_eq!(view.error(), None);
        assert!(view.is_loaded());
        assert!(!view.is_loading());
    }
}
