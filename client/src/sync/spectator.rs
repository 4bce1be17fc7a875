use super::actor::Role;
use super::{attach, Handle, RaffleView};
use crate::transport::{RealtimeBus, RecordStore};
use crate::Result;
use raffle_types::{ParticipantId, RaffleId};
use std::sync::Arc;
use tokio::sync::watch;

/// A participant watching the raffle.
///
/// The spectator registers its own presence once the channel reports `ACTIVE` (and again after
/// every recovery), so it is eligible while attached. It never writes the record.
pub struct Spectator {
    participant: ParticipantId,
    handle: Handle,
}

impl Spectator {
    pub async fn attach<S, B>(
        store: Arc<S>,
        bus: &B,
        raffle_id: RaffleId,
        participant: ParticipantId,
    ) -> Result<Self>
    where
        S: RecordStore,
        B: RealtimeBus,
    {
        let role = Role::Spectator {
            participant: participant.clone(),
        };
        let handle = attach(store, bus, raffle_id, role).await?;
        Ok(Self {
            participant,
            handle,
        })
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant
    }

    /// Whether this participant is the announced winner in the current view.
    pub fn is_winner(&self) -> bool {
        self.handle.view().is_winner(&self.participant)
    }

    pub fn view(&self) -> Arc<RaffleView> {
        self.handle.view()
    }

    pub fn views(&self) -> watch::Receiver<Arc<RaffleView>> {
        self.handle.views()
    }

    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&RaffleView) -> bool,
    ) -> Option<Arc<RaffleView>> {
        self.handle.wait_for(predicate).await
    }

    /// Untrack presence, then close the channel. Both are attempted even if the first fails.
    pub async fn detach(self) {
        self.handle.detach().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ChannelCall, MockBackend};
    use crate::transport::ChannelEvent;
    use raffle_execution::mocks::{record_in, MOCK_RAFFLE_ID, MOCK_WINNER};
    use raffle_types::{ChannelStatus, RaffleState};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    async fn attached(backend: &MockBackend, id: &str) -> Spectator {
        Spectator::attach(
            Arc::new(backend.clone()),
            backend,
            MOCK_RAFFLE_ID,
            ParticipantId::new(id),
        )
        .await
        .unwrap()
    }

    async fn wait(
        spectator: &Spectator,
        predicate: impl FnMut(&RaffleView) -> bool,
    ) -> Arc<RaffleView> {
        tokio::time::timeout(WAIT, spectator.wait_for(predicate))
            .await
            .expect("view condition not reached")
            .expect("synchronizer stopped")
    }

    fn tracks(calls: &[ChannelCall]) -> usize {
        calls
            .iter()
            .filter(|call| matches!(call, ChannelCall::Track { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_opens_channel_with_own_presence_key() {
        let backend = MockBackend::new();
        let spectator = attached(&backend, "a").await;
        assert_eq!(spectator.participant_id().as_str(), "a");
        assert_eq!(
            backend.calls()[0],
            ChannelCall::Open {
                channel: 0,
                presence_key: Some(ParticipantId::new("a")),
            }
        );
    }

    #[tokio::test]
    async fn test_tracks_only_after_active() {
        let backend = MockBackend::new();
        backend.auto_activate(false);
        let spectator = attached(&backend, "a").await;
        wait(&spectator, |view| view.is_loaded()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracks(&backend.calls()), 0);

        backend.emit(ChannelEvent::Status(ChannelStatus::Active));
        assert!(backend.wait_until(|backend| tracks(&backend.calls()) == 1).await);
        let view = wait(&spectator, |view| view.presence().len() == 1).await;
        assert!(view.presence().contains(&ParticipantId::new("a")));
    }

    #[tokio::test]
    async fn test_channel_error_shows_error_and_recovery_retracks() {
        let backend = MockBackend::with_record(record_in(RaffleState::Drawing));
        let spectator = attached(&backend, "a").await;
        assert!(backend.wait_until(|backend| tracks(&backend.calls()) == 1).await);

        backend.emit(ChannelEvent::Status(ChannelStatus::Error));
        let view = wait(&spectator, |view| view.error().is_some()).await;
        assert_eq!(view.state(), RaffleState::Error);
        assert_eq!(view.winner(), None);
        // The shared record is untouched.
        assert!(backend.writes().is_empty());
        assert_eq!(
            backend.record(MOCK_RAFFLE_ID).unwrap().state(),
            RaffleState::Drawing
        );

        backend.emit(ChannelEvent::Status(ChannelStatus::Active));
        let view = wait(&spectator, |view| view.state() == RaffleState::Drawing).await;
        assert_eq!(view.error(), None);
        assert!(backend.wait_until(|backend| tracks(&backend.calls()) == 2).await);
        assert_eq!(backend.fetches(), 2);
    }

    #[tokio::test]
    async fn test_failed_track_is_retried_on_next_active() {
        let backend = MockBackend::new();
        backend.fail_track(true);
        let spectator = attached(&backend, "a").await;
        assert!(backend.wait_until(|backend| tracks(&backend.calls()) == 1).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        backend.fail_track(false);
        backend.emit(ChannelEvent::Status(ChannelStatus::Active));
        assert!(backend.wait_until(|backend| tracks(&backend.calls()) == 2).await);
        wait(&spectator, |view| view.presence().len() == 1).await;
    }

    #[tokio::test]
    async fn test_fetch_failure_shows_error() {
        let backend = MockBackend::new();
        backend.fail_fetches(true);
        let spectator = attached(&backend, "a").await;
        let view = wait(&spectator, |view| view.error().is_some()).await;
        assert_eq!(view.state(), RaffleState::Error);
        assert!(!view.is_loading());
        assert!(!view.is_loaded());
    }

    #[tokio::test]
    async fn test_sees_winner() {
        let backend = MockBackend::with_record(record_in(RaffleState::Drawing));
        let winner = attached(&backend, MOCK_WINNER).await;
        let other = attached(&backend, "someone-else").await;
        wait(&winner, |view| view.is_loaded()).await;
        wait(&other, |view| view.is_loaded()).await;
        assert!(!winner.is_winner());

        backend.emit(ChannelEvent::Change(record_in(RaffleState::Drawn)));
        wait(&winner, |view| view.state() == RaffleState::Drawn).await;
        wait(&other, |view| view.state() == RaffleState::Drawn).await;
        assert!(winner.is_winner());
        assert!(!other.is_winner());
    }

    #[tokio::test]
    async fn test_detach_untracks_then_closes() {
        let backend = MockBackend::new();
        let spectator = attached(&backend, "a").await;
        wait(&spectator, |view| view.presence().len() == 1).await;

        spectator.detach().await;
        let calls = backend.calls();
        assert_eq!(
            calls[calls.len() - 2..],
            [
                ChannelCall::Untrack { channel: 0 },
                ChannelCall::Close { channel: 0 },
            ]
        );
        assert!(backend.presence(0).is_none());
    }

    #[tokio::test]
    async fn test_detach_closes_even_when_untrack_fails() {
        let backend = MockBackend::new();
        backend.fail_untrack(true);
        let spectator = attached(&backend, "a").await;
        wait(&spectator, |view| view.presence().len() == 1).await;
        let views = spectator.views();

        spectator.detach().await;
        assert_eq!(
            backend.calls().last(),
            Some(&ChannelCall::Close { channel: 0 })
        );
        assert!(views.borrow().is_detached());
    }

    #[tokio::test]
    async fn test_dropping_handle_releases_channel() {
        let backend = MockBackend::new();
        let spectator = attached(&backend, "a").await;
        wait(&spectator, |view| view.presence().len() == 1).await;

        drop(spectator);
        assert!(
            backend
                .wait_until(|backend| backend
                    .calls()
                    .contains(&ChannelCall::Close { channel: 0 }))
                .await
        );
    }
}
