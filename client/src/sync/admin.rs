use super::actor::{Request, Role};
use super::{attach, Handle, RaffleView};
use crate::transport::{RealtimeBus, RecordStore};
use crate::{CommandError, Result};
use raffle_execution::Command;
use raffle_types::RaffleId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Control surface for the raffle operator.
///
/// The admin observes the channel without registering presence. Commands are checked against
/// the locally observed state and presence snapshot, and only one may be in flight at a time.
/// A command resolves once the store acknowledged the write; the resulting state arrives as a
/// change event like for every other subscriber.
pub struct Admin {
    handle: Handle,
}

impl Admin {
    pub async fn attach<S, B>(store: Arc<S>, bus: &B, raffle_id: RaffleId) -> Result<Self>
    where
        S: RecordStore,
        B: RealtimeBus,
    {
        Self::attach_with_rng(store, bus, raffle_id, StdRng::from_entropy()).await
    }

    pub async fn attach_with_rng<S, B>(
        store: Arc<S>,
        bus: &B,
        raffle_id: RaffleId,
        rng: StdRng,
    ) -> Result<Self>
    where
        S: RecordStore,
        B: RealtimeBus,
    {
        let handle = attach(store, bus, raffle_id, Role::Admin { rng }).await?;
        Ok(Self { handle })
    }

    pub async fn start_draw(&self) -> std::result::Result<(), CommandError> {
        self.command(Command::StartDraw).await
    }

    pub async fn pick_winner(&self) -> std::result::Result<(), CommandError> {
        self.command(Command::PickWinner).await
    }

    pub async fn reset(&self) -> std::result::Result<(), CommandError> {
        self.command(Command::Reset).await
    }

    pub async fn command(&self, command: Command) -> std::result::Result<(), CommandError> {
        let (reply, response) = oneshot::channel();
        if !self.handle.send(Request::Command { command, reply }).await {
            return Err(CommandError::Detached);
        }
        response.await.map_err(|_| CommandError::Detached)?
    }

    /// Clear the warning raised by a channel error.
    pub async fn dismiss_warning(&self) {
        self.handle.send(Request::DismissWarning).await;
    }

    pub fn view(&self) -> Arc<RaffleView> {
        self.handle.view()
    }

    pub fn views(&self) -> watch::Receiver<Arc<RaffleView>> {
        self.handle.views()
    }

    /// Wait until the view satisfies `predicate`; `None` once the synchronizer stopped.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&RaffleView) -> bool,
    ) -> Option<Arc<RaffleView>> {
        self.handle.wait_for(predicate).await
    }

    /// Close the channel. Failures are logged, never returned.
    pub async fn detach(self) {
        self.handle.detach().await
    }
}
