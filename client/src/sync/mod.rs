//! Keeps a participant's local view of the raffle in line with the record store and the bus.
//!
//! [`Admin`] drives transitions; [`Spectator`] only observes and registers its own presence.
//! Both publish immutable [`RaffleView`] snapshots that are replaced wholesale on every update.

mod actor;
mod admin;
mod spectator;
mod view;

pub use admin::Admin;
pub use spectator::Spectator;
pub use view::RaffleView;

use crate::transport::{Channel, ChannelOptions, RealtimeBus, RecordStore};
use crate::Result;
use actor::{Request, Role, Synchronizer};
use raffle_types::{ChangeFilter, ChannelName, RaffleId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

/// Open and subscribe the raffle's channel, then hand it to a new synchronizer task.
async fn attach<S, B>(store: Arc<S>, bus: &B, raffle_id: RaffleId, role: Role) -> Result<Handle>
where
    S: RecordStore,
    B: RealtimeBus,
{
    let name = ChannelName::for_raffle(raffle_id);
    let options = match &role {
        Role::Admin { .. } => ChannelOptions::observer(),
        Role::Spectator { participant } => ChannelOptions::participant(participant.clone()),
    };
    let channel = bus.open_channel(name.clone(), options).await?;
    let events = match channel.subscribe(ChangeFilter::record(raffle_id)).await {
        Ok(events) => events,
        Err(err) => {
            if let Err(close_err) = channel.close().await {
                warn!(channel = %name, ?close_err, "failed to close channel after subscribe error");
            }
            return Err(err);
        }
    };
    let (requests, view) = Synchronizer::spawn(raffle_id, role, store, channel, events);
    Ok(Handle { requests, view })
}

/// Request and view ends of a running synchronizer.
struct Handle {
    requests: mpsc::Sender<Request>,
    view: watch::Receiver<Arc<RaffleView>>,
}

impl Handle {
    fn view(&self) -> Arc<RaffleView> {
        Arc::clone(&self.view.borrow())
    }

    fn views(&self) -> watch::Receiver<Arc<RaffleView>> {
        self.view.clone()
    }

    async fn wait_for(
        &self,
        mut predicate: impl FnMut(&RaffleView) -> bool,
    ) -> Option<Arc<RaffleView>> {
        let mut views = self.view.clone();
        let view = views.wait_for(|view| predicate(view)).await.ok()?;
        Some(Arc::clone(&view))
    }

    async fn send(&self, request: Request) -> bool {
        self.requests.send(request).await.is_ok()
    }

    async fn detach(self) {
        let (reply, done) = oneshot::channel();
        if self.send(Request::Detach { reply }).await {
            let _ = done.await;
        }
    }
}
