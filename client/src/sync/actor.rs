//! The per-participant synchronizer task.
//!
//! One task owns all local state for a participant and is the only writer of its
//! [`RaffleView`]. Network calls (cold fetch, transition writes, presence tracking) run as
//! spawned tasks that report back over an internal channel, so channel events keep flowing
//! while they are pending.

use super::view::RaffleView;
use crate::transport::{Channel, ChannelEvent, RecordStore};
use crate::{CommandError, Result};
use raffle_execution::{Command, PresenceRegistry, Transition};
use raffle_types::{
    unix_millis, ChannelStatus, ParticipantId, ParticipantPresence, RaffleId, RaffleRecord,
};
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 16;
const COMPLETION_CAPACITY: usize = 32;

pub(crate) type CommandReply = oneshot::Sender<std::result::Result<(), CommandError>>;

pub(crate) enum Role {
    Admin { rng: StdRng },
    Spectator { participant: ParticipantId },
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::Admin { .. } => "admin",
            Role::Spectator { .. } => "spectator",
        }
    }
}

pub(crate) enum Request {
    Command {
        command: Command,
        reply: CommandReply,
    },
    DismissWarning,
    Detach {
        reply: oneshot::Sender<()>,
    },
}

enum Completion {
    Fetched {
        seq: u64,
        changes_seen: u64,
        result: Result<RaffleRecord>,
    },
    Written {
        command: Command,
        result: Result<RaffleRecord>,
        reply: CommandReply,
    },
    Tracked {
        epoch: u64,
        result: Result<()>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tracking {
    Untracked,
    Pending,
    Tracked,
}

pub(crate) struct Synchronizer<S, C> {
    raffle_id: RaffleId,
    role: Role,
    store: Arc<S>,
    channel: Arc<C>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    requests: mpsc::Receiver<Request>,
    completions_tx: mpsc::Sender<Completion>,
    completions: mpsc::Receiver<Completion>,
    view: watch::Sender<Arc<RaffleView>>,
    registry: PresenceRegistry,
    fetch_seq: u64,
    changes_applied: u64,
    tracking: Tracking,
    track_epoch: u64,
    status: Option<ChannelStatus>,
}

impl<S: RecordStore, C: Channel> Synchronizer<S, C> {
    /// Start the task for an already subscribed channel and return its request and view ends.
    pub(crate) fn spawn(
        raffle_id: RaffleId,
        role: Role,
        store: Arc<S>,
        channel: C,
        events: mpsc::Receiver<ChannelEvent>,
    ) -> (mpsc::Sender<Request>, watch::Receiver<Arc<RaffleView>>) {
        let (requests_tx, requests) = mpsc::channel(REQUEST_CAPACITY);
        let (completions_tx, completions) = mpsc::channel(COMPLETION_CAPACITY);
        let (view, view_rx) = watch::channel(Arc::new(RaffleView::initial(raffle_id)));
        let synchronizer = Self {
            raffle_id,
            role,
            store,
            channel: Arc::new(channel),
            events: Some(events),
            requests,
            completions_tx,
            completions,
            view,
            registry: PresenceRegistry::default(),
            fetch_seq: 0,
            changes_applied: 0,
            tracking: Tracking::Untracked,
            track_epoch: 0,
            status: None,
        };
        tokio::spawn(synchronizer.run());
        (requests_tx, view_rx)
    }

    async fn run(mut self) {
        info!(raffle = %self.raffle_id, role = self.role.as_str(), "synchronizer started");
        self.start_fetch();
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Detach { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(Request::Command { command, reply }) => self.handle_command(command, reply),
                    Some(Request::DismissWarning) => self.publish(|view| view.with_warning(None)),
                    None => {
                        debug!(raffle = %self.raffle_id, "handle dropped without detach");
                        self.teardown().await;
                        return;
                    }
                },
                Some(completion) = self.completions.recv() => self.handle_completion(completion),
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!(raffle = %self.raffle_id, "channel event stream ended");
                        self.events = None;
                        self.handle_status(ChannelStatus::Closed);
                    }
                },
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&RaffleView) -> RaffleView) {
        self.view.send_modify(|view| *view = Arc::new(update(view)));
    }

    fn current(&self) -> Arc<RaffleView> {
        Arc::clone(&self.view.borrow())
    }

    fn handle_command(&mut self, command: Command, reply: CommandReply) {
        let view = self.current();
        if view.in_flight().is_some() {
            let _ = reply.send(Err(CommandError::InFlight));
            return;
        }
        if !view.is_loaded() && view.error().is_none() {
            let _ = reply.send(Err(CommandError::NotLoaded));
            return;
        }

        // The same snapshot is checked for emptiness and drawn from.
        let presence = self.registry.snapshot();
        let Role::Admin { rng } = &mut self.role else {
            warn!(%command, "command sent to a spectator synchronizer");
            return;
        };
        let transition = match Transition::prepare(command, view.state(), &presence, rng) {
            Ok(transition) => transition,
            Err(violation) => {
                info!(%command, state = %view.state(), %violation, "command rejected");
                let _ = reply.send(Err(CommandError::Guard(violation)));
                return;
            }
        };

        info!(
            %command,
            state = %transition.state(),
            winner = transition.winner().map(|winner| winner.as_str()).unwrap_or("-"),
            candidates = presence.len(),
            "writing transition"
        );
        self.publish(|view| view.with_in_flight(Some(command)));
        let store = Arc::clone(&self.store);
        let completions = self.completions_tx.clone();
        let raffle_id = self.raffle_id;
        let patch = transition.patch();
        tokio::spawn(async move {
            let result = store.update_where(raffle_id, &patch).await;
            let _ = completions
                .send(Completion::Written {
                    command,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn start_fetch(&mut self) {
        self.fetch_seq = self.fetch_seq.wrapping_add(1);
        let seq = self.fetch_seq;
        let changes_seen = self.changes_applied;
        if seq > 1 {
            self.publish(RaffleView::reloading);
        }
        let store = Arc::clone(&self.store);
        let completions = self.completions_tx.clone();
        let raffle_id = self.raffle_id;
        tokio::spawn(async move {
            let result = store.fetch_one(raffle_id).await;
            let _ = completions
                .send(Completion::Fetched {
                    seq,
                    changes_seen,
                    result,
                })
                .await;
        });
    }

    fn start_tracking(&mut self) {
        let Role::Spectator { participant } = &self.role else {
            return;
        };
        if self.tracking != Tracking::Untracked {
            return;
        }
        self.tracking = Tracking::Pending;
        let presence = ParticipantPresence {
            participant_id: participant.clone(),
            connected_at: unix_millis(),
        };
        let epoch = self.track_epoch;
        let channel = Arc::clone(&self.channel);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = channel.track_presence(presence).await;
            let _ = completions
                .send(Completion::Tracked { epoch, result })
                .await;
        });
    }

    /// The bus drops presence with the connection; forget any registration.
    fn reset_tracking(&mut self) {
        self.tracking = Tracking::Untracked;
        self.track_epoch = self.track_epoch.wrapping_add(1);
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Fetched {
                seq,
                changes_seen,
                result,
            } => {
                if seq != self.fetch_seq || changes_seen != self.changes_applied {
                    debug!(raffle = %self.raffle_id, "discarding stale record fetch");
                    return;
                }
                match result {
                    Ok(record) => {
                        info!(raffle = %self.raffle_id, state = %record.state(), "record loaded");
                        self.publish(|view| view.with_record(&record));
                    }
                    Err(err) => {
                        warn!(raffle = %self.raffle_id, ?err, "record fetch failed");
                        self.publish(|view| view.with_error(format!("failed to load raffle: {err}")));
                    }
                }
            }
            Completion::Written {
                command,
                result,
                reply,
            } => {
                self.publish(|view| view.with_in_flight(None));
                // The outcome arrives as a change event; the returned record is not applied.
                let result = match result {
                    Ok(_) => {
                        debug!(%command, "transition acknowledged");
                        Ok(())
                    }
                    Err(err) => {
                        warn!(%command, ?err, "transition write failed");
                        Err(CommandError::Store(err))
                    }
                };
                let _ = reply.send(result);
            }
            Completion::Tracked { epoch, result } => {
                if epoch != self.track_epoch {
                    debug!("ignoring presence ack from a previous connection");
                    return;
                }
                match result {
                    Ok(()) => {
                        info!("presence tracked");
                        self.tracking = Tracking::Tracked;
                    }
                    Err(err) => {
                        warn!(?err, "presence track failed");
                        self.tracking = Tracking::Untracked;
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Status(status) => self.handle_status(status),
            ChannelEvent::Change(record) => {
                if record.id() != self.raffle_id {
                    debug!(record = %record.id(), "ignoring change for another raffle");
                    return;
                }
                self.changes_applied = self.changes_applied.wrapping_add(1);
                debug!(
                    state = %record.state(),
                    winner = record.winner().map(|winner| winner.as_str()).unwrap_or("-"),
                    "change applied"
                );
                self.publish(|view| view.with_record(&record));
            }
            ChannelEvent::PresenceSync(presences) => {
                let snapshot = self.registry.apply_sync(presences);
                self.publish(|view| view.with_presence(snapshot));
            }
            ChannelEvent::PresenceJoin(presence) => self.registry.observe_join(&presence),
            ChannelEvent::PresenceLeave(presence) => self.registry.observe_leave(&presence),
        }
    }

    fn handle_status(&mut self, status: ChannelStatus) {
        let previous = self.status.replace(status);
        self.publish(|view| view.with_channel(status));
        match status {
            ChannelStatus::Active => {
                if matches!(
                    previous,
                    Some(ChannelStatus::Error) | Some(ChannelStatus::Closed)
                ) {
                    info!(raffle = %self.raffle_id, "channel recovered; reloading record");
                    self.start_fetch();
                }
                self.start_tracking();
            }
            ChannelStatus::Error => {
                self.reset_tracking();
                match self.role {
                    Role::Admin { .. } => {
                        warn!(raffle = %self.raffle_id, "channel error; keeping last known state");
                        self.publish(|view| {
                            view.with_warning(Some(
                                "realtime channel error; the state shown may be stale".to_string(),
                            ))
                        });
                    }
                    Role::Spectator { .. } => {
                        warn!(raffle = %self.raffle_id, "channel error");
                        self.publish(|view| view.with_error("realtime channel error"));
                    }
                }
            }
            ChannelStatus::Closed => {
                info!(raffle = %self.raffle_id, "channel closed");
                self.reset_tracking();
            }
        }
    }

    /// Release presence, then the channel. Both steps are attempted; failures are logged.
    async fn teardown(&mut self) {
        // Stop accepting events first so a full event queue cannot stall the channel's acks.
        self.events = None;
        if self.tracking != Tracking::Untracked {
            if let Err(err) = self.channel.untrack_presence().await {
                warn!(raffle = %self.raffle_id, ?err, "failed to untrack presence");
            }
            self.reset_tracking();
        }
        if let Err(err) = self.channel.close().await {
            warn!(raffle = %self.raffle_id, ?err, "failed to close channel");
        }
        self.view
            .send_modify(|view| *view = Arc::new(view.as_ref().clone().into_detached()));
        info!(raffle = %self.raffle_id, role = self.role.as_str(), "synchronizer detached");
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
