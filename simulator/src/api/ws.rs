use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State as AxumState,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use raffle_types::{
    ChangeFilter, ChannelName, ChannelStatus, ClientFrame, ParticipantId, RaffleRecord,
    ServerFrame,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};

use crate::{BusConnection, PresenceError, PresenceEvent, Simulator};

fn ws_send_timeout() -> Duration {
    let raw = std::env::var("WS_SEND_TIMEOUT_MS").ok();
    let parsed = raw
        .as_deref()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0);
    Duration::from_millis(parsed.unwrap_or(2_000))
}

type OutboundSender = mpsc::Sender<Message>;

#[derive(Debug)]
enum OutboundSendError {
    Closed,
    Full,
}

fn enqueue_frame(out_tx: &OutboundSender, frame: &ServerFrame) -> Result<(), OutboundSendError> {
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(err) => {
            // Frames are plain data; serialization only fails on a broken record.
            tracing::error!("Failed to encode server frame: {err}");
            return Ok(());
        }
    };
    match out_tx.try_send(Message::Text(payload)) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => Err(OutboundSendError::Full),
        Err(mpsc::error::TrySendError::Closed(_)) => Err(OutboundSendError::Closed),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ChannelParams {
    presence_key: Option<String>,
}

pub(super) async fn channel_ws(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(name): Path<String>,
    Query(params): Query<ChannelParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let channel = ChannelName::new(name);
    let presence_key = params
        .presence_key
        .filter(|key| !key.is_empty())
        .map(ParticipantId::new);
    let max_message_bytes = simulator.config().ws_max_message_bytes();
    ws.max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| handle_channel_ws(socket, simulator, channel, presence_key))
}

/// Per-connection subscription state. Nothing is forwarded until the client subscribes.
#[derive(Default)]
struct Subscription {
    filter: Option<ChangeFilter>,
    changes: Option<broadcast::Receiver<RaffleRecord>>,
}

impl Subscription {
    fn is_active(&self) -> bool {
        self.filter.is_some()
    }

    async fn recv(&mut self) -> Result<RaffleRecord, broadcast::error::RecvError> {
        match self.changes.as_mut() {
            Some(changes) => changes.recv().await,
            None => std::future::pending().await,
        }
    }
}

enum Flow {
    Continue,
    Close,
}

async fn handle_channel_ws(
    socket: WebSocket,
    simulator: Arc<Simulator>,
    channel: ChannelName,
    presence_key: Option<ParticipantId>,
) {
    tracing::info!(
        %channel,
        presence_key = presence_key.as_ref().map(|key| key.as_str()).unwrap_or("-"),
        "Channel WebSocket connected"
    );
    let (mut sender, mut receiver) = socket.split();
    let mut connection = simulator.bus().attach(channel.clone(), presence_key);
    let (out_tx, mut out_rx) = mpsc::channel(simulator.config().ws_outbound_capacity());
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match timeout(ws_send_timeout(), sender.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    tracing::warn!("Failed to send channel frame, client disconnected");
                    break;
                }
                Err(_) => {
                    tracing::warn!("Channel WebSocket send timed out, closing connection");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    let mut subscription = Subscription::default();
    loop {
        let outcome = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => handle_frame(frame, &simulator, &connection, &mut subscription, &out_tx),
                    Err(err) => {
                        tracing::warn!(%channel, "Ignoring malformed client frame: {err}");
                        Ok(Flow::Continue)
                    }
                },
                Some(Ok(Message::Ping(data))) => out_tx
                    .try_send(Message::Pong(data))
                    .map(|_| Flow::Continue)
                    .map_err(|_| OutboundSendError::Full),
                Some(Ok(Message::Close(_))) => {
                    tracing::info!(%channel, "Client closed channel WebSocket");
                    Ok(Flow::Close)
                }
                Some(Ok(_)) => Ok(Flow::Continue),
                Some(Err(err)) => {
                    tracing::warn!("WebSocket error: {:?}", err);
                    Ok(Flow::Close)
                }
                None => {
                    tracing::info!(%channel, "Channel WebSocket stream ended");
                    Ok(Flow::Close)
                }
            },
            change = subscription.recv() => match change {
                Ok(record) => forward_change(&subscription, &record, &out_tx),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%channel, skipped, "Channel client lagged behind record changes");
                    resend_current(&simulator, &subscription, &out_tx).await
                }
                Err(broadcast::error::RecvError::Closed) => Ok(Flow::Close),
            },
            event = connection.recv(), if subscription.is_active() => match event {
                Ok(event) => enqueue_frame(&out_tx, &presence_frame(event)).map(|_| Flow::Continue),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%channel, skipped, "Channel client lagged behind presence events");
                    let presences = connection.presence();
                    enqueue_frame(&out_tx, &ServerFrame::PresenceSync { presences })
                        .map(|_| Flow::Continue)
                }
                Err(broadcast::error::RecvError::Closed) => Ok(Flow::Close),
            },
        };
        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(err) => {
                tracing::warn!(%channel, ?err, "Failed to enqueue channel frame, closing connection");
                break;
            }
        }
    }
    tracing::info!(%channel, "Channel WebSocket handler exiting");
    drop(connection);
    drop(out_tx);
    let _ = writer_handle.await;
}

fn handle_frame(
    frame: ClientFrame,
    simulator: &Simulator,
    connection: &BusConnection,
    subscription: &mut Subscription,
    out_tx: &OutboundSender,
) -> Result<Flow, OutboundSendError> {
    match frame {
        ClientFrame::Subscribe { reference, filter } => {
            if subscription.changes.is_none() {
                subscription.changes = Some(simulator.store().subscribe());
            }
            subscription.filter = Some(filter);
            tracing::debug!(channel = %connection.channel(), record = %filter.record_id, "client subscribed");
            enqueue_frame(out_tx, &ServerFrame::Ack { reference })?;
            enqueue_frame(
                out_tx,
                &ServerFrame::Status {
                    status: ChannelStatus::Active,
                },
            )?;
            enqueue_frame(
                out_tx,
                &ServerFrame::PresenceSync {
                    presences: connection.presence(),
                },
            )?;
            Ok(Flow::Continue)
        }
        ClientFrame::Track {
            reference,
            presence,
        } => {
            let result = if subscription.is_active() {
                connection
                    .track(presence)
                    .map_err(|err: PresenceError| err.to_string())
            } else {
                Err("channel is not subscribed".to_string())
            };
            let reply = match result {
                Ok(()) => ServerFrame::Ack { reference },
                Err(reason) => {
                    tracing::warn!(channel = %connection.channel(), "rejected track: {reason}");
                    ServerFrame::Nack { reference, reason }
                }
            };
            enqueue_frame(out_tx, &reply)?;
            Ok(Flow::Continue)
        }
        ClientFrame::Untrack { reference } => {
            connection.untrack();
            enqueue_frame(out_tx, &ServerFrame::Ack { reference })?;
            Ok(Flow::Continue)
        }
        ClientFrame::Leave { reference } => {
            connection.untrack();
            enqueue_frame(out_tx, &ServerFrame::Ack { reference })?;
            enqueue_frame(
                out_tx,
                &ServerFrame::Status {
                    status: ChannelStatus::Closed,
                },
            )?;
            Ok(Flow::Close)
        }
    }
}

fn forward_change(
    subscription: &Subscription,
    record: &RaffleRecord,
    out_tx: &OutboundSender,
) -> Result<Flow, OutboundSendError> {
    match subscription.filter {
        Some(filter) if filter.matches(record) => {
            enqueue_frame(
                out_tx,
                &ServerFrame::Change {
                    record: record.clone(),
                },
            )?;
            Ok(Flow::Continue)
        }
        _ => Ok(Flow::Continue),
    }
}

/// After lagging, the latest committed record supersedes every skipped change.
async fn resend_current(
    simulator: &Simulator,
    subscription: &Subscription,
    out_tx: &OutboundSender,
) -> Result<Flow, OutboundSendError> {
    let Some(filter) = subscription.filter else {
        return Ok(Flow::Continue);
    };
    match simulator.store().fetch_one(filter.record_id).await {
        Some(record) => forward_change(subscription, &record, out_tx),
        None => Ok(Flow::Continue),
    }
}

fn presence_frame(event: PresenceEvent) -> ServerFrame {
    match event {
        PresenceEvent::Sync(presences) => ServerFrame::PresenceSync { presences },
        PresenceEvent::Join(presence) => ServerFrame::PresenceJoin { presence },
        PresenceEvent::Leave(presence) => ServerFrame::PresenceLeave { presence },
    }
}

#[cfg(test)]
mod tests {
    use crate::{Api, Simulator, SimulatorConfig};
    use futures::{SinkExt, StreamExt};
    use raffle_types::{
        ChangeFilter, ChannelStatus, ClientFrame, ParticipantId, ParticipantPresence, RaffleId,
        RaffleState, RecordPatch, ServerFrame,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{
        connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
    };

    type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve(simulator: Arc<Simulator>) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Api::new(simulator).router();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("ws://{addr}"), handle)
    }

    async fn send(socket: &mut Socket, frame: ClientFrame) {
        let payload = serde_json::to_string(&frame).unwrap();
        socket.send(Message::Text(payload)).await.unwrap();
    }

    async fn next_frame(socket: &mut Socket) -> ServerFrame {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("frame should arrive")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn subscribe(socket: &mut Socket) {
        send(
            socket,
            ClientFrame::Subscribe {
                reference: 1,
                filter: ChangeFilter::record(RaffleId(1)),
            },
        )
        .await;
        assert_eq!(next_frame(socket).await, ServerFrame::Ack { reference: 1 });
        assert_eq!(
            next_frame(socket).await,
            ServerFrame::Status {
                status: ChannelStatus::Active
            }
        );
        assert_eq!(
            next_frame(socket).await,
            ServerFrame::PresenceSync {
                presences: Vec::new()
            }
        );
    }

    fn presence(id: &str) -> ParticipantPresence {
        ParticipantPresence {
            participant_id: ParticipantId::new(id),
            connected_at: 5,
        }
    }

    #[tokio::test]
    async fn test_subscribe_then_receive_change() {
        let simulator = Arc::new(Simulator::new(SimulatorConfig::default()));
        let (base, server) = serve(simulator.clone()).await;
        let (mut socket, _) = connect_async(format!("{base}/channels/raffle:1"))
            .await
            .unwrap();
        subscribe(&mut socket).await;

        simulator
            .store()
            .update_where(RaffleId(1), &RecordPatch::outcome(RaffleState::Drawing, None))
            .await
            .unwrap();
        match next_frame(&mut socket).await {
            ServerFrame::Change { record } => assert_eq!(record.state(), RaffleState::Drawing),
            other => panic!("unexpected frame: {other:?}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn test_track_before_subscribe_is_rejected() {
        let simulator = Arc::new(Simulator::new(SimulatorConfig::default()));
        let (base, server) = serve(simulator.clone()).await;
        let (mut socket, _) = connect_async(format!("{base}/channels/raffle:1?presence_key=a"))
            .await
            .unwrap();
        send(
            &mut socket,
            ClientFrame::Track {
                reference: 4,
                presence: presence("a"),
            },
        )
        .await;
        assert!(matches!(
            next_frame(&mut socket).await,
            ServerFrame::Nack { reference: 4, .. }
        ));
        server.abort();
    }

    #[tokio::test]
    async fn test_presence_tracked_and_removed_on_disconnect() {
        let simulator = Arc::new(Simulator::new(SimulatorConfig::default()));
        let (base, server) = serve(simulator.clone()).await;
        let (mut observer, _) = connect_async(format!("{base}/channels/raffle:1"))
            .await
            .unwrap();
        subscribe(&mut observer).await;

        let (mut spectator, _) = connect_async(format!("{base}/channels/raffle:1?presence_key=a"))
            .await
            .unwrap();
        subscribe(&mut spectator).await;
        send(
            &mut spectator,
            ClientFrame::Track {
                reference: 2,
                presence: presence("a"),
            },
        )
        .await;
        assert_eq!(
            next_frame(&mut spectator).await,
            ServerFrame::Ack { reference: 2 }
        );

        assert_eq!(
            next_frame(&mut observer).await,
            ServerFrame::PresenceJoin {
                presence: presence("a")
            }
        );
        assert_eq!(
            next_frame(&mut observer).await,
            ServerFrame::PresenceSync {
                presences: vec![presence("a")]
            }
        );

        drop(spectator);
        assert_eq!(
            next_frame(&mut observer).await,
            ServerFrame::PresenceLeave {
                presence: presence("a")
            }
        );
        assert_eq!(
            next_frame(&mut observer).await,
            ServerFrame::PresenceSync {
                presences: Vec::new()
            }
        );
        server.abort();
    }

    #[tokio::test]
    async fn test_leave_closes_channel() {
        let simulator = Arc::new(Simulator::new(SimulatorConfig::default()));
        let (base, server) = serve(simulator).await;
        let (mut socket, _) = connect_async(format!("{base}/channels/raffle:1"))
            .await
            .unwrap();
        subscribe(&mut socket).await;
        send(&mut socket, ClientFrame::Leave { reference: 9 }).await;
        assert_eq!(next_frame(&mut socket).await, ServerFrame::Ack { reference: 9 });
        assert_eq!(
            next_frame(&mut socket).await,
            ServerFrame::Status {
                status: ChannelStatus::Closed
            }
        );
        server.abort();
    }
}
