//! Realtime bus over WebSocket.
//!
//! Each [`WsChannel`] owns a connection task that dials `/channels/{name}`, correlates
//! acknowledgements with requests by `ref`, and forwards status, change and presence frames to
//! the subscriber. When the socket drops, the task reports [`ChannelStatus::Error`], waits the
//! configured delay, redials and re-subscribes; the backend then reports `ACTIVE` again.

use crate::transport::{Channel, ChannelEvent, ChannelOptions, RealtimeBus};
use crate::{Client, Error, Result};
use futures_util::{SinkExt, StreamExt};
use raffle_types::{
    ChangeFilter, ChannelName, ChannelStatus, ClientFrame, ParticipantPresence, ServerFrame,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<Result<()>>;

const COMMAND_CAPACITY: usize = 32;

enum Request {
    Subscribe {
        filter: ChangeFilter,
        events: mpsc::Sender<ChannelEvent>,
        reply: Reply,
    },
    Track {
        presence: ParticipantPresence,
        reply: Reply,
    },
    Untrack {
        reply: Reply,
    },
    Close {
        reply: Reply,
    },
}

/// A channel on the backend bus. Dropping it stops the connection task.
pub struct WsChannel {
    name: ChannelName,
    requests: mpsc::Sender<Request>,
    event_capacity: usize,
    ack_timeout: Duration,
    _handle: tokio::task::JoinHandle<()>,
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

impl WsChannel {
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Request) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        response.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Like [`Self::request`], but gives up once the ack takes longer than the dial timeout.
    async fn request_acked(&self, build: impl FnOnce(Reply) -> Request) -> Result<()> {
        tokio::time::timeout(self.ack_timeout, self.request(build))
            .await
            .map_err(|_| Error::ConnectionClosed)?
    }
}

impl Channel for WsChannel {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<mpsc::Receiver<ChannelEvent>> {
        let (events, receiver) = mpsc::channel(self.event_capacity);
        self.request(|reply| Request::Subscribe {
            filter,
            events,
            reply,
        })
        .await?;
        Ok(receiver)
    }

    async fn track_presence(&self, presence: ParticipantPresence) -> Result<()> {
        self.request_acked(|reply| Request::Track { presence, reply })
            .await
    }

    async fn untrack_presence(&self) -> Result<()> {
        self.request_acked(|reply| Request::Untrack { reply })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.request(|reply| Request::Close { reply }).await
    }
}

impl RealtimeBus for Client {
    type Channel = WsChannel;

    async fn open_channel(&self, name: ChannelName, options: ChannelOptions) -> Result<WsChannel> {
        let url = self.channel_url(&name, options.presence_key.as_ref())?;
        let (requests, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let connection = Connection {
            name: name.clone(),
            url,
            dial_timeout: self.config.dial_timeout(),
            reconnect_delay: self.config.reconnect_delay(),
            requests: receiver,
            subscription: None,
            pending: HashMap::new(),
            next_ref: 1,
            reported_error: false,
        };
        let handle = tokio::spawn(connection.run());
        Ok(WsChannel {
            name,
            requests,
            event_capacity: self.config.event_capacity(),
            ack_timeout: self.config.dial_timeout(),
            _handle: handle,
        })
    }
}

enum Exit {
    Reconnect,
    Closed,
}

struct Connection {
    name: ChannelName,
    url: Url,
    dial_timeout: Duration,
    reconnect_delay: Duration,
    requests: mpsc::Receiver<Request>,
    subscription: Option<(ChangeFilter, mpsc::Sender<ChannelEvent>)>,
    pending: HashMap<u64, Reply>,
    next_ref: u64,
    reported_error: bool,
}

impl Connection {
    async fn run(mut self) {
        loop {
            match self.dial().await {
                Ok(socket) => {
                    info!(channel = %self.name, "channel connected");
                    if let Exit::Closed = self.serve(socket).await {
                        break;
                    }
                }
                Err(err) => warn!(channel = %self.name, ?err, "channel dial failed"),
            }
            self.fail_pending();
            self.report_error().await;
            if let Exit::Closed = self.wait_offline().await {
                break;
            }
        }
        debug!(channel = %self.name, "channel task exiting");
    }

    async fn dial(&self) -> Result<Socket> {
        let (socket, _) = tokio::time::timeout(self.dial_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        Ok(socket)
    }

    fn reference(&mut self) -> u64 {
        let reference = self.next_ref;
        self.next_ref = self.next_ref.wrapping_add(1);
        reference
    }

    async fn forward(&mut self, event: ChannelEvent) {
        let Some((_, events)) = &self.subscription else {
            return;
        };
        if events.send(event).await.is_err() {
            debug!(channel = %self.name, "subscriber dropped; discarding events");
            self.subscription = None;
        }
    }

    /// Report a lost connection once per outage.
    async fn report_error(&mut self) {
        if self.reported_error || self.subscription.is_none() {
            return;
        }
        self.reported_error = true;
        self.forward(ChannelEvent::Status(ChannelStatus::Error))
            .await;
    }

    fn fail_pending(&mut self) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(Error::ConnectionClosed));
        }
    }

    /// Handle requests while disconnected until the reconnect delay elapses.
    async fn wait_offline(&mut self) -> Exit {
        let delay = tokio::time::sleep(self.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return Exit::Reconnect,
                request = self.requests.recv() => match request {
                    None => return Exit::Closed,
                    Some(Request::Subscribe { filter, events, reply }) => {
                        // Applied as soon as the connection is back.
                        self.subscription = Some((filter, events));
                        let _ = reply.send(Ok(()));
                    }
                    Some(Request::Track { reply, .. }) | Some(Request::Untrack { reply }) => {
                        let _ = reply.send(Err(Error::ConnectionClosed));
                    }
                    Some(Request::Close { reply }) => {
                        let _ = reply.send(Ok(()));
                        return Exit::Closed;
                    }
                },
            }
        }
    }

    async fn send(&mut self, socket: &mut Socket, frame: &ClientFrame) -> Result<()> {
        let payload = serde_json::to_string(frame)?;
        trace!(channel = %self.name, %payload, "sending channel frame");
        socket.send(Message::Text(payload)).await?;
        Ok(())
    }

    async fn serve(&mut self, mut socket: Socket) -> Exit {
        if let Some(filter) = self.subscription.as_ref().map(|(filter, _)| *filter) {
            let frame = ClientFrame::Subscribe {
                reference: self.reference(),
                filter,
            };
            if let Err(err) = self.send(&mut socket, &frame).await {
                warn!(channel = %self.name, ?err, "failed to resubscribe");
                return Exit::Reconnect;
            }
        }

        loop {
            tokio::select! {
                msg = socket.next() => match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => self.handle_frame(frame).await,
                        Err(err) => warn!(channel = %self.name, ?err, "failed to decode channel frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(channel = %self.name, "channel socket closed");
                        return Exit::Reconnect;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(channel = %self.name, ?err, "channel socket error");
                        return Exit::Reconnect;
                    }
                },
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        let _ = socket.close(None).await;
                        return Exit::Closed;
                    };
                    match self.handle_request(&mut socket, request).await {
                        Ok(None) => {}
                        Ok(Some(exit)) => return exit,
                        Err(err) => {
                            warn!(channel = %self.name, ?err, "failed to send channel frame");
                            return Exit::Reconnect;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Ack { reference } => {
                if let Some(reply) = self.pending.remove(&reference) {
                    let _ = reply.send(Ok(()));
                }
            }
            ServerFrame::Nack { reference, reason } => {
                warn!(channel = %self.name, reference, %reason, "request rejected");
                if let Some(reply) = self.pending.remove(&reference) {
                    let _ = reply.send(Err(Error::Nack(reason)));
                }
            }
            ServerFrame::Status { status } => {
                if status == ChannelStatus::Active {
                    self.reported_error = false;
                }
                self.forward(ChannelEvent::Status(status)).await;
            }
            ServerFrame::Change { record } => self.forward(ChannelEvent::Change(record)).await,
            ServerFrame::PresenceSync { presences } => {
                self.forward(ChannelEvent::PresenceSync(presences)).await
            }
            ServerFrame::PresenceJoin { presence } => {
                self.forward(ChannelEvent::PresenceJoin(presence)).await
            }
            ServerFrame::PresenceLeave { presence } => {
                self.forward(ChannelEvent::PresenceLeave(presence)).await
            }
        }
    }

    async fn handle_request(
        &mut self,
        socket: &mut Socket,
        request: Request,
    ) -> Result<Option<Exit>> {
        let (frame, reply) = match request {
            Request::Subscribe {
                filter,
                events,
                reply,
            } => {
                self.subscription = Some((filter, events));
                let reference = self.reference();
                (ClientFrame::Subscribe { reference, filter }, reply)
            }
            Request::Track { presence, reply } => {
                let reference = self.reference();
                (ClientFrame::Track { reference, presence }, reply)
            }
            Request::Untrack { reply } => {
                let reference = self.reference();
                (ClientFrame::Untrack { reference }, reply)
            }
            Request::Close { reply } => {
                let reference = self.reference();
                let result = self.leave(socket, reference).await;
                let _ = reply.send(result);
                return Ok(Some(Exit::Closed));
            }
        };
        let reference = frame.reference();
        self.pending.insert(reference, reply);
        self.send(socket, &frame).await?;
        Ok(None)
    }

    /// Leave the channel and wait (bounded) for the backend to acknowledge.
    async fn leave(&mut self, socket: &mut Socket, reference: u64) -> Result<()> {
        self.send(socket, &ClientFrame::Leave { reference }).await?;
        let acked = tokio::time::timeout(self.dial_timeout, async {
            while let Some(msg) = socket.next().await {
                let Ok(Message::Text(text)) = msg else {
                    continue;
                };
                if let Ok(ServerFrame::Ack { reference: acked }) = serde_json::from_str(&text) {
                    if acked == reference {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        let _ = socket.close(None).await;
        self.fail_pending();
        if acked {
            info!(channel = %self.name, "channel closed");
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }
}
