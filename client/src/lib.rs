//! Client SDK for the raffle.
//!
//! [`Client`] talks to the backend: the record store over HTTP and the realtime bus over
//! WebSocket. [`Admin`] and [`Spectator`] attach to one raffle through any
//! [`RecordStore`]/[`RealtimeBus`] pair and keep a local [`RaffleView`] in sync with it.

pub mod client;
pub mod config;
pub mod events;
pub mod sync;
pub mod transport;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use client::Client;
pub use config::ClientConfig;
pub use events::WsChannel;
pub use sync::{Admin, RaffleView, Spectator};
pub use transport::{Channel, ChannelEvent, ChannelOptions, RealtimeBus, RecordStore};

use raffle_execution::GuardViolation;
use raffle_types::RaffleId;
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("raffle {0} does not exist")]
    RecordMissing(RaffleId),
    #[error("patch rejected: {0}")]
    InvalidPatch(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request rejected by the bus: {0}")]
    Nack(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dial timeout")]
    DialTimeout,
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an admin command did not produce a write.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Guard(#[from] GuardViolation),
    #[error("another command is still in flight")]
    InFlight,
    #[error("the raffle has not been loaded yet")]
    NotLoaded,
    #[error("the synchronizer is detached")]
    Detached,
    #[error("store error: {0}")]
    Store(#[from] Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_simulator::{Api, Simulator, SimulatorConfig};
    use raffle_types::{ChannelName, ParticipantId, ParticipantPresence, RaffleState};
    use std::{net::SocketAddr, sync::Arc, time::Duration};
    use tokio::time::{sleep, timeout};

    const WAIT: Duration = Duration::from_secs(5);
    const RAFFLE: RaffleId = RaffleId(1);

    struct TestContext {
        simulator: Arc<Simulator>,
        base_url: String,
        server_handle: tokio::task::JoinHandle<()>,
    }

    impl TestContext {
        async fn new() -> Self {
            let simulator = Arc::new(Simulator::new(SimulatorConfig {
                raffle_id: RAFFLE,
                ..SimulatorConfig::default()
            }));
            let api = Api::new(simulator.clone());

            // Start server on random port
            let addr = SocketAddr::from(([127, 0, 0, 1], 0));
            let router = api.router();
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let actual_addr = listener.local_addr().unwrap();
            let base_url = format!("http://{actual_addr}");

            let server_handle = tokio::spawn(async move {
                axum::serve(listener, router).await.unwrap();
            });

            // Give server time to start
            sleep(Duration::from_millis(100)).await;

            Self {
                simulator,
                base_url,
                server_handle,
            }
        }

        fn create_client(&self) -> Client {
            Client::new(&self.base_url).unwrap()
        }

        async fn spectator(&self, id: &str) -> Spectator {
            let client = self.create_client();
            Spectator::attach(
                Arc::new(client.clone()),
                &client,
                RAFFLE,
                ParticipantId::new(id),
            )
            .await
            .unwrap()
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            self.server_handle.abort();
        }
    }

    async fn settle(
        spectator: &Spectator,
        predicate: impl FnMut(&RaffleView) -> bool,
    ) -> Arc<RaffleView> {
        timeout(WAIT, spectator.wait_for(predicate))
            .await
            .expect("spectator did not converge")
            .expect("spectator stopped")
    }

    #[tokio::test]
    async fn test_record_store_over_http() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        let record = client.fetch_one(RAFFLE).await.unwrap();
        assert_eq!(record.state(), RaffleState::Waiting);

        let updated = client
            .update_where(
                RAFFLE,
                &raffle_types::RecordPatch::outcome(RaffleState::Drawing, None),
            )
            .await
            .unwrap();
        assert_eq!(updated.state(), RaffleState::Drawing);

        assert!(matches!(
            client.fetch_one(RaffleId(99)).await,
            Err(Error::RecordMissing(RaffleId(99)))
        ));
        assert!(matches!(
            client
                .update_where(
                    RAFFLE,
                    &raffle_types::RecordPatch::outcome(RaffleState::Drawn, None),
                )
                .await,
            Err(Error::InvalidPatch(_))
        ));
    }

    #[tokio::test]
    async fn test_full_draw_converges_for_everyone() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();
        let admin = Admin::attach(Arc::new(client.clone()), &client, RAFFLE)
            .await
            .unwrap();
        timeout(WAIT, admin.wait_for(|view| view.is_loaded()))
            .await
            .unwrap()
            .unwrap();

        let spectators = vec![
            ctx.spectator("a").await,
            ctx.spectator("b").await,
            ctx.spectator("c").await,
        ];
        timeout(WAIT, admin.wait_for(|view| view.presence().len() == 3))
            .await
            .expect("admin should see everyone present")
            .unwrap();

        admin.start_draw().await.unwrap();
        for spectator in &spectators {
            settle(spectator, |view| view.state() == RaffleState::Drawing).await;
        }
        timeout(WAIT, admin.wait_for(|view| view.state() == RaffleState::Drawing))
            .await
            .unwrap()
            .unwrap();

        admin.pick_winner().await.unwrap();
        let mut winners = Vec::new();
        for spectator in &spectators {
            let view = settle(spectator, |view| view.state() == RaffleState::Drawn).await;
            let winner = view.winner().cloned().expect("drawn raffle has a winner");
            winners.push(winner);
        }
        assert!(winners.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(["a", "b", "c"].contains(&winners[0].as_str()));
        assert_eq!(
            spectators
                .iter()
                .filter(|spectator| spectator.is_winner())
                .count(),
            1
        );

        // Repeating the pick from DRAWN is rejected.
        timeout(WAIT, admin.wait_for(|view| view.state() == RaffleState::Drawn))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            admin.pick_winner().await,
            Err(CommandError::Guard(_))
        ));

        for spectator in spectators {
            spectator.detach().await;
        }
        timeout(WAIT, admin.wait_for(|view| view.presence().is_empty()))
            .await
            .expect("presence should drain after detach")
            .unwrap();

        admin.reset().await.unwrap();
        let record = ctx.simulator.store().fetch_one(RAFFLE).await.unwrap();
        assert_eq!(record.state(), RaffleState::Waiting);
        assert_eq!(record.winner(), None);
        admin.detach().await;
    }

    #[tokio::test]
    async fn test_detach_completes_under_presence_churn() {
        let ctx = TestContext::new().await;
        let client = Client::with_config(ClientConfig {
            event_buffer: 1,
            ..ClientConfig::new(ctx.base_url.clone())
        })
        .unwrap();
        let spectator = Spectator::attach(
            Arc::new(client.clone()),
            &client,
            RAFFLE,
            ParticipantId::new("a"),
        )
        .await
        .unwrap();
        settle(&spectator, |view| view.presence().len() == 1).await;

        // Other sessions keep joining and leaving while the spectator detaches.
        let bus = Arc::clone(ctx.simulator.bus());
        let churn = tokio::task::spawn_blocking(move || {
            let channel = ChannelName::for_raffle(RAFFLE);
            for i in 0..20_000 {
                let id = ParticipantId::new(format!("churn-{i}"));
                let connection = bus.attach(channel.clone(), Some(id.clone()));
                let _ = connection.track(ParticipantPresence {
                    participant_id: id,
                    connected_at: 0,
                });
            }
        });
        sleep(Duration::from_millis(50)).await;

        timeout(WAIT, spectator.detach())
            .await
            .expect("detach should finish while events keep arriving");
        churn.await.unwrap();
    }
}
