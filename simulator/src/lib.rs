//! Local backend for the raffle.
//!
//! The simulator stands in for both external collaborators of the synchronization protocol:
//! a record store holding the canonical [`RaffleRecord`](raffle_types::RaffleRecord) and a
//! realtime bus carrying change events and presence for each channel. Both are served by
//! [`Api`] over HTTP (records) and WebSocket (channels).

use raffle_types::{unix_millis, RaffleRecord};
use std::sync::Arc;

mod api;
pub use api::Api;

mod bus;
pub use bus::{Bus, BusConnection, PresenceError, PresenceEvent};
mod persistence;
pub use persistence::RecordPersistence;
mod state;
pub use state::SimulatorConfig;
mod store;
pub use store::{RecordStore, StoreError};

pub struct Simulator {
    config: SimulatorConfig,
    store: RecordStore,
    bus: Arc<Bus>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self::new_with_persistence(config, None, Vec::new())
    }

    /// Build a simulator from restored records. The configured raffle is created in
    /// `WAITING` when absent.
    pub fn new_with_persistence(
        config: SimulatorConfig,
        persistence: Option<RecordPersistence>,
        mut restored: Vec<RaffleRecord>,
    ) -> Self {
        let seeded = !restored.iter().any(|record| record.id() == config.raffle_id);
        if seeded {
            let record = RaffleRecord::new(config.raffle_id, unix_millis());
            if let Some(persistence) = &persistence {
                persistence.persist_record(record.clone());
            }
            restored.push(record);
        }
        tracing::info!(
            raffle = %config.raffle_id,
            records = restored.len(),
            seeded,
            "record store initialized"
        );
        let store = RecordStore::new(
            restored,
            config.updates_broadcast_capacity(),
            persistence,
        );
        let bus = Arc::new(Bus::new(config.presence_broadcast_capacity()));
        Self { config, store, bus }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Periodically re-broadcast full presence snapshots so observers that missed a
    /// join or leave converge.
    pub fn start_presence_sync(self: &Arc<Self>) {
        let Some(interval) = self.config.presence_sync_interval() else {
            tracing::info!("Periodic presence sync disabled");
            return;
        };
        let simulator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(simulator) = simulator.upgrade() else {
                    break;
                };
                simulator.bus.sync_all();
            }
        });
    }
}
