use raffle_types::RaffleId;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_RAFFLE_ID: RaffleId = RaffleId(1);
const DEFAULT_PRESENCE_SYNC_INTERVAL_MS: u64 = 5_000;
const DEFAULT_UPDATES_BROADCAST_BUFFER: usize = 1_024;
const DEFAULT_PRESENCE_BROADCAST_BUFFER: usize = 256;
const DEFAULT_WS_OUTBOUND_BUFFER: usize = 256;
const DEFAULT_WS_MAX_MESSAGE_BYTES: usize = 64 * 1024;
const DEFAULT_PERSISTENCE_BUFFER: usize = 64;

#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Raffle seeded on startup when the store has no record for it.
    pub raffle_id: RaffleId,
    pub persistence_path: Option<PathBuf>,
    pub persistence_buffer: Option<usize>,
    pub presence_sync_interval_ms: Option<u64>,
    pub updates_broadcast_buffer: Option<usize>,
    pub presence_broadcast_buffer: Option<usize>,
    pub ws_outbound_buffer: Option<usize>,
    pub ws_max_message_bytes: Option<usize>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            raffle_id: DEFAULT_RAFFLE_ID,
            persistence_path: None,
            persistence_buffer: Some(DEFAULT_PERSISTENCE_BUFFER),
            presence_sync_interval_ms: Some(DEFAULT_PRESENCE_SYNC_INTERVAL_MS),
            updates_broadcast_buffer: Some(DEFAULT_UPDATES_BROADCAST_BUFFER),
            presence_broadcast_buffer: Some(DEFAULT_PRESENCE_BROADCAST_BUFFER),
            ws_outbound_buffer: Some(DEFAULT_WS_OUTBOUND_BUFFER),
            ws_max_message_bytes: Some(DEFAULT_WS_MAX_MESSAGE_BYTES),
        }
    }
}

impl SimulatorConfig {
    /// Interval between unsolicited full presence syncs; `None` disables them.
    pub fn presence_sync_interval(&self) -> Option<Duration> {
        self.presence_sync_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn updates_broadcast_capacity(&self) -> usize {
        self.updates_broadcast_buffer
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_UPDATES_BROADCAST_BUFFER)
    }

    pub fn presence_broadcast_capacity(&self) -> usize {
        self.presence_broadcast_buffer
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_PRESENCE_BROADCAST_BUFFER)
    }

    pub fn ws_outbound_capacity(&self) -> usize {
        self.ws_outbound_buffer
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_WS_OUTBOUND_BUFFER)
    }

    pub fn ws_max_message_bytes(&self) -> usize {
        self.ws_max_message_bytes
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_WS_MAX_MESSAGE_BYTES)
    }

    pub fn persistence_buffer_capacity(&self) -> usize {
        self.persistence_buffer
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_PERSISTENCE_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = SimulatorConfig {
            updates_broadcast_buffer: Some(0),
            ws_outbound_buffer: None,
            ws_max_message_bytes: Some(0),
            ..SimulatorConfig::default()
        };
        assert_eq!(
            config.updates_broadcast_capacity(),
            DEFAULT_UPDATES_BROADCAST_BUFFER
        );
        assert_eq!(config.ws_outbound_capacity(), DEFAULT_WS_OUTBOUND_BUFFER);
        assert_eq!(config.ws_max_message_bytes(), DEFAULT_WS_MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_presence_sync_can_be_disabled() {
        let config = SimulatorConfig {
            presence_sync_interval_ms: Some(0),
            ..SimulatorConfig::default()
        };
        assert_eq!(config.presence_sync_interval(), None);
        assert_eq!(
            SimulatorConfig::default().presence_sync_interval(),
            Some(Duration::from_millis(DEFAULT_PRESENCE_SYNC_INTERVAL_MS))
        );
    }
}
