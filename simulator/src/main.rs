use anyhow::{Context, Result};
use clap::Parser;
use raffle_simulator::{Api, RecordPersistence, Simulator, SimulatorConfig};
use raffle_types::RaffleId;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Raffle created in WAITING on startup when the store has none.
    #[arg(long)]
    raffle_id: Option<u64>,

    /// Path to SQLite database for record persistence (disabled when omitted).
    #[arg(long)]
    persistence_path: Option<PathBuf>,

    /// Max queued record persistence writes (0 uses default).
    #[arg(long)]
    persistence_buffer: Option<usize>,

    /// Interval between full presence syncs in milliseconds (0 disables).
    #[arg(long)]
    presence_sync_interval_ms: Option<u64>,

    /// Max queued record changes in the broadcast channel (0 uses default).
    #[arg(long)]
    updates_broadcast_buffer: Option<usize>,

    /// Max queued presence events per channel (0 uses default).
    #[arg(long)]
    presence_broadcast_buffer: Option<usize>,

    /// Max queued WebSocket outbound messages per connection (0 uses default).
    #[arg(long)]
    ws_outbound_buffer: Option<usize>,

    /// Max WebSocket message size in bytes (0 uses default).
    #[arg(long)]
    ws_max_message_bytes: Option<usize>,
}

/// Maps an optional arg value keeping default on 0: 0 => default, Some(v) => Some(v), None => default
fn map_optional_default_on_zero<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => default,
        Some(v) => Some(v),
        None => default,
    }
}

fn build_config(args: &Args) -> Result<SimulatorConfig> {
    let defaults = SimulatorConfig::default();
    if let Some(0) = args.raffle_id {
        anyhow::bail!("raffle_id must be > 0 when set");
    }

    Ok(SimulatorConfig {
        raffle_id: args.raffle_id.map(RaffleId).unwrap_or(defaults.raffle_id),
        persistence_path: args.persistence_path.clone(),
        persistence_buffer: map_optional_default_on_zero(
            args.persistence_buffer,
            defaults.persistence_buffer,
        ),
        // Zero is meaningful here: it turns periodic syncs off.
        presence_sync_interval_ms: args
            .presence_sync_interval_ms
            .or(defaults.presence_sync_interval_ms),
        updates_broadcast_buffer: map_optional_default_on_zero(
            args.updates_broadcast_buffer,
            defaults.updates_broadcast_buffer,
        ),
        presence_broadcast_buffer: map_optional_default_on_zero(
            args.presence_broadcast_buffer,
            defaults.presence_broadcast_buffer,
        ),
        ws_outbound_buffer: map_optional_default_on_zero(
            args.ws_outbound_buffer,
            defaults.ws_outbound_buffer,
        ),
        ws_max_message_bytes: map_optional_default_on_zero(
            args.ws_max_message_bytes,
            defaults.ws_max_message_bytes,
        ),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = build_config(&args)?;

    let (persistence, restored) = if let Some(path) = &config.persistence_path {
        let (persistence, records) =
            RecordPersistence::load_and_start_sqlite(path, config.persistence_buffer_capacity())
                .context("load and start record persistence")?;
        info!(
            path = %path.display(),
            count = records.len(),
            "Record persistence enabled"
        );
        (Some(persistence), records)
    } else {
        (None, Vec::new())
    };

    let simulator = Arc::new(Simulator::new_with_persistence(
        config,
        persistence,
        restored,
    ));
    simulator.start_presence_sync();

    let app = Api::new(simulator).router();
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}
