//! Raffle admin - issues draw commands against a running backend.
//!
//! Usage:
//!   cargo run --release --bin raffle-admin -- --url http://localhost:8080 start-draw
//!   cargo run --release --bin raffle-admin -- pick-winner
//!   cargo run --release --bin raffle-admin -- watch
//!
//! Options:
//!   -u, --url         Backend URL (default: RAFFLE_URL or http://localhost:8080)
//!   -r, --raffle      Raffle id (default: 1)
//!       --settle-ms   Time to wait for the first presence sync before deciding (default: 250)

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use raffle_client::{Admin, Client, ClientConfig, RaffleView};
use raffle_types::{ChannelStatus, RaffleId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about = "Raffle admin controls")]
struct Args {
    #[arg(short, long)]
    url: Option<String>,

    #[arg(short, long, default_value = "1")]
    raffle: u64,

    #[arg(long, default_value = "250")]
    settle_ms: u64,

    #[command(subcommand)]
    command: AdminCommand,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Move a waiting raffle into the draw.
    StartDraw,
    /// Pick a winner among the participants currently present.
    PickWinner,
    /// Return the raffle to waiting and clear the winner.
    Reset,
    /// Print every view update until interrupted.
    Watch,
}

fn describe(view: &RaffleView) -> String {
    let winner = view
        .winner()
        .map(|winner| winner.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "state={} winner={} present={} channel={:?}",
        view.state(),
        winner,
        view.presence().len(),
        view.channel_status()
    )
}

async fn watch(admin: &Admin) -> Result<()> {
    let mut views = admin.views();
    loop {
        let view = Arc::clone(&views.borrow_and_update());
        info!("{}", describe(&view));
        if let Some(warning) = view.warning() {
            warn!(%warning, "channel degraded");
        }
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut config = ClientConfig::from_env();
    if let Some(url) = args.url {
        config.url = url;
    }
    let client = Client::with_config(config).context("invalid backend URL")?;
    let raffle_id = RaffleId(args.raffle);
    let admin = Admin::attach(Arc::new(client.clone()), &client, raffle_id)
        .await
        .context("failed to attach to raffle")?;

    let view = tokio::time::timeout(
        LOAD_TIMEOUT,
        admin.wait_for(|view| {
            view.channel_status() == Some(ChannelStatus::Active)
                && (view.is_loaded() || view.error().is_some())
        }),
    )
    .await
    .map_err(|_| anyhow!("timed out waiting for raffle {raffle_id}"))?
    .ok_or_else(|| anyhow!("synchronizer stopped"))?;
    if let Some(error) = view.error() {
        warn!(%error, "raffle not loaded");
    }
    tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;
    info!("{}", describe(&admin.view()));

    let result = match args.command {
        AdminCommand::StartDraw => admin.start_draw().await.map_err(anyhow::Error::from),
        AdminCommand::PickWinner => admin.pick_winner().await.map_err(anyhow::Error::from),
        AdminCommand::Reset => admin.reset().await.map_err(anyhow::Error::from),
        AdminCommand::Watch => watch(&admin).await,
    };
    match &result {
        Ok(()) => info!("done"),
        Err(err) => warn!(%err, "command failed"),
    }
    admin.detach().await;
    result
}
