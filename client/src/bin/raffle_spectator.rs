//! Raffle spectator - joins a raffle and reports the draw as it happens.
//!
//! Usage:
//!   cargo run --release --bin raffle-spectator -- --url http://localhost:8080 --participant alice
//!
//! Options:
//!   -u, --url          Backend URL (default: RAFFLE_URL or http://localhost:8080)
//!   -r, --raffle       Raffle id (default: 1)
//!   -p, --participant  Participant id (default: random)

use anyhow::{Context, Result};
use clap::Parser;
use raffle_client::{Client, ClientConfig, Spectator};
use raffle_types::{ParticipantId, RaffleId, RaffleState};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Raffle spectator")]
struct Args {
    #[arg(short, long)]
    url: Option<String>,

    #[arg(short, long, default_value = "1")]
    raffle: u64,

    #[arg(short, long)]
    participant: Option<String>,
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
    let participant = args
        .participant
        .map(ParticipantId::new)
        .unwrap_or_else(ParticipantId::generate);
    let client = Client::with_config(config).context("invalid backend URL")?;
    let spectator = Spectator::attach(
        Arc::new(client.clone()),
        &client,
        RaffleId(args.raffle),
        participant.clone(),
    )
    .await
    .context("failed to attach to raffle")?;
    info!(%participant, "joined raffle");

    let mut views = spectator.views();
    let mut last = None;
    loop {
        let view = Arc::clone(&views.borrow_and_update());
        let shown = (view.state(), view.winner().cloned(), view.error().map(str::to_string));
        if last.as_ref() != Some(&shown) {
            match (view.state(), view.error()) {
                (_, Some(error)) => warn!(%error, "raffle unavailable"),
                (RaffleState::Drawn, None) if view.is_winner(&participant) => {
                    info!("you won the raffle")
                }
                (RaffleState::Drawn, None) => info!(
                    winner = %view.winner().map(|winner| winner.as_str()).unwrap_or("-"),
                    "winner announced"
                ),
                (state, None) => info!(%state, "raffle updated"),
            }
            last = Some(shown);
        }
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    spectator.detach().await;
    info!("left raffle");
    Ok(())
}
