//! BallGame client
//!
//! Command line driver for the on-chain "claim the ball" game.
//! Follows rounds live over the event stream, plays automatically, submits
//! round-level admin actions, and funds burner keys.

use alloy::primitives::U256;
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use game_client::funding::DEFAULT_FUND_AMOUNT;
use game_client::{fund, ClientConfig, GameSession, SigningIdentity, SubmitOutcome, SystemClock};
use ledger_client::{JsonRpcLedger, Ledger};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod driver;

/// Buffered stream messages between the websocket task and the session loop
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Round-level action
#[derive(Debug, Clone, Copy, ValueEnum)]
enum AdminAction {
    /// Start a new round
    Start,
    /// End the current round
    End,
    /// Regenerate the current batch
    Regenerate,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the game without acting
    Watch,
    /// Claim a random unclaimed ball at a fixed interval
    Play {
        #[arg(long, default_value = "1500")]
        claim_interval_ms: u64,
    },
    /// Submit one round-level action and wait for its outcome
    Admin {
        #[arg(value_enum)]
        action: AdminAction,
    },
    /// Send native currency from a funder key to the session key
    Fund {
        /// Hex private key of the funding account
        #[arg(long)]
        funder_key: String,
        /// Amount in wei (default 1 MON)
        #[arg(long)]
        amount_wei: Option<String>,
    },
}

/// BallGame Client
#[derive(Parser, Debug)]
#[command(name = "ballgame")]
#[command(about = "Low-latency client for the on-chain BallGame", long_about = None)]
struct Args {
    /// JSON-RPC HTTP endpoint
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// JSON-RPC websocket endpoint
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// BallGame contract address
    #[arg(long, global = true)]
    contract: Option<String>,

    #[arg(long, global = true)]
    chain_id: Option<u64>,

    /// Burner key file, created on first use
    #[arg(long, global = true, default_value = "burner.key")]
    key_file: PathBuf,

    /// Hex private key (overrides --key-file)
    #[arg(long, global = true)]
    private_key: Option<String>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Seconds before reopening a dropped event stream (0 = never)
    #[arg(long, global = true, default_value = "3")]
    reconnect_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let overrides = config::Overrides {
        rpc_url: args.rpc_url.clone(),
        ws_url: args.ws_url.clone(),
        contract: args.contract.clone(),
        chain_id: args.chain_id,
    };
    let config = config::load(args.config.as_deref(), &overrides)?;
    let identity = load_identity(&args)?;

    match args.command {
        Command::Watch => run_session(config, identity, args.reconnect_secs, None).await,
        Command::Play { claim_interval_ms } => {
            let interval = Duration::from_millis(claim_interval_ms.max(1));
            run_session(config, identity, args.reconnect_secs, Some(interval)).await
        }
        Command::Admin { action } => run_admin(config, identity, action).await,
        Command::Fund {
            funder_key,
            amount_wei,
        } => run_fund(config, identity, &funder_key, amount_wei.as_deref()).await,
    }
}

fn load_identity(args: &Args) -> Result<SigningIdentity> {
    if let Some(key) = &args.private_key {
        return Ok(SigningIdentity::from_hex(key)?);
    }
    let (identity, created) = SigningIdentity::load_or_create(&args.key_file)?;
    if created {
        tracing::info!("Fund the new key before playing: ballgame fund --funder-key <KEY>");
    }
    Ok(identity)
}

fn connect_ledger(config: &ClientConfig) -> Result<Arc<dyn Ledger>> {
    Ok(Arc::new(JsonRpcLedger::new(&config.rpc_url, config.contract)?))
}

/// Run a live session until Ctrl+C, optionally playing
async fn run_session(
    config: ClientConfig,
    identity: SigningIdentity,
    reconnect_secs: u64,
    claim_interval: Option<Duration>,
) -> Result<()> {
    tracing::info!("Starting BallGame session");
    tracing::info!("  RPC: {}", config.rpc_url);
    tracing::info!("  WebSocket: {}", config.ws_url);
    tracing::info!("  Contract: {}", config.contract);

    let ledger = connect_ledger(&config)?;
    let session = GameSession::new(config.clone(), ledger, identity, Arc::new(SystemClock));
    session.initialize().await;

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconnect = (reconnect_secs > 0).then(|| Duration::from_secs(reconnect_secs));

    let printer = tokio::spawn(driver::print_updates(session.clone()));
    let supervisor = tokio::spawn(driver::supervise_stream(
        config.ws_url.clone(),
        config.contract,
        session.clone(),
        events_tx,
        reconnect,
        shutdown_rx.clone(),
    ));
    let player = claim_interval.map(|interval| {
        tracing::info!("Autoplay: one claim every {}ms", interval.as_millis());
        tokio::spawn(driver::autoplay(session.clone(), interval, shutdown_rx.clone()))
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutting down..."),
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });
    tracing::info!("Press Ctrl+C to stop.");

    let mut loop_shutdown = shutdown_rx;
    session
        .clone()
        .run(events_rx, async move {
            let _ = loop_shutdown.changed().await;
        })
        .await;

    let _ = supervisor.await;
    if let Some(player) = player {
        let _ = player.await;
    }
    printer.abort();

    let view = session.view();
    tracing::info!("Final score {} in round #{}", view.my_score, view.round.round_id);
    for (rank, (player, score)) in view.leaderboard.iter().enumerate().take(5) {
        tracing::info!("  {}. {} {}", rank + 1, player, score);
    }
    Ok(())
}

async fn run_admin(config: ClientConfig, identity: SigningIdentity, action: AdminAction) -> Result<()> {
    let ledger = connect_ledger(&config)?;
    let session = GameSession::new(config, ledger, identity, Arc::new(SystemClock));
    session.initialize().await;

    let submission = match action {
        AdminAction::Start => session.start_round()?,
        AdminAction::End => session.end_round()?,
        AdminAction::Regenerate => session.regenerate()?,
    };
    let Some(handle) = submission else {
        bail!("{:?} is already in flight", action);
    };

    match handle.await? {
        SubmitOutcome::Accepted { action, tx_hash, nonce }
        | SubmitOutcome::AcceptedAfterRetry { action, tx_hash, nonce } => {
            tracing::info!("{} accepted with nonce {}: {}", action, nonce, tx_hash);
            Ok(())
        }
        SubmitOutcome::ConfirmedByEvent {
            action,
            broadcast_error,
        } => {
            tracing::warn!("{} landed despite broadcast error: {}", action, broadcast_error);
            Ok(())
        }
        SubmitOutcome::Failed { action, reason } => bail!("{} failed: {}", action, reason),
    }
}

async fn run_fund(
    config: ClientConfig,
    identity: SigningIdentity,
    funder_key: &str,
    amount_wei: Option<&str>,
) -> Result<()> {
    let funder = SigningIdentity::from_hex(funder_key)?;
    let amount = match amount_wei {
        Some(text) => text
            .parse::<U256>()
            .map_err(|e| anyhow!("invalid amount {}: {}", text, e))?,
        None => DEFAULT_FUND_AMOUNT,
    };

    let ledger = JsonRpcLedger::new(&config.rpc_url, config.contract)?;
    let balance = fund(
        &ledger,
        &funder,
        identity.address(),
        amount,
        config.chain_id,
        (
            config.fallback_max_fee_per_gas,
            config.fallback_max_priority_fee_per_gas,
        ),
    )
    .await?;

    tracing::info!("{} now holds {} wei", identity.address(), balance);
    Ok(())
}
