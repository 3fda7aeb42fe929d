//! xbridge - Bridge Claim Backend
//!
//! Run modes:
//!   cargo run                    - Show usage
//!   cargo run -- api             - Start REST API (manual claims when the claimer is configured)
//!   cargo run -- claimer         - Start the claim transaction manager
//!   cargo run -- readiness       - Start the readiness tracker
//!   cargo run -- all             - Everything in one process

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use xbridge::api::{self, AppState, BridgeService};
use xbridge::claimtx::{ChainClient, HttpProofProvider, JsonRpcChainClient};
use xbridge::clock::{Clock, SystemClock};
use xbridge::common::{init_from_config, BridgeConfig, BridgeError, Result};
use xbridge::notify::{
    BroadcastNotifier, FanoutNotifier, MemoryNotifier, SharedNotifier, WebhookNotifier,
};
use xbridge::storage::{self, SharedLedger, SqliteLedger};
use xbridge::{ChainProgress, ClaimTxManager, ProgressPoller, ReadinessTracker, StatusProjector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Api,
    Claimer,
    Readiness,
    All,
}

impl Mode {
    fn runs_api(self) -> bool {
        matches!(self, Mode::Api | Mode::All)
    }

    fn runs_claimer(self) -> bool {
        matches!(self, Mode::Claimer | Mode::All)
    }

    fn runs_readiness(self) -> bool {
        matches!(self, Mode::Readiness | Mode::All)
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let mode = match args[1].as_str() {
        "api" => Mode::Api,
        "claimer" => Mode::Claimer,
        "readiness" => Mode::Readiness,
        "all" => Mode::All,
        _ => {
            print_usage();
            return;
        }
    };

    dotenv::dotenv().ok();
    let mut config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    apply_args(&mut config, &args[2..]);

    if let Err(e) = init_from_config(&config) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    config.print_summary();

    if let Err(e) = run(mode, config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("xbridge - Bridge Claim Backend");
    println!();
    println!("Usage:");
    println!("  xbridge api [--port <port>]        Start REST API server (default: 3001)");
    println!("  xbridge claimer                    Start the claim transaction manager");
    println!("  xbridge readiness                  Start the readiness tracker");
    println!("  xbridge all [--port <port>]        Run every component");
    println!();
    println!("Environment Variables:");
    println!("  XBRIDGE_DB_PATH           SQLite ledger path (default: data/xbridge.db)");
    println!("  XBRIDGE_L1_RPC            L1 JSON-RPC endpoint");
    println!("  XBRIDGE_L2_RPC            L2 JSON-RPC endpoint");
    println!("  XBRIDGE_PROOF_API         Merkle proof service");
    println!("  XBRIDGE_BRIDGE_ADDRESS    Bridge contract on L2 (claimer)");
    println!("  XBRIDGE_CLAIMER_ADDRESS   Node-managed sender account (claimer)");
    println!("  XBRIDGE_API_PORT          REST API port (default: 3001)");
    println!("  XBRIDGE_PUSH_WEBHOOK_URL  Status push endpoint");
    println!("  XBRIDGE_FAKE_PUSH         Set to \"1\" to record pushes in memory");
    println!("  RUST_LOG                  Log filter override");
}

fn apply_args(config: &mut BridgeConfig, args: &[String]) {
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.api.port = args[i + 1].parse().unwrap_or(config.api.port);
                i += 2;
            }
            _ => i += 1,
        }
    }
}

/// Sinks for status events; the broadcast channel always feeds the WebSockets
fn build_notifier(
    config: &BridgeConfig,
) -> Result<(SharedNotifier, BroadcastNotifier, Option<Arc<MemoryNotifier>>)> {
    let events = BroadcastNotifier::default();
    let mut fanout = FanoutNotifier::new().with(Arc::new(events.clone()));

    if let Some(url) = &config.notify.webhook_url {
        let webhook = WebhookNotifier::new(url, config.chain.rpc_timeout)
            .map_err(|e| BridgeError::internal(format!("webhook client: {}", e)))?;
        fanout = fanout.with(Arc::new(webhook));
    }

    let push_log = config.notify.fake_push.then(|| Arc::new(MemoryNotifier::new()));
    if let Some(log) = &push_log {
        fanout = fanout.with(log.clone());
    }

    Ok((Arc::new(fanout), events, push_log))
}

async fn run(mode: Mode, config: BridgeConfig) -> Result<()> {
    let ledger: SharedLedger = storage::with_deadline(
        Arc::new(SqliteLedger::new(&config.store.db_path)?),
        config.store.call_timeout,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (notifier, events, push_log) = build_notifier(&config)?;

    let projector = StatusProjector::new(config.status.clone());
    let progress = Arc::new(ChainProgress::new(config.status.ema_alpha));
    let l1: Arc<dyn ChainClient> =
        Arc::new(JsonRpcChainClient::new(&config.chain.l1_rpc, config.chain.rpc_timeout)?);
    let l2: Arc<dyn ChainClient> =
        Arc::new(JsonRpcChainClient::new(&config.chain.l2_rpc, config.chain.rpc_timeout)?);

    let readiness = Arc::new(ReadinessTracker::new(
        config.readiness.clone(),
        ledger.clone(),
        projector.clone(),
        progress.clone(),
        notifier.clone(),
        clock.clone(),
    ));

    // The API can submit manual claims whenever the claimer is configured
    let claimer = match config.validate_for_claimer() {
        Ok(()) => {
            let proofs =
                HttpProofProvider::new(&config.chain.proof_api, config.chain.rpc_timeout)?;
            Some(Arc::new(ClaimTxManager::new(
                config.claim.clone(),
                ledger.clone(),
                l2.clone(),
                Arc::new(proofs),
                projector.clone(),
                progress.clone(),
                notifier.clone(),
                clock.clone(),
            )))
        }
        Err(e) if mode.runs_claimer() => return Err(e.into()),
        Err(e) => {
            tracing::warn!(error = %e, "claimer not configured, manual claims disabled");
            None
        }
    };

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let poller = Arc::new(ProgressPoller::new(
        l1,
        l2,
        progress.clone(),
        clock.clone(),
        Duration::from_secs(config.status.progress_poll_secs.max(1)),
    ));
    {
        let cancel = cancel.clone();
        tasks.spawn(async move { poller.run(cancel).await });
    }

    if mode.runs_readiness() {
        // Exit-root ingestion is external; keep the sender so the channel stays open
        let (roots_tx, roots_rx) = mpsc::channel(256);
        let tracker = readiness.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _roots_tx = roots_tx;
            tracker.run(roots_rx, cancel).await
        });
    }

    if mode.runs_claimer() {
        if let Some(manager) = claimer.clone() {
            let cancel = cancel.clone();
            tasks.spawn(async move { manager.run(cancel).await });
        }
    }

    if mode.runs_api() {
        let service = BridgeService::new(
            config.api.clone(),
            ledger.clone(),
            projector.clone(),
            progress.clone(),
            readiness.clone(),
            claimer.clone(),
            clock.clone(),
        );
        let state = AppState::new(&config.api, service, events, push_log);
        let port = config.api.port;
        let cancel = cancel.clone();
        tasks.spawn(async move {
            api::start_server(state, port, cancel)
                .await
                .map_err(BridgeError::from)
        });
    }

    println!("Press Ctrl+C to stop");
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            cancel.cancel();
        });
    }

    let mut result = Ok(());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "component failed");
                cancel.cancel();
                result = Err(e);
            }
            Err(e) => {
                tracing::error!(error = %e, "component panicked");
                cancel.cancel();
            }
        }
    }
    result
}
