use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::Result;
use wallet_sync::config::SyncConfig;
use wallet_sync::synchronizer::Synchronizer;
use wallet_sync::testing as demo_fakes;

#[derive(Parser, Debug)]
#[command(
    name = "wallet-sync-demo",
    version,
    about = "Demo driver for the wallet synchronizer core"
)]
struct Args {
    /// Indexing server endpoint. Falls back to WALLET_SYNC_SERVER, then fails.
    #[arg(long)]
    server: Option<String>,

    /// Stale-status watchdog timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    generic_network_timeout_seconds: u64,

    /// Steady-state main-loop tick, in milliseconds.
    #[arg(long, default_value_t = 100)]
    main_loop_interval_ms: u64,

    /// Max in-flight RPCs to the server at once.
    #[arg(long, default_value_t = 10)]
    network_request_concurrency: usize,

    /// Addresses to watch, comma-separated. With no real server wired in, the demo harness
    /// starts with empty history for each and simply reaches quiescence.
    #[arg(long, value_delimiter = ',')]
    address: Vec<String>,

    /// How long to let the synchronizer run before reporting and exiting.
    #[arg(long, default_value_t = 2)]
    run_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = SyncConfig::new(
        args.server,
        args.generic_network_timeout_seconds,
        args.main_loop_interval_ms,
        args.network_request_concurrency,
    )?;

    tracing::info!(server = %config.server, "wallet-sync-demo starting");

    // This binary has no real server transport or wallet database wired in (those are
    // explicitly out of scope for the core); it drives the engine against the same
    // in-memory fakes the test suite uses, so the demo is honest about what it exercises.
    let server = demo_fakes::FakeServer::new();
    let adb = demo_fakes::FakeAddressBook::new();
    for addr in &args.address {
        adb.add_address(addr).await;
    }

    let (synchronizer, mut failures) = Synchronizer::new(
        server,
        adb,
        Arc::new(demo_fakes::AllowAllAddressValidator),
        Arc::new(demo_fakes::AllowAllAssetValidator),
        Arc::new(demo_fakes::FakeScripthashDeriver),
        config,
    );
    let synchronizer = Arc::new(synchronizer);

    let run_handle = tokio::spawn(synchronizer.clone().run());

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.run_seconds)) => {
            tracing::info!(
                requests_sent = synchronizer.requests_sent(),
                requests_answered = synchronizer.requests_answered(),
                up_to_date = synchronizer.is_up_to_date().await,
                "demo run complete"
            );
        }
        Some(err) = failures.recv() => {
            tracing::error!(error = %err, "synchronizer failed");
        }
    }

    run_handle.abort();
    Ok(())
}
