//! # Lamed Notifier
//!
//! Watches the telemedicine realtime database and turns record changes into
//! push notifications, plus scheduled appointment reminders.
//!
//! Usage:
//!   lamed-notifier                          # Run with ~/.lamed/config.toml + env
//!   lamed-notifier --config ./lamed.toml    # Explicit config file
//!   lamed-notifier --port 8080 --verbose    # Custom status port, debug logs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lamed_core::config::LamedConfig;
use lamed_feed::RtdbFeed;
use lamed_gateway::AppState;
use lamed_notify::{
    BootstrapGate, Dispatcher, HttpDelivery, Notifier, Pipeline, RecipientResolver, ReminderScheduler,
    ReminderThreshold, TaskPool, pool, routers,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// How long in-flight notifications get to finish on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "lamed-notifier",
    version,
    about = "🔔 Lamed Notifier: realtime database push notifications"
)]
struct Cli {
    /// Config file (defaults to ~/.lamed/config.toml)
    #[arg(short, long, env = "LAMED_CONFIG")]
    config: Option<String>,

    /// Status server port (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds between reminder scans
    #[arg(long)]
    scan_interval: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "lamed_notifier=debug,lamed_core=debug,lamed_feed=debug,lamed_notify=debug,lamed_gateway=debug,tower_http=debug"
    } else {
        "lamed_notifier=info,lamed_core=info,lamed_feed=info,lamed_notify=info,lamed_gateway=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(cli: &Cli) -> lamed_core::Result<LamedConfig> {
    let mut config = match &cli.config {
        Some(path) => LamedConfig::load_from(&expand_path(path))?,
        None => LamedConfig::load()?,
    };
    config.apply_env();
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(secs) = cli.scan_interval {
        config.reminders.scan_interval_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("🔔 Lamed Notifier v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("   🗄️  Database: {}", config.database.url);

    // Feed, delivery, and the notifier shared by routers and reminders
    let feed = Arc::new(RtdbFeed::new(&config.database)?);
    let delivery = HttpDelivery::new(&config.delivery);
    match delivery.endpoint() {
        Some(endpoint) => tracing::info!("   📮 Delivery: {endpoint}"),
        None => tracing::warn!(
            "⚠️ No delivery endpoint configured (set {}); notifications will fail",
            lamed_core::config::ENV_DELIVERY_URL
        ),
    }
    let dispatcher = Dispatcher::new(Arc::new(delivery));
    let stats = dispatcher.stats();
    let history = dispatcher.history();
    let resolver = RecipientResolver::new(feed.clone(), &config.listener.routing_field);
    let notifier = Arc::new(Notifier::new(resolver, dispatcher));

    // Routed notices run on the task pool
    let (task_pool, reports) = TaskPool::new(config.listener.max_concurrent_tasks);
    tokio::spawn(pool::run_reporter(reports));
    let pipeline = Arc::new(Pipeline::new(notifier.clone(), task_pool.clone()));

    let gate = BootstrapGate::new(feed.clone(), pipeline, config.listener.pre_bootstrap);
    routers::register_all(&gate, &config.listener);

    // Reminder scheduler
    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = if config.reminders.enabled {
        let scheduler = Arc::new(ReminderScheduler::new(
            feed.clone(),
            notifier.clone(),
            ReminderThreshold::from_config(&config.reminders),
        ));
        let every = Duration::from_secs(config.reminders.scan_interval_secs.max(1));
        Some(tokio::spawn(scheduler.run(every, stop_rx)))
    } else {
        tracing::info!("⏰ Reminders disabled");
        None
    };

    // Status server
    let server = if config.server.enabled {
        let state = AppState::new(stats, history, gate.clone());
        let host = config.server.host.clone();
        let port = config.server.port;
        let mut server_stop = stop_tx.subscribe();
        Some(tokio::spawn(async move {
            let stopped = async move {
                let _ = server_stop.wait_for(|stop| *stop).await;
            };
            if let Err(e) = lamed_gateway::start(state, &host, port, stopped).await {
                tracing::error!("❌ Status server failed: {e}");
            }
        }))
    } else {
        None
    };

    shutdown_signal().await;
    tracing::info!("🛑 Shutting down");

    let _ = stop_tx.send(true);
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    if let Some(handle) = server {
        let _ = handle.await;
    }
    if task_pool.shutdown(DRAIN_TIMEOUT).await {
        tracing::info!("✅ All notifications drained");
    } else {
        tracing::warn!(
            "⚠️ {} notification task(s) still running after {}s, exiting",
            task_pool.in_flight(),
            DRAIN_TIMEOUT.as_secs()
        );
    }
    Ok(())
}
