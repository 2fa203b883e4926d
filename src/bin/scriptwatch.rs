//! scriptwatch: watch web pages for JavaScript changes and keep their history
//!
//! Usage:
//!   scriptwatch                          → run with defaults (port 8080)
//!   scriptwatch run -p 9000 -u admin     → run with basic auth
//!   scriptwatch version                  → show version

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use scriptwatch_core::config::DEFAULT_CONFIG_FILE;
use scriptwatch_core::JsonConfigStore;
use scriptwatch_fetch::{FetcherConfig, HttpFetcher, ScriptResolver};
use scriptwatch_gateway::{start_gateway, BasicAuth, GatewayConfig, DEFAULT_PORT};
use scriptwatch_store::{GitStore, MemoryStore, VersionStore, DEFAULT_SNAPSHOT_ROOT};
use scriptwatch_watch::{TaskDeps, TelegramNotifier, WatchService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "scriptwatch",
    about = "Watch web pages for JavaScript changes and keep a diffable history",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the watcher and web server (default)
    Run,
    /// Show version
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// Port for the web server
    #[arg(short, long, default_value_t = DEFAULT_PORT, global = true)]
    port: u16,

    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0", global = true)]
    bind: String,

    /// Basic auth username (auth is enabled when a password is also set)
    #[arg(short = 'u', long, env = "SCRIPTWATCH_USERNAME", global = true)]
    username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "SCRIPTWATCH_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Target configuration file
    #[arg(long, env = "SCRIPTWATCH_CONFIG", default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Directory holding one history repository per target
    #[arg(long, env = "SCRIPTWATCH_SNAPSHOTS", default_value = DEFAULT_SNAPSHOT_ROOT, global = true)]
    snapshots: PathBuf,

    /// Static web UI directory
    #[arg(long, default_value = "web", global = true)]
    web: PathBuf,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit stderr logs as JSON lines
    #[arg(long, default_value_t = false, global = true)]
    json_logs: bool,

    /// User-Agent sent when fetching pages and scripts
    #[arg(long, global = true)]
    user_agent: Option<String>,

    /// Per-request fetch timeout in seconds
    #[arg(long, default_value_t = 30, global = true)]
    fetch_timeout: u64,

    /// Keep history in memory only (no git required, lost on exit)
    #[arg(long, default_value_t = false, global = true)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("scriptwatch v{}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run) | None => {
            let _guard = init_tracing(cli.run.log_file.as_deref(), cli.run.json_logs)?;
            run(cli.run).await?;
        }
    }

    Ok(())
}

fn init_tracing(log_file: Option<&Path>, json: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scriptwatch=info,tower_http=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut fetch_config = FetcherConfig {
        timeout: Duration::from_secs(args.fetch_timeout),
        ..FetcherConfig::default()
    };
    if let Some(ua) = args.user_agent {
        fetch_config.user_agent = ua;
    }
    let fetcher = Arc::new(HttpFetcher::new(fetch_config)?);
    let resolver = Arc::new(ScriptResolver::new(fetcher.clone()));

    let store: Arc<dyn VersionStore> = if args.ephemeral {
        warn!("History is kept in memory and will be lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let version = GitStore::git_version()
            .await
            .context("git is required for history (or run with --ephemeral)")?;
        info!("Using {} for history under {}", version, args.snapshots.display());
        Arc::new(GitStore::new(&args.snapshots))
    };

    let service = WatchService::new(
        Arc::new(JsonConfigStore::new(&args.config)),
        TaskDeps {
            resolver,
            fetcher,
            store,
            notifier: Arc::new(TelegramNotifier::new()?),
        },
    );
    let active = service
        .bootstrap()
        .await
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    info!("Watching {} active targets from {}", active, args.config.display());

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let gateway = GatewayConfig {
        bind: args.bind,
        port: args.port,
        web_dir: args.web,
        auth: BasicAuth::from_parts(args.username, args.password),
    };
    let served = start_gateway(gateway, service.clone(), shutdown).await;
    service.shutdown().await;
    served
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
