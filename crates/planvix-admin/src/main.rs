//! # planvix-admin
//!
//! Activity feed binary. `serve` runs the feed server, `tail` follows a feed
//! through the reconnecting client, `token` mints an admin JWT for testing.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use planvix_client::{AgentConfig, ReconnectAgent, WsConnector};
use planvix_core::logging::init_subscriber;
use planvix_core::{ActivityKind, FeedEvent, NewActivity};
use planvix_events::{ConnectionConfig, EventLog, MemoryEventLog, SqliteEventLog};
use planvix_server::metrics::install_recorder;
use planvix_server::{ActivityBroadcaster, FeedServer, JwtVerifier, ServerConfig, issue_admin_token};
use planvix_settings::{PlanvixSettings, StorageBackend, StorageSettings};

/// Planvix admin activity feed.
#[derive(Parser, Debug)]
#[command(name = "planvix-admin", about = "Planvix admin activity feed")]
struct Cli {
    /// Settings file (defaults to `~/.planvix/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the feed server.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
        /// Event log path, or `:memory:` (overrides settings).
        #[arg(long)]
        db_path: Option<String>,
        /// Publish a synthetic activity every N seconds.
        #[arg(long)]
        demo_every: Option<u64>,
    },
    /// Follow a feed and print each event as a JSON line.
    Tail {
        /// Feed URL.
        #[arg(long, default_value = "ws://127.0.0.1:8000/ws/admin/activity")]
        url: String,
        /// Admin token; minted from the configured secret when omitted.
        #[arg(long)]
        token: Option<String>,
    },
    /// Print an admin token signed with the configured secret.
    Token {
        /// Token subject.
        #[arg(long, default_value = "admin@planvix.io")]
        subject: String,
        /// Role claim.
        #[arg(long, default_value = "admin")]
        role: String,
        /// Lifetime in seconds.
        #[arg(long, default_value = "3600")]
        ttl_secs: u64,
    },
}

fn load(path: Option<&PathBuf>) -> Result<PlanvixSettings> {
    let path = path.cloned().unwrap_or_else(planvix_settings::settings_path);
    planvix_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn require_secret(settings: &PlanvixSettings) -> Result<&str> {
    let secret = settings.auth.jwt_secret.as_str();
    if secret.is_empty() {
        bail!("auth.jwtSecret is empty; set it in settings or via PLANVIX_SECRET_KEY");
    }
    Ok(secret)
}

fn open_log(storage: &StorageSettings) -> Result<Arc<dyn EventLog>> {
    match storage.backend() {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory event log; activity is lost on restart");
            Ok(Arc::new(MemoryEventLog::new()))
        }
        StorageBackend::Sqlite(path) => {
            let config = ConnectionConfig {
                pool_size: storage.pool_size,
                busy_timeout_ms: storage.busy_timeout_ms,
                ..ConnectionConfig::default()
            };
            let log = SqliteEventLog::open(&path, &config)
                .with_context(|| format!("Failed to open event log at {}", path.display()))?;
            tracing::info!(path = %path.display(), "event log opened");
            Ok(Arc::new(log))
        }
    }
}

/// The `n`th synthetic activity of the demo producer.
fn demo_activity(n: u64) -> NewActivity {
    let kinds = ActivityKind::ALL;
    let kind = kinds[usize::try_from(n).unwrap_or(0) % kinds.len()];
    let activity = NewActivity::new(kind, "").with_actor("demo");
    match kind {
        ActivityKind::UserSignup | ActivityKind::AdminLogin => {
            activity.with_attribute("email", format!("user{n}@planvix.io"))
        }
        ActivityKind::StrategyGenerated | ActivityKind::StrategyDeleted => {
            activity.with_attribute("strategy_id", format!("strat-{n}"))
        }
        ActivityKind::PaymentReceived => activity.with_attribute("amount", 49),
    }
}

fn spawn_demo(broadcaster: Arc<ActivityBroadcaster>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        let mut n = 0_u64;
        loop {
            let _ = interval.tick().await;
            let _ = broadcaster.spawn_publish(demo_activity(n));
            n += 1;
        }
    })
}

async fn serve(
    mut settings: PlanvixSettings,
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<String>,
    demo_every: Option<u64>,
) -> Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    if db_path.is_some() {
        settings.storage.db_path = db_path;
    }
    let secret = require_secret(&settings)?;

    let log = open_log(&settings.storage)?;
    let verifier = Arc::new(JwtVerifier::new(secret, settings.auth.allowed_roles.clone()));
    let metrics = install_recorder();
    let server = FeedServer::new(ServerConfig::from_settings(&settings), log, verifier, metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Planvix feed listening on http://{addr}");

    let demo = demo_every
        .filter(|secs| *secs > 0)
        .map(|secs| spawn_demo(Arc::clone(server.broadcaster()), Duration::from_secs(secs)));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if let Some(demo) = demo {
        demo.abort();
    }
    if !server.stop(vec![handle]).await {
        tracing::warn!("shutdown timed out with connections still draining");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn tail(settings: &PlanvixSettings, url: String, token: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => issue_admin_token(
            require_secret(settings)?,
            "tail@planvix.io",
            "admin",
            Duration::from_secs(24 * 3600),
        )
        .context("Failed to mint token")?,
    };

    let connector = Arc::new(WsConnector::new(url, Some(token)));
    let handle = ReconnectAgent::spawn(
        connector,
        AgentConfig::from_settings(&settings.client),
        |event: FeedEvent| match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(error) => tracing::warn!(%error, "unprintable event"),
        },
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    handle.disconnect().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.config.as_ref())?;
    init_subscriber(&settings.logging.level, settings.logging.json);

    match cli.command {
        Command::Serve {
            host,
            port,
            db_path,
            demo_every,
        } => serve(settings, host, port, db_path, demo_every).await,
        Command::Tail { url, token } => tail(&settings, url, token).await,
        Command::Token {
            subject,
            role,
            ttl_secs,
        } => {
            let token = issue_admin_token(
                require_secret(&settings)?,
                &subject,
                &role,
                Duration::from_secs(ttl_secs),
            )
            .context("Failed to mint token")?;
            println!("{token}");
            Ok(())
        }
    }
}
