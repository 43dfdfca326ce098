//! Dashsync Monitor
//!
//! Connects to the dashboard push channel, joins the configured rooms and
//! logs connection state changes, pushed events and the notifications they
//! map to. Cache entries are persisted to the local SQLite database.
//!
//! Usage: `dashsync-monitor [config.json]`. Without a file, configuration is
//! read from the environment (`DASHSYNC_*`, `.env` supported).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashsync_core::event::{TICKET_CLOSED, TICKET_CREATED, TICKET_UPDATED};
use dashsync_core::{CacheStore, ConnectionState, EventBus, MemoryCacheStore, SyncConfig};
use dashsync_query::QueryCache;
use dashsync_realtime::{ConnectOutcome, ConnectionManager, NotificationAdapter, WebSocketTransport};
use dashsync_storage::{default_database_path, Database, SqliteCacheStore};
use parking_lot::Mutex;
use tracing::{error, info, warn};

/// Log file prefix: dashsync-monitor.2026-01-22.log
const LOG_PREFIX: &str = "dashsync-monitor";

/// Get the app local data directory
///
/// - Windows: %LOCALAPPDATA%/dashsync/
/// - macOS: ~/Library/Application Support/dashsync/
/// - Linux: ~/.local/share/dashsync/
fn get_app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dashsync")
}

fn get_logs_dir() -> PathBuf {
    get_app_data_dir().join("logs")
}

/// Initialize tracing with console and file logging
///
/// - Console: colored, compact format
/// - File: daily rotation under the app data directory
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // Load .env file if present (for development)
    dotenvy::dotenv().ok();

    let logs_dir = get_logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)
        .context("Failed to create log file appender")?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG takes precedence, with sensible defaults for our crates
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info")
            .add_directive("dashsync_core=debug".parse()?)
            .add_directive("dashsync_realtime=debug".parse()?)
            .add_directive("dashsync_query=debug".parse()?)
            .add_directive("dashsync_storage=debug".parse()?)
            .add_directive("dashsync_monitor=debug".parse()?)
            .add_directive("tungstenite=warn".parse()?),
    };

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    // File layer: no colors, include more detail
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Must be kept alive for the duration of the program
    Ok(guard)
}

fn load_config() -> Result<SyncConfig> {
    match std::env::args().nth(1) {
        Some(path) => SyncConfig::from_json_file(Path::new(&path))
            .with_context(|| format!("Failed to load config from {}", path)),
        None => SyncConfig::from_env().context("Invalid DASHSYNC_* environment"),
    }
}

/// Persistent store when the database opens, in-memory otherwise
fn open_store() -> Arc<dyn CacheStore> {
    let opened = default_database_path()
        .context("No local data directory on this platform")
        .and_then(|path| {
            let db = Database::open(&path)?;
            info!("Cache database: {}", path.display());
            Ok(db)
        });

    match opened {
        Ok(db) => Arc::new(SqliteCacheStore::new(Arc::new(Mutex::new(db)))),
        Err(e) => {
            warn!("Falling back to in-memory cache: {:#}", e);
            Arc::new(MemoryCacheStore::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive for the entire program - dropping it stops file logging
    let _log_guard = init_tracing()?;
    info!("Starting Dashsync Monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Logs directory: {}", get_logs_dir().display());

    let config = load_config()?;
    info!(url = %config.connection.url, rooms = ?config.connection.rooms, "Configuration loaded");

    let cache = QueryCache::builder(config.query.clone())
        .with_store(open_store())
        .build();
    let sweeper = cache.spawn_sweeper();

    let bus = EventBus::new();
    let transport = Arc::new(WebSocketTransport::from_config(&config.connection));
    let manager = ConnectionManager::from_config(&config.connection, transport, bus.clone());

    let mut events = bus.receiver();
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(
                event_type = %event.event_type,
                room = ?event.room,
                payload = %event.payload,
                "[Monitor] Event"
            );
        }
    });

    // Ticket pushes make every cached ticket list stale
    let ticket_subscriptions: Vec<_> = [TICKET_CREATED, TICKET_UPDATED, TICKET_CLOSED]
        .into_iter()
        .map(|event_type| {
            let cache = cache.clone();
            bus.subscribe(
                event_type,
                Arc::new(move |_: &serde_json::Value| {
                    cache.invalidate("tickets");
                }),
            )
        })
        .collect();

    let (_notifier, mut notifications) = NotificationAdapter::channel(&bus);

    // Rooms are not replayed by the manager; re-join on every connect
    let rooms = config.connection.rooms.clone();
    let joiner = manager.clone();
    let _state = manager.on_connection_state_change(move |state| {
        info!(%state, "[Monitor] Connection state");
        if state == ConnectionState::Connected {
            for room in &rooms {
                joiner.join_room(room);
            }
        }
    });
    let _terminal = manager.on_terminal_failure(|failure| {
        error!(
            attempts = failure.attempts,
            last_error = ?failure.last_error,
            "[Monitor] Gave up reconnecting; restart to try again"
        );
    });

    match manager.connect() {
        ConnectOutcome::Started => {}
        other => warn!(outcome = ?other, "[Monitor] Connect not started"),
    }

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            notification = notifications.recv() => match notification {
                Some(n) => info!(level = ?n.level, title = %n.title, "[Monitor] {}", n.message),
                None => break,
            },
        }
    }

    info!("Shutting down");
    for subscription in &ticket_subscriptions {
        subscription.unsubscribe();
    }
    manager.destroy();
    event_log.abort();
    sweeper.abort();
    Ok(())
}
