// Lineup prediction server entry point.
//
// Startup sequence:
// 1. Load config (copying defaults on first run)
// 2. Initialize tracing (file or stderr, per config)
// 3. Open database
// 4. Build the engine over the store
// 5. Serve WebSocket clients until Ctrl+C

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use lineup_core::engine::Engine;
use lineup_server::config::{self, LoggingConfig};
use lineup_server::db::Database;
use lineup_server::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Config comes first so the log destination is known.
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Tracing
    init_tracing(&config.logging)?;
    info!("Lineup server starting up");
    info!(
        "Config loaded: listen={}, database={}, confirm_on_lineup={}",
        config.listen_addr(),
        config.database.path,
        config.lifecycle.confirm_on_lineup
    );

    // 3. Database
    let db = Database::open(&config.database.path).context("failed to open database")?;
    info!("Database opened at {}", config.database.path);

    // 4. Engine
    let engine = Arc::new(Engine::new(db, config.engine_options()));

    // 5. Serve
    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;

    tokio::select! {
        result = ws_server::run(listener, engine) => {
            if let Err(e) = &result {
                error!("WebSocket server error: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    info!("Lineup server shut down cleanly");
    Ok(())
}

/// Initialize tracing to the configured log file, or stderr when none is set.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lineup_server=info,lineup_core=info,warn"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    match &logging.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let subscriber = builder
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_thread_ids(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
        }
    }

    Ok(())
}
