//! # coffer-server
//!
//! Loopback file server for a coffer profile.
//!
//! This binary provides:
//! - **`attachment://` resolution** over `http://127.0.0.1:<port>/v{1,2}/...`,
//!   decrypting encrypted-at-rest files on the fly
//! - **Range support** for open-ended `bytes=N-` requests (media seeking)
//! - **Orphan sweep recovery**: a sticker sweep left pending by a previous
//!   session runs once at startup. Attachment sweeps need the host's
//!   message references and keep their own flag.

mod api;
mod config;
mod error;

use std::sync::Arc;

use coffer_shared::Disposition;
use coffer_store::orphans::{OrphanConfig, ReferenceSweep};
use coffer_store::{AttachmentStore, Database, OrphanTracker, SharedDatabase};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coffer_server=debug")),
        )
        .init();

    info!("Starting coffer server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the profile database
    // -----------------------------------------------------------------------
    tokio::fs::create_dir_all(&config.user_data_path).await?;
    let db = Database::open_at(&config.user_data_path.join("coffer.db"))?;
    let shared = SharedDatabase::new(db);

    // -----------------------------------------------------------------------
    // 4. Finish an orphan sweep a previous session armed but never ran
    // -----------------------------------------------------------------------
    let stickers = AttachmentStore::new(&config.user_data_path, Disposition::Sticker);
    let tracker = OrphanTracker::new(
        OrphanConfig {
            sweep_delay: config.orphan_sweep_delay,
            ..OrphanConfig::default()
        },
        Arc::new(shared.sweep_flag(Disposition::Sticker)),
        Arc::new(ReferenceSweep::new(stickers, Arc::new(shared))),
    );
    match tracker.resume_pending_sweep().await {
        Ok(true) => info!("Pending orphan sweep completed"),
        Ok(false) => {}
        Err(e) => error!(error = %e, "Pending orphan sweep failed"),
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let app_state = AppState::new(&config.user_data_path);

    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
