mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod query;
#[cfg(feature = "app")]
pub mod server;
pub mod storage;
pub mod store;
pub mod transfer;
pub mod validation;

pub use crate::config::{BackupSchedule, Config};
pub use crate::error::{ErrorKind, StoreError, ValidationErrors};
pub use crate::models::{Priority, Status, Task, TaskInput};
pub use crate::store::TaskStore;

/// Opens the store described by `config`, serves the HTTP API until Ctrl-C, then flushes
/// the store.
#[cfg(feature = "app")]
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;

    use crate::commands::AppCtx;

    let store = TaskStore::open(config.storage(), config.backup_schedule)?;
    let bind = config.bind.clone();
    let ctx = Arc::new(AppCtx::new(store.clone(), config));
    let app = server::router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tokio::signal::ctrl_c()))
        .await?;

    store.close()?;
    Ok(())
}

/// Resolves when `signal` fires. A signal that cannot be installed never resolves, so the
/// server keeps running instead of stopping right after start.
#[cfg(feature = "app")]
async fn shutdown_signal<F>(signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => log::info!("shutdown requested"),
        Err(err) => {
            log::error!("cannot listen for Ctrl-C, serving until killed: {err}");
            std::future::pending::<()>().await;
        }
    }
}
