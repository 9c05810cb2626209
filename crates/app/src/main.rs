mod dispatch;
mod envelope;
#[cfg(test)]
mod fixtures;
mod mailbox;
mod registry;
mod router;
mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use talento_core::types::RegistrySettings;
use talento_storage::Database;
use talento_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let settings = RegistrySettings {
        min_motivation_len: config.min_letter_len,
        reapply_after_rejection: config.allow_reapply,
    };
    let state = router::AppState::new(metrics, database, settings, Arc::new(Utc::now));

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
