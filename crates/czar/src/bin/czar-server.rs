//! Czar game server.
//!
//! Reads `CZAR_BIND_ADDR` and `CZAR_PACKS_FILE` from the environment and
//! logs according to `RUST_LOG`.

use std::sync::Arc;

use czar::{CzarError, CzarServer, PACKS_FILE_ENV, ServerConfig};
use czar_game::{CardCatalog, GameError};
use czar_repo::TokenRegistry;
use tracing_subscriber::EnvFilter;

fn load_catalog() -> Result<CardCatalog, CzarError> {
    let Ok(path) = std::env::var(PACKS_FILE_ENV) else {
        return Ok(CardCatalog::builtin().map_err(GameError::from)?);
    };
    let json = std::fs::read_to_string(&path)
        .map_err(|e| CzarError::Config(format!("{PACKS_FILE_ENV}={path}: {e}")))?;
    let catalog = CardCatalog::from_json(&json).map_err(GameError::from)?;
    tracing::info!(%path, packs = catalog.packs().len(), "loaded card packs");
    Ok(catalog)
}

#[tokio::main]
async fn main() -> Result<(), CzarError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,czar=debug")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let catalog = Arc::new(load_catalog()?);
    let server = CzarServer::<TokenRegistry>::builder()
        .config(config)
        .catalog(catalog)
        .build(TokenRegistry::new())
        .await?;
    tracing::info!(addr = %server.local_addr()?, "listening");

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown.cancel(),
            Err(e) => tracing::error!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    server.run().await
}
