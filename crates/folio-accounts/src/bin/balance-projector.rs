//! Keeps the account balance projection current with the PostgreSQL event
//! feed until interrupted.

use std::error::Error;
use std::sync::{Arc, Mutex};

use folio_accounts::application::query_handlers::AccountBalances;
use folio_event_store::telemetry::init_tracing;
use folio_event_store::{PgEventStore, Projector, StoreConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = StoreConfig::from_env()?;
    init_tracing(config.log_format);

    tracing::info!("Starting balance projector");

    let store = PgEventStore::connect(&config).await?;
    store.ensure_schema().await?;

    let balances = Arc::new(Mutex::new(AccountBalances::new()));
    let mut projector = Projector::new(Arc::new(store), Arc::clone(&balances))
        .with_batch_size(config.read_page_size);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    projector.run(config.poll_interval, shutdown_rx).await;

    let (accounts, total) = match balances.lock() {
        Ok(view) => (view.len(), view.total()),
        Err(poisoned) => {
            let view = poisoned.into_inner();
            (view.len(), view.total())
        }
    };
    tracing::info!(
        checkpoint = projector.checkpoint(),
        accounts,
        total,
        "balance projector stopped"
    );
    Ok(())
}
