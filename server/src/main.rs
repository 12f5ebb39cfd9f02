#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::sync::Arc;

use simple_bank::config::ServerConfig;
use simple_bank::db::Store;
use simple_bank::queue::{Distributor, OutboxRelay, Processor, ProcessorConfig, StoreBroker};
use simple_bank::session::SessionRegistry;
use simple_bank::storage::{Database, SystemTimeSource, TimeSource};
use simple_bank::token::new_maker;
use simple_bank::worker;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected for shared state
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simple_bank=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: data_directory={}, token_scheme={:?}, worker_concurrency={}",
        config.data_directory.display(),
        config.token_scheme,
        config.worker_concurrency
    );

    // Pre-condition: config.data_directory is a valid path.
    // Post-condition: The directory exists and both logs can be opened in it.
    if let Err(e) = std::fs::create_dir_all(&config.data_directory) {
        tracing::error!("Failed to create data directory: {e}");
        std::process::exit(1);
    }

    let bank_db = Database::open(&config.bank_wal_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open bank database: {e}");
        std::process::exit(1);
    });
    let queue_db = Database::open(&config.queue_wal_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open task queue: {e}");
        std::process::exit(1);
    });

    let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let broker = Arc::new(StoreBroker::new(queue_db));
    let distributor = Arc::new(Distributor::new(broker.clone(), Arc::clone(&time)));
    let store = Arc::new(
        Store::new(bank_db, config.store_config(), Arc::clone(&time))
            .with_distributor(Arc::clone(&distributor)),
    );

    let maker = new_maker(
        config.token_scheme,
        config.token_symmetric_key.as_bytes(),
        Arc::clone(&time),
    )
    .unwrap_or_else(|e| {
        tracing::error!("Failed to create token maker: {e}");
        std::process::exit(1);
    });
    // Held for the request layer mounted on top of this core.
    let _sessions = SessionRegistry::new(
        Arc::clone(&store),
        maker,
        Arc::clone(&time),
        config.session_config(),
    );

    let processor = Arc::new(Processor::new(
        broker,
        worker::new_serve_mux(Arc::clone(&store)),
        ProcessorConfig {
            concurrency: config.worker_concurrency,
            lease_duration: config.task_lease_duration,
            ..ProcessorConfig::default()
        },
        Arc::clone(&time),
    ));
    let processor = processor.start();
    let relay = OutboxRelay::new(store, distributor, config.relay_interval).start();
    tracing::info!("task processor and outbox relay started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("shutting down");

    relay.shutdown().await;
    processor.shutdown().await;
}
