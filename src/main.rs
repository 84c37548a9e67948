//! This file defines the fluxvis binary entry point.

use fluxvis::app;
use fluxvis::cli;
use fluxvis::metrics;
use fluxvis::server;
use fluxvis::sled_store::SledStore;
use fluxvis::tracing;

use expanduser::expanduser;
use std::error::Error;
use std::sync::Arc;

/// Application entry point
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = cli::parse();
    tracing::init_tracing(&args)?;
    ::tracing::debug!("{:?}", args);
    metrics::register_metrics();

    if args.use_rayon {
        if let Some(threads) = args.thread_limit {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()?;
        }
    }

    let store = SledStore::open(&expanduser(&args.store_path)?)?;
    let state = app::init(&args, Arc::new(store)).await?;
    let service = app::service(state);
    let result = server::serve(&args, service).await;
    tracing::shutdown_tracing();
    Ok(result?)
}
