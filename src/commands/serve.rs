//! Live mode
//!
//! Wires the source watcher into the driver and exposes the aggregator to
//! observers over HTTP server-sent events. Runs until Ctrl-C, until the
//! watcher stops delivering, or until the event server fails.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::cli::ServeArgs;
use crate::engine::{Aggregator, Driver};
use crate::error::{LiveCellError, Result};
use crate::lang::calc::{CalcEvaluator, CalcParser};
use crate::server::{EventServer, SourceWatcher};

/// Run the live server
pub fn run_serve(args: &ServeArgs) -> Result<String> {
    let runtime = super::runtime()?;
    let outcome = runtime.block_on(serve(args.clone()));
    // Evaluations still sleeping on the blocking pool are abandoned.
    runtime.shutdown_timeout(Duration::from_millis(500));
    outcome?;
    Ok(String::new())
}

pub async fn serve(args: ServeArgs) -> Result<()> {
    let addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or_else(|| LiveCellError::Config {
            message: format!("could not resolve host '{}'", args.host),
        })?;

    let aggregator = Aggregator::spawn(args.observer_config());
    let server = EventServer::bind(addr, aggregator.clone()).await?;

    let (tx, rx) = mpsc::channel(16);
    let watcher = SourceWatcher::with_config(&args.file, args.watcher_config());
    let _watcher_handle = watcher.start(tx)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        file = %args.file.display(),
        addr = %server.local_addr()?,
        "livecell serving"
    );

    let driver = Driver::new(CalcParser::new(), CalcEvaluator::new(), aggregator);
    tokio::select! {
        result = driver.run(rx) => result?,
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; shutting down");
        }
    }
    Ok(())
}
