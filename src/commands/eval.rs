//! One-shot evaluation
//!
//! Runs the same driver, worker and aggregator pipeline as live mode for a
//! single snapshot of the file, then waits until every declaration in the
//! ordering has a status.

use std::time::Duration;

use crate::cli::{EvalArgs, OutputFormat};
use crate::engine::{Aggregator, Driver, ObserverConfig};
use crate::error::{LiveCellError, Result};
use crate::lang::calc::{CalcEvaluator, CalcParser};
use crate::schema::{ResultSet, Status};
use crate::server::read_source;

pub fn run_eval(args: &EvalArgs) -> Result<String> {
    let text = read_source(&args.file)?;
    let runtime = super::runtime()?;
    let outcome = runtime.block_on(evaluate_source(
        &text,
        Duration::from_millis(args.timeout_ms),
    ));
    runtime.shutdown_timeout(Duration::from_millis(100));
    let state = outcome?;

    match args.format {
        OutputFormat::Text => Ok(format_text(&state)),
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(&state)?)),
    }
}

/// Evaluate `text` once and return the settled result set
pub async fn evaluate_source(text: &str, timeout: Duration) -> Result<ResultSet> {
    // At most one update per item follows the reparse.
    let aggregator = Aggregator::spawn(ObserverConfig {
        queue_capacity: text.lines().count() + 2,
    });
    let mut driver = Driver::new(CalcParser::new(), CalcEvaluator::new(), aggregator.clone());
    driver.reparse(text)?;

    let mut updates = aggregator.subscribe().await?;
    let mut state = ResultSet::default();
    let settle = async {
        while let Some(update) = updates.recv().await {
            state.merge(update);
            if state.is_settled() {
                return Ok(());
            }
        }
        Err(LiveCellError::AggregatorClosed)
    };
    let outcome = tokio::time::timeout(timeout, settle).await;
    driver.shutdown();

    match outcome {
        Ok(settled) => settled?,
        Err(_) => {
            return Err(LiveCellError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
    Ok(state)
}

/// One line per declaration in source order
///
/// ```text
/// [ok]  x = 1
/// [err] y = x / 0
///       division by zero
/// ```
pub fn format_text(state: &ResultSet) -> String {
    let mut out = String::new();
    for (key, result) in state.ordered() {
        let Some(result) = result else {
            out.push_str(&format!("[??]  <no result for key {}>\n", key));
            continue;
        };
        match &result.status {
            Some(Status::Complete) => {
                let shown = if result.output.is_empty() {
                    result.source.as_deref().unwrap_or_default()
                } else {
                    result.output.as_str()
                };
                out.push_str(&format!("[ok]  {}\n", indent(shown)));
            }
            Some(Status::Failed(message)) => {
                let source = result.source.as_deref().unwrap_or_default();
                out.push_str(&format!("[err] {}\n      {}\n", indent(source), indent(message)));
            }
            None => {
                let source = result.source.as_deref().unwrap_or_default();
                out.push_str(&format!("[..]  {}\n", indent(source)));
            }
        }
    }
    out
}

fn indent(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join("\n      ")
}
