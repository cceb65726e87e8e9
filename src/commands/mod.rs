//! Command modules for the livecell CLI
//!
//! - `serve` - Watch a file, evaluate incrementally, stream results over SSE
//! - `eval` - Evaluate a file once and print the settled results
//!
//! Handlers take their `Args` struct from `cli.rs` and return the text to
//! print on stdout.

pub mod eval;
pub mod serve;

pub use eval::{evaluate_source, format_text, run_eval};
pub use serve::run_serve;

use tracing_subscriber::EnvFilter;

use crate::error::{LiveCellError, Result};

/// Initialise logging to stderr. `directive` replaces the default
/// `livecell=info`; `RUST_LOG` still applies on top.
pub fn init_tracing(directive: Option<&str>) -> Result<()> {
    let directive = directive
        .unwrap_or("livecell=info")
        .parse()
        .map_err(|e| LiveCellError::Config {
            message: format!("invalid log filter: {}", e),
        })?;
    // Already initialised (e.g. by a test harness) is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| LiveCellError::Config {
        message: format!("Failed to create tokio runtime: {}", e),
    })
}
