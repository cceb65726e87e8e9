//! CLI argument definitions using clap with subcommand architecture

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::ObserverConfig;
use crate::server::WatcherConfig;

/// Incremental evaluator for live source files
#[derive(Parser, Debug)]
#[command(name = "livecell")]
#[command(about = "Re-evaluates only what changed each time a source file is saved")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Log filter directive, e.g. `livecell=debug` (falls back to RUST_LOG)
    #[arg(long, global = true, env = "LIVECELL_LOG")]
    pub log: Option<String>,
}

/// Available subcommands for livecell
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch a file and stream results to observers over server-sent events
    Serve(ServeArgs),

    /// Evaluate a file once and print the settled results
    Eval(EvalArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Source file to watch
    pub file: PathBuf,

    /// Host to bind the event server to
    #[arg(long, default_value = "127.0.0.1", env = "LIVECELL_HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 7878, env = "LIVECELL_PORT")]
    pub port: u16,

    /// Debounce window for file change events, in milliseconds
    #[arg(long, default_value_t = 100, env = "LIVECELL_DEBOUNCE_MS")]
    pub debounce_ms: u64,

    /// Updates buffered per observer before it is disconnected
    #[arg(long, default_value_t = 1024, env = "LIVECELL_OBSERVER_QUEUE")]
    pub observer_queue: usize,
}

impl ServeArgs {
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            debounce_duration: Duration::from_millis(self.debounce_ms),
        }
    }

    pub fn observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            queue_capacity: self.observer_queue,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EvalArgs {
    /// Source file to evaluate
    pub file: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "text", value_enum)]
    pub format: OutputFormat,

    /// Give up if evaluation has not settled after this many milliseconds
    #[arg(long, default_value_t = 30_000, env = "LIVECELL_TIMEOUT_MS")]
    pub timeout_ms: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One `[ok]`/`[err]` line per declaration
    #[default]
    Text,
    /// The settled result set as JSON
    Json,
}
