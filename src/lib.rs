//! livecell: incremental evaluation of a live source file
//!
//! Every time the watched file changes, the whole file is reparsed, but a
//! declaration is only evaluated again if its own text or one of the
//! declarations it reads from changed. Results are merged by a single
//! aggregator and streamed to any number of observers.
//!
//! # Example
//!
//! ```ignore
//! use livecell::engine::{Aggregator, Driver, ObserverConfig};
//! use livecell::lang::calc::{CalcEvaluator, CalcParser};
//!
//! let aggregator = Aggregator::spawn(ObserverConfig::default());
//! let mut driver = Driver::new(CalcParser::new(), CalcEvaluator::new(), aggregator.clone());
//!
//! driver.reparse("x = 1\ny = x + 1")?;          // keys 0, 1
//! driver.reparse("x = 1\nz = 2\ny = x + 1")?;   // keys 0, 2, 1; only z is evaluated
//!
//! let mut observer = aggregator.subscribe().await?;
//! let snapshot = observer.recv().await;
//! ```

pub mod cli;
pub mod commands;
pub mod engine;
pub mod error;
pub mod lang;
pub mod schema;
pub mod server;

pub use cli::{Cli, Commands, OutputFormat};
pub use engine::{Aggregator, AggregatorHandle, Driver, ObserverConfig};
pub use error::{LiveCellError, Result};
pub use schema::{DeclResult, Key, KeyOrder, ResultSet, Status};
