//! Incremental evaluation engine
//!
//! # Architecture
//!
//! ```text
//! source text ──> Driver ──> Cache lookup ──hit──> reuse key
//!                   │             └──miss─> spawn Worker
//!                   │                          │ evaluate once
//!                   └── order ──> Aggregator <─┘ results
//!                                    │
//!                                    └──> observers
//! ```
//!
//! A declaration instance is identified by its source text plus the keys of
//! the declarations it reads from. The [`Driver`] reparses the whole file on
//! every change but only spawns [`Worker`]s for instances it has never seen.
//! Each worker evaluates exactly once and then serves its environment to
//! dependents forever.

pub mod aggregator;
pub mod cache;
pub mod driver;
pub mod worker;

pub use aggregator::{Aggregator, AggregatorHandle, ObserverConfig};
pub use cache::{Bindings, Cache, ParentSet};
pub use driver::{Driver, Registry, ReparseStats};
pub use worker::{EnvEndpoint, Worker, WorkerHandle};
