//! Sequential control loop: reparse, reuse or spawn workers, publish order
//!
//! The driver owns the [`Cache`], the [`Bindings`] and the [`Registry`] for
//! the life of the process. Each new source snapshot is handled completely
//! before the next one is read.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::aggregator::AggregatorHandle;
use crate::engine::cache::{Bindings, Cache, ParentSet};
use crate::engine::worker::{EnvEndpoint, Worker, WorkerHandle};
use crate::error::{LiveCellError, Result};
use crate::lang::{Declaration, Evaluator, Parsed, Parser};
use crate::schema::{DeclResult, Key, ResultSet};

/// Append-only map from key to its worker
pub struct Registry<Env> {
    workers: HashMap<Key, WorkerHandle<Env>>,
}

impl<Env> Default for Registry<Env> {
    fn default() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }
}

impl<Env> Registry<Env> {
    pub fn insert(&mut self, key: Key, handle: WorkerHandle<Env>) {
        self.workers.insert(key, handle);
    }

    pub fn endpoint(&self, key: Key) -> Option<&EnvEndpoint<Env>> {
        self.workers.get(&key).map(|handle| &handle.endpoint)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn abort_all(&self) {
        for handle in self.workers.values() {
            handle.abort();
        }
    }
}

/// What one reparse did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReparseStats {
    /// Published ordering, one key per item in source order
    pub order: Vec<Key>,
    /// Declarations reused from the cache
    pub reused: usize,
    /// Declarations that got a new key and worker
    pub spawned: usize,
    pub parse_errors: usize,
}

pub struct Driver<P: Parser, E: Evaluator<P::Decl>> {
    parser: P,
    evaluator: Arc<E>,
    aggregator: AggregatorHandle,
    cache: Cache,
    bindings: Bindings,
    registry: Registry<E::Env>,
}

impl<P, E> Driver<P, E>
where
    P: Parser,
    E: Evaluator<P::Decl>,
{
    pub fn new(parser: P, evaluator: E, aggregator: AggregatorHandle) -> Self {
        Self {
            parser,
            evaluator: Arc::new(evaluator),
            aggregator,
            cache: Cache::new(),
            bindings: Bindings::new(),
            registry: Registry::default(),
        }
    }

    /// Handle source snapshots until the sender side closes
    pub async fn run(mut self, mut sources: mpsc::Receiver<String>) -> Result<()> {
        while let Some(text) = sources.recv().await {
            self.reparse(&text)?;
        }
        tracing::info!("source stream closed; driver stopping");
        Ok(())
    }

    /// Process one full snapshot of the file.
    ///
    /// Must be called inside a tokio runtime: cache misses spawn workers.
    pub fn reparse(&mut self, text: &str) -> Result<ReparseStats> {
        self.bindings.clear();
        let mut stats = ReparseStats::default();

        for item in self.parser.parse(text) {
            let key = match item {
                Parsed::Error { source, message } => {
                    let key = self.cache.fresh_key();
                    self.aggregator
                        .publish(ResultSet::result(key, DeclResult::parse_error(source, message)))?;
                    stats.parse_errors += 1;
                    key
                }
                Parsed::Decl(decl) => {
                    let parents = self.bindings.resolve(decl.free_vars());
                    let bound = decl.bound_vars();
                    let key = match self.cache.lookup(decl.source(), &parents) {
                        Some(key) => {
                            stats.reused += 1;
                            key
                        }
                        None => {
                            stats.spawned += 1;
                            self.spawn_worker(decl, parents)?
                        }
                    };
                    for name in bound {
                        self.bindings.bind(name, key);
                    }
                    key
                }
            };
            stats.order.push(key);
        }

        self.aggregator.publish(ResultSet::order(stats.order.clone()))?;
        tracing::info!(
            items = stats.order.len(),
            reused = stats.reused,
            spawned = stats.spawned,
            parse_errors = stats.parse_errors,
            "reparsed source"
        );
        Ok(stats)
    }

    fn spawn_worker(&mut self, decl: P::Decl, parents: ParentSet) -> Result<Key> {
        let endpoints = parents
            .iter()
            .map(|parent| {
                self.registry
                    .endpoint(*parent)
                    .cloned()
                    .ok_or(LiveCellError::UnknownParent { key: *parent })
            })
            .collect::<Result<Vec<_>>>()?;

        let key = self.cache.fresh_key();
        let source = decl.source().to_string();
        self.aggregator
            .publish(ResultSet::result(key, DeclResult::source(source.clone())))?;
        tracing::debug!(%key, parents = endpoints.len(), "spawning worker");

        let handle = Worker::spawn(
            key,
            decl,
            endpoints,
            Arc::clone(&self.evaluator),
            self.aggregator.clone(),
        );
        self.registry.insert(key, handle);
        // Memoized only once a worker exists to serve the key.
        Ok(self.cache.insert(&source, parents, key))
    }

    /// Workers spawned over the driver's lifetime
    pub fn worker_count(&self) -> usize {
        self.registry.len()
    }

    /// Environment endpoint of a spawned worker
    pub fn endpoint(&self, key: Key) -> Option<&EnvEndpoint<E::Env>> {
        self.registry.endpoint(key)
    }

    /// Stop every worker task
    pub fn shutdown(self) {
        tracing::debug!(workers = self.registry.len(), "shutting down workers");
        self.registry.abort_all();
    }
}
