//! Shared helpers for livecell integration tests
//!
//! - `CountingEvaluator` wraps the calc evaluator and records how often each
//!   declaration was evaluated
//! - `SourceFile` owns a temp directory with one source file in it
//! - `settled` polls the aggregator until every ordered key has a status

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use livecell::engine::AggregatorHandle;
use livecell::lang::calc::{CalcDecl, CalcEnv, CalcEvaluator};
use livecell::lang::{Declaration, EvalError, Evaluated, Evaluator};
use livecell::ResultSet;

/// Calc evaluator that counts evaluations per declaration source
#[derive(Clone, Default)]
pub struct CountingEvaluator {
    inner: CalcEvaluator,
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl CountingEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, source: &str) -> usize {
        self.counts.lock().get(source).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }
}

impl Evaluator<CalcDecl> for CountingEvaluator {
    type Env = CalcEnv;

    fn base_env(&self) -> CalcEnv {
        Evaluator::<CalcDecl>::base_env(&self.inner)
    }

    fn merge(&self, acc: CalcEnv, other: &CalcEnv) -> CalcEnv {
        Evaluator::<CalcDecl>::merge(&self.inner, acc, other)
    }

    fn fallback_env(&self) -> CalcEnv {
        Evaluator::<CalcDecl>::fallback_env(&self.inner)
    }

    fn evaluate(&self, decl: &CalcDecl, env: CalcEnv) -> Result<Evaluated<CalcEnv>, EvalError> {
        *self
            .counts
            .lock()
            .entry(decl.source().to_string())
            .or_insert(0) += 1;
        self.inner.evaluate(decl, env)
    }
}

/// A source file in its own temp directory
pub struct SourceFile {
    dir: TempDir,
    path: PathBuf,
}

impl SourceFile {
    pub fn new(contents: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("main.calc");
        fs::write(&path, contents).expect("Failed to write source file");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, contents: &str) {
        fs::write(&self.path, contents).expect("Failed to write source file");
    }
}

/// Poll the aggregator until its state is settled, or panic after `limit`
pub async fn settled_within(aggregator: &AggregatorHandle, limit: Duration) -> ResultSet {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let state = aggregator.snapshot().await.expect("aggregator stopped");
        if state.is_settled() {
            return state;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("result set did not settle: {:?}", state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn settled(aggregator: &AggregatorHandle) -> ResultSet {
    settled_within(aggregator, Duration::from_secs(5)).await
}
