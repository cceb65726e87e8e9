//! One worker per key: evaluate once, then serve the environment forever
//!
//! # Lifecycle
//!
//! ```text
//! AwaitingDependencies ──> Evaluating ──> Serving
//!   request parent envs     evaluator on     answer every env request
//!   (replies tagged by      blocking pool    with the same environment
//!    parent position)
//! ```
//!
//! Each worker has two typed channels: environment requests come in on an
//! mpsc queue, and each request carries a oneshot for its reply. Requests
//! that arrive before the environment is final are buffered and answered as
//! soon as the worker starts serving.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::aggregator::AggregatorHandle;
use crate::lang::{Declaration, Evaluated, Evaluator};
use crate::schema::{DeclResult, Key, ResultSet, Status};

/// A pending environment request: the requester waits on the receiving half
pub type EnvRequest<Env> = oneshot::Sender<Env>;

/// Where dependents send environment requests for one key
pub struct EnvEndpoint<Env> {
    key: Key,
    tx: mpsc::UnboundedSender<EnvRequest<Env>>,
}

impl<Env> Clone for EnvEndpoint<Env> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            tx: self.tx.clone(),
        }
    }
}

impl<Env> EnvEndpoint<Env> {
    pub fn key(&self) -> Key {
        self.key
    }

    /// Ask for the worker's final environment. The reply arrives once the
    /// worker is serving.
    pub fn request(&self) -> oneshot::Receiver<Env> {
        let (reply_tx, reply_rx) = oneshot::channel();
        // If the worker is gone the reply sender is dropped with the message
        // and the receiver reports it.
        let _ = self.tx.send(reply_tx);
        reply_rx
    }
}

/// Registry entry for a spawned worker
pub struct WorkerHandle<Env> {
    pub endpoint: EnvEndpoint<Env>,
    task: JoinHandle<()>,
}

impl<Env> WorkerHandle<Env> {
    /// Stop the worker task. An evaluation already running on the blocking
    /// pool runs to completion but its result is discarded.
    pub fn abort(&self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    AwaitingDependencies,
    Evaluating,
    Serving,
}

pub struct Worker<D, E: Evaluator<D>> {
    key: Key,
    decl: Arc<D>,
    parents: Vec<EnvEndpoint<E::Env>>,
    evaluator: Arc<E>,
    aggregator: AggregatorHandle,
    requests: mpsc::UnboundedReceiver<EnvRequest<E::Env>>,
    waiting: Vec<EnvRequest<E::Env>>,
    state: WorkerState,
}

impl<D, E> Worker<D, E>
where
    D: Declaration,
    E: Evaluator<D>,
{
    /// Spawn the worker for `key`. `parents` must be in ascending key order;
    /// their environments are merged in that order.
    pub fn spawn(
        key: Key,
        decl: D,
        parents: Vec<EnvEndpoint<E::Env>>,
        evaluator: Arc<E>,
        aggregator: AggregatorHandle,
    ) -> WorkerHandle<E::Env> {
        let (tx, requests) = mpsc::unbounded_channel();
        let worker = Worker {
            key,
            decl: Arc::new(decl),
            parents,
            evaluator,
            aggregator,
            requests,
            waiting: Vec::new(),
            state: WorkerState::AwaitingDependencies,
        };
        let task = tokio::spawn(worker.run());
        WorkerHandle {
            endpoint: EnvEndpoint { key, tx },
            task,
        }
    }

    async fn run(mut self) {
        tracing::debug!(key = %self.key, parents = self.parents.len(), "worker started");

        let env = self.collect_parent_envs().await;

        self.transition(WorkerState::Evaluating);
        let (status, output, env) = self.evaluate(env).await;

        if let Status::Failed(message) = &status {
            tracing::warn!(key = %self.key, error = %message, "evaluation failed");
        }
        if self
            .aggregator
            .publish(ResultSet::result(self.key, DeclResult::finished(status, output)))
            .is_err()
        {
            tracing::debug!(key = %self.key, "aggregator closed before result was published");
        }

        self.transition(WorkerState::Serving);
        self.serve(env).await;
    }

    /// Request every parent's environment at once, then fold the replies in
    /// parent order onto the base environment
    async fn collect_parent_envs(&mut self) -> E::Env {
        let parents = std::mem::take(&mut self.parents);
        let replies: Vec<(Key, oneshot::Receiver<E::Env>)> = parents
            .iter()
            .map(|parent| (parent.key(), parent.request()))
            .collect();
        drop(parents);

        let mut env = self.evaluator.base_env();
        for (parent, reply) in replies {
            let parent_env = match self.buffering(reply).await {
                Ok(parent_env) => parent_env,
                Err(_) => {
                    tracing::warn!(
                        key = %self.key,
                        %parent,
                        "parent worker went away; using fallback environment"
                    );
                    self.evaluator.fallback_env()
                }
            };
            env = self.evaluator.merge(env, &parent_env);
        }
        env
    }

    /// Run the evaluator off the async runtime. Errors and panics both
    /// become `Failed` with the fallback environment.
    async fn evaluate(&mut self, env: E::Env) -> (Status, String, E::Env) {
        let evaluator = Arc::clone(&self.evaluator);
        let decl = Arc::clone(&self.decl);
        let task = tokio::task::spawn_blocking(move || evaluator.evaluate(&decl, env));

        match self.buffering(task).await {
            Ok(Ok(Evaluated { output, env })) => (Status::Complete, output, env),
            Ok(Err(err)) => (
                Status::Failed(err.message),
                String::new(),
                self.evaluator.fallback_env(),
            ),
            Err(join_error) => {
                let message = match join_error.try_into_panic() {
                    Ok(payload) => format!("evaluation panicked: {}", panic_message(payload)),
                    Err(_) => "evaluation was cancelled".to_string(),
                };
                (Status::Failed(message), String::new(), self.evaluator.fallback_env())
            }
        }
    }

    /// Await `fut` while buffering environment requests that arrive meanwhile
    async fn buffering<F: Future>(&mut self, fut: F) -> F::Output {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return output,
                Some(request) = self.requests.recv() => self.waiting.push(request),
            }
        }
    }

    async fn serve(mut self, env: E::Env) {
        for request in self.waiting.drain(..) {
            let _ = request.send(env.clone());
        }
        while let Some(request) = self.requests.recv().await {
            let _ = request.send(env.clone());
        }
        tracing::debug!(key = %self.key, "worker stopped: no endpoints left");
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!(key = %self.key, from = ?self.state, to = ?next, "worker transition");
        self.state = next;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregator::{Aggregator, ObserverConfig};
    use crate::lang::calc::{CalcDecl, CalcEnv, CalcEvaluator, CalcParser, Value};
    use crate::lang::{EvalError, Parsed, Parser};

    fn decl(text: &str) -> CalcDecl {
        match CalcParser::new().parse(text).pop() {
            Some(Parsed::Decl(decl)) => decl,
            other => panic!("expected a declaration, got {:?}", other),
        }
    }

    fn spawn_calc(
        key: u64,
        text: &str,
        parents: &[&WorkerHandle<CalcEnv>],
        aggregator: &AggregatorHandle,
    ) -> WorkerHandle<CalcEnv> {
        Worker::spawn(
            Key(key),
            decl(text),
            parents.iter().map(|parent| parent.endpoint.clone()).collect(),
            Arc::new(CalcEvaluator::new()),
            aggregator.clone(),
        )
    }

    #[tokio::test]
    async fn test_evaluates_once_and_serves_same_environment() {
        let aggregator = Aggregator::spawn(ObserverConfig::default());
        let worker = spawn_calc(0, "x = 40 + 2", &[], &aggregator);

        let first = worker.endpoint.request().await.unwrap();
        let second = worker.endpoint.request().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get("x"), Some(&Value::Int(42)));

        let state = aggregator.snapshot().await.unwrap();
        assert_eq!(
            state.results[&Key(0)],
            DeclResult::finished(Status::Complete, "x = 42")
        );
    }

    #[tokio::test]
    async fn test_requests_before_completion_are_answered() {
        let aggregator = Aggregator::spawn(ObserverConfig::default());
        let worker = spawn_calc(0, "slow = sleep(50)", &[], &aggregator);

        let early: Vec<_> = (0..3).map(|_| worker.endpoint.request()).collect();
        for reply in early {
            let env = reply.await.unwrap();
            assert_eq!(env.get("slow"), Some(&Value::Int(50)));
        }
    }

    #[tokio::test]
    async fn test_parent_environments_merge_in_key_order() {
        let aggregator = Aggregator::spawn(ObserverConfig::default());
        // Key 0 finishes last, key 1 first; key 1 must still win the merge.
        let slow = spawn_calc(0, "v = sleep(60) - 59", &[], &aggregator);
        let fast = spawn_calc(1, "v = 2", &[], &aggregator);
        let child = spawn_calc(2, "w = v", &[&slow, &fast], &aggregator);

        let env = child.endpoint.request().await.unwrap();
        assert_eq!(env.get("w"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_failure_serves_fallback_environment() {
        let aggregator = Aggregator::spawn(ObserverConfig::default());
        let broken = spawn_calc(0, "x = 1 / 0", &[], &aggregator);
        let sibling = spawn_calc(1, "y = 5", &[&broken], &aggregator);
        let dependent = spawn_calc(2, "z = x", &[&broken], &aggregator);

        assert!(broken.endpoint.request().await.unwrap().is_empty());
        assert_eq!(
            sibling.endpoint.request().await.unwrap().get("y"),
            Some(&Value::Int(5))
        );
        dependent.endpoint.request().await.unwrap();

        let state = aggregator.snapshot().await.unwrap();
        assert_eq!(
            state.results[&Key(0)].status,
            Some(Status::Failed("division by zero".to_string()))
        );
        assert_eq!(state.results[&Key(1)].status, Some(Status::Complete));
        assert_eq!(
            state.results[&Key(2)].status,
            Some(Status::Failed("unbound variable 'x'".to_string()))
        );
    }

    struct PanickingEvaluator;

    impl Evaluator<CalcDecl> for PanickingEvaluator {
        type Env = CalcEnv;

        fn base_env(&self) -> CalcEnv {
            CalcEnv::new()
        }

        fn merge(&self, acc: CalcEnv, _other: &CalcEnv) -> CalcEnv {
            acc
        }

        fn fallback_env(&self) -> CalcEnv {
            let mut env = CalcEnv::new();
            env.insert("fallback".to_string(), Value::Int(1));
            env
        }

        fn evaluate(&self, _decl: &CalcDecl, _env: CalcEnv) -> Result<Evaluated<CalcEnv>, EvalError> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let aggregator = Aggregator::spawn(ObserverConfig::default());
        let worker = Worker::spawn(
            Key(9),
            decl("a = 1"),
            Vec::new(),
            Arc::new(PanickingEvaluator),
            aggregator.clone(),
        );

        let env = worker.endpoint.request().await.unwrap();
        assert_eq!(env.get("fallback"), Some(&Value::Int(1)));

        let state = aggregator.snapshot().await.unwrap();
        assert_eq!(
            state.results[&Key(9)].status,
            Some(Status::Failed("evaluation panicked: boom".to_string()))
        );
    }

    #[tokio::test]
    async fn test_aborted_worker_drops_requests() {
        let aggregator = Aggregator::spawn(ObserverConfig::default());
        let worker = spawn_calc(0, "x = sleep(200)", &[], &aggregator);
        worker.abort();
        assert!(worker.endpoint.request().await.is_err());
    }

    /// Calc evaluation that counts every call
    #[derive(Default)]
    struct CountingCalc {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Evaluator<CalcDecl> for CountingCalc {
        type Env = CalcEnv;

        fn base_env(&self) -> CalcEnv {
            CalcEvaluator::new().base_env()
        }

        fn merge(&self, acc: CalcEnv, other: &CalcEnv) -> CalcEnv {
            CalcEvaluator::new().merge(acc, other)
        }

        fn fallback_env(&self) -> CalcEnv {
            CalcEvaluator::new().fallback_env()
        }

        fn evaluate(&self, decl: &CalcDecl, env: CalcEnv) -> Result<Evaluated<CalcEnv>, EvalError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            CalcEvaluator::new().evaluate(decl, env)
        }
    }

    #[tokio::test]
    async fn test_fan_out_children_see_one_parent_evaluation() {
        let aggregator = Aggregator::spawn(ObserverConfig::default());
        let evaluator = Arc::new(CountingCalc::default());
        let spawn = |key: u64, text: &str, parents: Vec<EnvEndpoint<CalcEnv>>| {
            Worker::spawn(
                Key(key),
                decl(text),
                parents,
                Arc::clone(&evaluator),
                aggregator.clone(),
            )
        };

        let parent = spawn(0, "p = sleep(80)", Vec::new());
        let mut children = Vec::new();
        // Children attach while the parent runs and after it has finished.
        children.push(spawn(1, "a = p + 1", vec![parent.endpoint.clone()]));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        children.push(spawn(2, "b = p + 2", vec![parent.endpoint.clone()]));
        let direct = parent.endpoint.request().await.unwrap();
        children.push(spawn(3, "c = p + 3", vec![parent.endpoint.clone()]));

        assert_eq!(direct.get("p"), Some(&Value::Int(80)));
        for (offset, child) in children.iter().enumerate() {
            let env = child.endpoint.request().await.unwrap();
            let value = env.values().next().cloned();
            assert_eq!(value, Some(Value::Int(81 + offset as i64)));
        }
        assert_eq!(parent.endpoint.request().await.unwrap(), direct);
        // One evaluation for the parent, one per child.
        assert_eq!(
            evaluator.calls.load(std::sync::atomic::Ordering::SeqCst),
            4
        );
    }
}
