//! Merged result state and fan-out to observers
//!
//! The aggregator is a single task that owns the authoritative [`ResultSet`].
//! Every published update is merged into it and forwarded, in arrival order,
//! to each attached observer. A new observer first receives the whole
//! current state, so nothing published before it attached is lost.
//!
//! Observer queues are bounded. An observer that falls a full queue behind
//! is dropped; its stream ends and it can reattach for a fresh snapshot.

use tokio::sync::{mpsc, oneshot};

use crate::error::{LiveCellError, Result};
use crate::schema::ResultSet;

/// Configuration for observer fan-out
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Updates buffered per observer before it is disconnected (default: 1024)
    pub queue_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

enum Command {
    Publish(ResultSet),
    Subscribe(oneshot::Sender<mpsc::Receiver<ResultSet>>),
    Snapshot(oneshot::Sender<ResultSet>),
}

/// Cloneable handle used by the driver, workers and transports
#[derive(Debug, Clone)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl AggregatorHandle {
    /// Queue an update for merging and broadcast
    pub fn publish(&self, update: ResultSet) -> Result<()> {
        self.tx
            .send(Command::Publish(update))
            .map_err(|_| LiveCellError::AggregatorClosed)
    }

    /// Attach a new observer.
    ///
    /// The first message on the returned stream is the full current state;
    /// every later message is one incremental update.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<ResultSet>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe(reply_tx))
            .map_err(|_| LiveCellError::AggregatorClosed)?;
        reply_rx.await.map_err(|_| LiveCellError::AggregatorClosed)
    }

    /// Current merged state. Every update published through this handle
    /// before the call is included.
    pub async fn snapshot(&self) -> Result<ResultSet> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply_tx))
            .map_err(|_| LiveCellError::AggregatorClosed)?;
        reply_rx.await.map_err(|_| LiveCellError::AggregatorClosed)
    }

    /// Handle whose aggregator has already stopped
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// The merge-and-broadcast loop
pub struct Aggregator {
    state: ResultSet,
    observers: Vec<mpsc::Sender<ResultSet>>,
    inbox: mpsc::UnboundedReceiver<Command>,
    config: ObserverConfig,
}

impl Aggregator {
    /// Start the aggregator task. It runs until every handle is dropped.
    pub fn spawn(config: ObserverConfig) -> AggregatorHandle {
        let (tx, inbox) = mpsc::unbounded_channel();
        let aggregator = Aggregator {
            state: ResultSet::default(),
            observers: Vec::new(),
            inbox,
            config,
        };
        tokio::spawn(aggregator.run());
        AggregatorHandle { tx }
    }

    async fn run(mut self) {
        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Publish(update) => self.publish(update),
                Command::Subscribe(reply) => {
                    let observer = self.attach();
                    // A dropped reply means the caller gave up; the observer
                    // is pruned on the next broadcast.
                    let _ = reply.send(observer);
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.state.clone());
                }
            }
        }
        tracing::debug!("aggregator stopped");
    }

    fn publish(&mut self, update: ResultSet) {
        self.observers.retain(|observer| match observer.try_send(update.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("disconnecting observer whose update queue is full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("observer detached");
                false
            }
        });
        self.state.merge(update);
    }

    fn attach(&mut self) -> mpsc::Receiver<ResultSet> {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        // Fresh channel with capacity >= 1, so the snapshot always fits.
        let _ = tx.try_send(self.state.clone());
        self.observers.push(tx);
        tracing::info!(observers = self.observers.len(), "observer attached");
        rx
    }
}
