use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{Result, StoreError};
use crate::json::ResultsBackend;
use crate::record::{ProjectResults, ResultUpdate};

const QUEUE_DEPTH: usize = 64;

enum Command {
    Apply(ResultUpdate, oneshot::Sender<Result<()>>),
    Snapshot(oneshot::Sender<ProjectResults>),
}

/// Handle to the single task that owns a project's results.
///
/// Every update is applied and persisted in arrival order, so concurrent workers
/// never interleave partial writes. Each submission waits for its own
/// persistence outcome.
#[derive(Clone)]
pub struct ResultWriter {
    tx: mpsc::Sender<Command>,
}

impl ResultWriter {
    pub async fn submit(&self, update: ResultUpdate) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Apply(update, ack))
            .await
            .map_err(|_| StoreError::Closed)?;
        done.await.map_err(|_| StoreError::Closed)?
    }

    pub async fn snapshot(&self) -> Result<ProjectResults> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .await
            .map_err(|_| StoreError::Closed)?;
        done.await.map_err(|_| StoreError::Closed)
    }
}

/// Starts the writer task. Persistence runs on the blocking pool one write at a
/// time; the join handle yields the final results once every [`ResultWriter`]
/// clone has been dropped.
pub fn spawn_writer<B: ResultsBackend>(
    backend: B,
    initial: ProjectResults,
) -> (ResultWriter, JoinHandle<ProjectResults>) {
    let (tx, mut rx) = mpsc::channel::<Command>(QUEUE_DEPTH);
    let backend = Arc::new(Mutex::new(backend));
    let handle = tokio::spawn(async move {
        let mut results = initial;
        while let Some(command) = rx.recv().await {
            match command {
                Command::Apply(update, ack) => {
                    results.apply(update);
                    let snapshot = results.clone();
                    let backend = Arc::clone(&backend);
                    let outcome =
                        tokio::task::spawn_blocking(move || backend.lock().persist(&snapshot))
                            .await
                            .unwrap_or_else(|err| Err(StoreError::Unavailable(err.to_string())));
                    match &outcome {
                        Ok(()) => debug!(cells = results.cells.len(), "results persisted"),
                        Err(err) => error!(error = %err, "failed to persist results"),
                    }
                    let _ = ack.send(outcome);
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(results.clone());
                }
            }
        }
        results
    });
    (ResultWriter { tx }, handle)
}
