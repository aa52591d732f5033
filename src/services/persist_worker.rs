//! Persistence worker - applies store writes off the session owner's loop
//!
//! The controller enqueues commands with `try_send` through a
//! [`PersistQueue`]; the worker performs the (blocking) store calls. A full
//! queue is reported back to the caller, which keeps its dirty flag and
//! retries on the next tick. Writes the store rejects are published as
//! [`PersistFailure`]s so the session owner can keep and retry them.

use crate::domain::session::SleepSession;
use crate::domain::types::SessionId;
use crate::infra::metrics::Metrics;
use crate::io::store::SessionStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// A store operation to be applied by the worker
#[derive(Debug)]
pub enum PersistCmd {
    Save(Box<SleepSession>),
    Delete(SessionId),
    /// Reply once every command queued before it has been applied
    Flush(oneshot::Sender<()>),
}

/// A write the store did not apply
#[derive(Debug, Clone)]
pub enum PersistFailure {
    /// The record that was not written
    Save(Box<SleepSession>),
    Delete(SessionId),
}

/// Failure reports kept for a subscriber that falls behind
const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Worker that applies store commands in order
pub struct PersistWorker {
    store: Arc<dyn SessionStore>,
    cmd_rx: mpsc::Receiver<(PersistCmd, Instant)>,
    failure_tx: broadcast::Sender<PersistFailure>,
    metrics: Arc<Metrics>,
}

impl PersistWorker {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cmd_rx: mpsc::Receiver<(PersistCmd, Instant)>,
        failure_tx: broadcast::Sender<PersistFailure>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { store, cmd_rx, failure_tx, metrics }
    }

    fn report(&self, failure: PersistFailure) {
        // No subscriber means nobody retries; the failure is already logged
        let _ = self.failure_tx.send(failure);
    }

    /// Run until every queue handle is dropped
    pub async fn run(mut self) {
        info!("persist_worker_started");

        while let Some((cmd, enqueued_at)) = self.cmd_rx.recv().await {
            let queue_delay_us = enqueued_at.elapsed().as_micros() as u64;
            match cmd {
                PersistCmd::Save(session) => {
                    let store = self.store.clone();
                    let id = session.id;
                    let active = session.is_active;
                    let result = tokio::task::spawn_blocking(move || {
                        let outcome = store.save(&session);
                        (session, outcome)
                    })
                    .await;
                    match result {
                        Ok((_, Ok(()))) => {
                            debug!(
                                session_id = %id,
                                active = %active,
                                queue_delay_us = %queue_delay_us,
                                "session_persisted"
                            );
                        }
                        Ok((session, Err(e))) => {
                            self.metrics.record_store_failure();
                            warn!(session_id = %id, error = %e, "session_persist_failed");
                            self.report(PersistFailure::Save(session));
                        }
                        Err(e) => {
                            self.metrics.record_store_failure();
                            warn!(session_id = %id, error = %e, "session_persist_task_failed");
                        }
                    }
                }
                PersistCmd::Delete(id) => {
                    let store = self.store.clone();
                    match tokio::task::spawn_blocking(move || store.delete(id)).await {
                        Ok(Ok(())) => debug!(session_id = %id, "session_deleted"),
                        Ok(Err(e)) => {
                            self.metrics.record_store_failure();
                            warn!(session_id = %id, error = %e, "session_delete_failed");
                            self.report(PersistFailure::Delete(id));
                        }
                        Err(e) => {
                            self.metrics.record_store_failure();
                            warn!(session_id = %id, error = %e, "session_delete_task_failed");
                            self.report(PersistFailure::Delete(id));
                        }
                    }
                }
                PersistCmd::Flush(reply) => {
                    let _ = reply.send(());
                }
            }

            if queue_delay_us > 100_000 {
                warn!(queue_delay_us = %queue_delay_us, "persist_queue_delay_high");
            }
        }

        info!("persist_worker_stopped");
    }
}

/// Sending side of the persistence queue
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<(PersistCmd, Instant)>,
    failure_tx: broadcast::Sender<PersistFailure>,
    metrics: Arc<Metrics>,
}

impl PersistQueue {
    /// Queue a snapshot of `session`. Returns false if the queue is full or
    /// the worker is gone; the caller should retry later.
    pub fn save(&self, session: &SleepSession) -> bool {
        self.enqueue(PersistCmd::Save(Box::new(session.clone())))
    }

    /// Queue removal of a session record
    pub fn delete(&self, id: SessionId) -> bool {
        self.enqueue(PersistCmd::Delete(id))
    }

    /// Receive every write the worker fails from now on
    pub fn failures(&self) -> broadcast::Receiver<PersistFailure> {
        self.failure_tx.subscribe()
    }

    /// Wait until everything queued so far has been applied
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((PersistCmd::Flush(reply_tx), Instant::now())).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    fn enqueue(&self, cmd: PersistCmd) -> bool {
        match self.tx.try_send((cmd, Instant::now())) {
            Ok(()) => {
                self.metrics.record_snapshot_queued();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record_snapshot_dropped();
                warn!("persist_queue_full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_snapshot_dropped();
                warn!("persist_worker_gone");
                false
            }
        }
    }
}

/// Create a persistence queue and worker
///
/// Returns the queue (for the controller) and the worker (to be spawned)
pub fn create_persist_worker(
    store: Arc<dyn SessionStore>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (PersistQueue, PersistWorker) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let (failure_tx, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
    let worker = PersistWorker::new(store, rx, failure_tx.clone(), metrics.clone());
    (PersistQueue { tx, failure_tx, metrics }, worker)
}
