//! Single-writer ingestion queue.
//!
//! Receiving tasks hold cheap [`IngestQueue`] handles and submit payloads
//! concurrently. One worker owns the [`EventProcessor`] and applies jobs in
//! arrival order, so store mutations never interleave.

use crate::error::ProcessError;
use crate::processor::{BatchReport, EventProcessor};
use event_store::Event;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

enum Job {
    One {
        payload: String,
        relay: Option<String>,
        reply: oneshot::Sender<Result<Vec<Event>, ProcessError>>,
    },
    Batch {
        payloads: Vec<String>,
        relay: Option<String>,
        reply: oneshot::Sender<BatchReport>,
    },
    Purge {
        reply: oneshot::Sender<Result<usize, ProcessError>>,
    },
}

#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<Job>,
}

impl IngestQueue {
    /// Start the writer. It stops once every handle is dropped.
    pub fn spawn(processor: EventProcessor, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let handle = tokio::task::spawn_blocking(move || writer_loop(processor, rx));
        (Self { tx }, handle)
    }

    /// Process one payload on the writer and wait for the outcome.
    pub async fn submit(&self, payload: impl Into<String>, relay: Option<&str>) -> Result<Vec<Event>, ProcessError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::One {
                payload: payload.into(),
                relay: relay.map(String::from),
                reply,
            })
            .await
            .map_err(|_| ProcessError::QueueClosed)?;
        rx.await.map_err(|_| ProcessError::QueueClosed)?
    }

    /// Process many payloads as one job; other submitters wait until it is done.
    pub async fn submit_batch(&self, payloads: Vec<String>, relay: Option<&str>) -> Result<BatchReport, ProcessError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Batch {
                payloads,
                relay: relay.map(String::from),
                reply,
            })
            .await
            .map_err(|_| ProcessError::QueueClosed)?;
        rx.await.map_err(|_| ProcessError::QueueClosed)
    }

    /// Drop events whose expiration has passed.
    pub async fn purge_expired(&self) -> Result<usize, ProcessError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Purge { reply })
            .await
            .map_err(|_| ProcessError::QueueClosed)?;
        rx.await.map_err(|_| ProcessError::QueueClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn writer_loop(processor: EventProcessor, mut rx: mpsc::Receiver<Job>) {
    info!("ingest writer started");
    let mut jobs = 0u64;
    while let Some(job) = rx.blocking_recv() {
        jobs += 1;
        match job {
            Job::One { payload, relay, reply } => {
                let outcome = processor.process(&payload, relay.as_deref());
                if let Err(e) = &outcome {
                    if e.is_local_failure() {
                        error!("event not stored: {}", e);
                    } else {
                        debug!(reason = e.label(), "event dropped: {}", e);
                    }
                }
                // The submitter may have given up waiting.
                let _ = reply.send(outcome);
            }
            Job::Batch { payloads, relay, reply } => {
                let report = processor.process_batch(&payloads, relay.as_deref());
                let _ = reply.send(report);
            }
            Job::Purge { reply } => {
                let outcome = processor.purge_expired();
                if let Err(e) = &outcome {
                    error!("expired events not purged: {}", e);
                }
                let _ = reply.send(outcome);
            }
        }
    }
    info!(jobs, "ingest writer stopped");
}
