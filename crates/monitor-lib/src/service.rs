//! Single-writer ingestion loop
//!
//! The loop owns the [`AnomalyMonitor`], so every batch is evaluated and
//! appended without interleaving, whatever the number of producers.
//! Producers talk to it through a cloneable [`IngestHandle`].

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::anomaly::AnomalyMonitor;
use crate::error::{InputError, ServiceError};
use crate::health::{components, HealthRegistry};
use crate::models::{Batch, IngestResult};

/// Default number of batches waiting for the loop
const DEFAULT_QUEUE_SIZE: usize = 64;

enum Payload {
    Batch(Batch),
    Json(Value),
}

struct IngestRequest {
    payload: Payload,
    respond_to: oneshot::Sender<Result<IngestResult, InputError>>,
}

/// Submits batches to a running [`IngestLoop`]
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestRequest>,
}

impl IngestHandle {
    /// Ingest a typed batch and wait for its result
    pub async fn ingest(&self, batch: Batch) -> Result<IngestResult, ServiceError> {
        self.submit(Payload::Batch(batch)).await
    }

    /// Ingest an untyped JSON batch and wait for its result
    pub async fn ingest_json(&self, value: Value) -> Result<IngestResult, ServiceError> {
        self.submit(Payload::Json(value)).await
    }

    async fn submit(&self, payload: Payload) -> Result<IngestResult, ServiceError> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(IngestRequest {
                payload,
                respond_to,
            })
            .await
            .map_err(|_| ServiceError::Stopped)?;

        let result = response.await.map_err(|_| ServiceError::Stopped)?;
        Ok(result?)
    }
}

/// Loop that feeds submitted batches to the monitor one at a time
pub struct IngestLoop {
    monitor: AnomalyMonitor,
    rx: mpsc::Receiver<IngestRequest>,
    health: Option<HealthRegistry>,
}

impl IngestLoop {
    /// Create a loop around `monitor` with the default queue size
    pub fn new(monitor: AnomalyMonitor) -> (Self, IngestHandle) {
        Self::with_queue_size(monitor, DEFAULT_QUEUE_SIZE)
    }

    pub fn with_queue_size(monitor: AnomalyMonitor, queue_size: usize) -> (Self, IngestHandle) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let ingest_loop = Self {
            monitor,
            rx,
            health: None,
        };
        (ingest_loop, IngestHandle { tx })
    }

    /// Mark the loop unhealthy in the registry once it stops
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Process batches until shutdown or until every handle is dropped
    ///
    /// On shutdown the queue is closed to new batches; batches already
    /// queued are still processed. The monitor is handed back so the
    /// caller decides when its alert sink is released.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> AnomalyMonitor {
        info!(
            metrics = ?self.monitor.tracked_metrics().collect::<Vec<_>>(),
            window_size = self.monitor.config().window_size,
            "Starting ingestion loop"
        );

        let mut processed = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutting down ingestion loop, closing batch queue");
                    self.rx.close();
                    while let Some(request) = self.rx.recv().await {
                        self.process(request);
                        processed += 1;
                    }
                    break;
                }
                request = self.rx.recv() => match request {
                    Some(request) => {
                        self.process(request);
                        processed += 1;
                    }
                    None => {
                        info!("All ingest handles dropped, stopping ingestion loop");
                        break;
                    }
                }
            }
        }

        if let Some(health) = &self.health {
            health
                .set_unhealthy(components::INGEST_LOOP, "Ingestion loop stopped")
                .await;
        }
        info!(batches = processed, "Ingestion loop stopped");

        self.monitor
    }

    fn process(&mut self, request: IngestRequest) {
        let result = match request.payload {
            Payload::Batch(batch) => Ok(self.monitor.ingest(&batch)),
            Payload::Json(value) => self.monitor.ingest_json(&value),
        };

        if let Err(e) = &result {
            debug!(error = %e, "Rejected malformed batch");
        }

        if request.respond_to.send(result).is_err() {
            debug!("Submitter went away before the result was ready");
        }
    }
}
