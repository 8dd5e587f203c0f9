//! Debounced batching of approval requests.
//!
//! Rapid-fire approvals from one reviewer are coalesced under the key
//! `supervisor_approvals_<reviewer>` and handed to a [`BatchProcessor`] in
//! one call, either when the batch sits quiet for [`BATCH_WINDOW`] or the
//! moment it reaches [`MAX_BATCH_SIZE`]. Every add resets the window, so a
//! steady trickle keeps extending the same batch.
//!
//! Batches live only in memory. A flush removes the batch before invoking
//! the processor, and a processor failure does not restore it: those
//! requests are dropped with an error log, and the pending states they
//! pointed at remain actionable through other paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Quiet period after the most recent add before a batch flushes.
pub const BATCH_WINDOW: Duration = Duration::from_secs(5);

/// A batch at this size flushes immediately instead of waiting out the
/// window.
pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchedRequest {
    pub workflow_id: String,
    pub reviewer: String,
    pub timestamp: DateTime<Utc>,
}

/// Consumes one flushed batch. Called outside the batcher lock.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, requests: Vec<BatchedRequest>) -> anyhow::Result<()>;
}

struct PendingBatch {
    requests: Vec<BatchedRequest>,
    processor: Arc<dyn BatchProcessor>,
    timer: JoinHandle<()>,
    /// Identifies the currently armed timer. A timer that fires after its
    /// batch was flushed (or re-armed) sees a stale generation and stands
    /// down instead of flushing a successor batch early.
    generation: u64,
}

pub struct RequestBatcher {
    batches: Mutex<HashMap<String, PendingBatch>>,
    next_generation: AtomicU64,
}

impl RequestBatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    fn batch_key(reviewer: &str) -> String {
        format!("supervisor_approvals_{reviewer}")
    }

    /// Adds one approval request to the reviewer's batch, creating the
    /// batch if none is open. The processor supplied at batch creation
    /// handles the whole batch; processors passed on later adds to the
    /// same batch are ignored.
    pub async fn add_request(
        self: &Arc<Self>,
        workflow_id: &str,
        reviewer: &str,
        processor: Arc<dyn BatchProcessor>,
    ) {
        let key = Self::batch_key(reviewer);
        let request = BatchedRequest {
            workflow_id: workflow_id.to_string(),
            reviewer: reviewer.to_string(),
            timestamp: Utc::now(),
        };

        let full_batch = {
            let mut batches = self.batches.lock().await;
            match batches.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    {
                        let batch = occupied.get_mut();
                        batch.requests.push(request);
                        batch.timer.abort();
                    }
                    if occupied.get().requests.len() >= MAX_BATCH_SIZE {
                        Some(occupied.remove())
                    } else {
                        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                        let timer = self.spawn_window_timer(key.clone(), generation);
                        let batch = occupied.get_mut();
                        batch.generation = generation;
                        batch.timer = timer;
                        None
                    }
                }
                Entry::Vacant(vacant) => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let timer = self.spawn_window_timer(key.clone(), generation);
                    vacant.insert(PendingBatch {
                        requests: vec![request],
                        processor,
                        timer,
                        generation,
                    });
                    None
                }
            }
        };

        if let Some(batch) = full_batch {
            dispatch(&key, batch.requests, batch.processor).await;
        }
    }

    /// Requests sitting in unflushed batches, across all reviewers.
    pub async fn pending_count(&self) -> usize {
        let batches = self.batches.lock().await;
        batches.values().map(|batch| batch.requests.len()).sum()
    }

    fn spawn_window_timer(self: &Arc<Self>, key: String, generation: u64) -> JoinHandle<()> {
        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(BATCH_WINDOW).await;
            batcher.flush_expired(&key, generation).await;
        })
    }

    async fn flush_expired(&self, key: &str, generation: u64) {
        let batch = {
            let mut batches = self.batches.lock().await;
            let still_armed = batches
                .get(key)
                .is_some_and(|batch| batch.generation == generation);
            if still_armed { batches.remove(key) } else { None }
        };

        if let Some(batch) = batch {
            dispatch(key, batch.requests, batch.processor).await;
        }
    }
}

async fn dispatch(key: &str, requests: Vec<BatchedRequest>, processor: Arc<dyn BatchProcessor>) {
    let count = requests.len();
    info!("Flushing {} batched approval request(s) for {}", count, key);
    if let Err(e) = processor.process(requests).await {
        // The batch left the map before processing; these requests are
        // gone. The pending states behind them are untouched and stay
        // actionable.
        error!(
            "Batch processor failed for {}; {} request(s) dropped: {}",
            key, count, e
        );
    }
}
