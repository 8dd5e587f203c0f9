//! Fire-and-forget capture of human approval decisions.
//!
//! Every committed pending-to-terminal transition emits a
//! [`DecisionExemplar`] that is appended to a JSONL file by a background
//! writer task. Capture must never block or fail the transition that
//! produced it: the channel is unbounded and writer errors are logged and
//! swallowed.

mod types;

pub use types::DecisionExemplar;

use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::error;

/// Handle for queueing decision exemplars.
///
/// Cloning is cheap; all clones feed the same writer task.
#[derive(Clone)]
pub struct ExemplarSink {
    sender: mpsc::UnboundedSender<DecisionExemplar>,
}

impl ExemplarSink {
    /// Opens (or creates) the JSONL file at `path` and starts the writer
    /// task. Opening is synchronous so a misconfigured path fails here,
    /// before any decision is lost to a dead writer.
    pub fn new(path: PathBuf) -> Result<Self, std::io::Error> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(receiver, File::from_std(file), path));
        Ok(Self { sender })
    }

    /// Queues an exemplar for appending. Never blocks.
    pub fn capture(&self, exemplar: DecisionExemplar) {
        if let Err(e) = self.sender.send(exemplar) {
            error!("Failed to queue decision exemplar: {}", e);
        }
    }
}

async fn writer_task(
    mut receiver: mpsc::UnboundedReceiver<DecisionExemplar>,
    mut file: File,
    path: PathBuf,
) {
    while let Some(exemplar) = receiver.recv().await {
        match serde_json::to_string(&exemplar) {
            Ok(line) => {
                if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
                    error!("Failed to append exemplar to {}: {}", path.display(), e);
                    continue;
                }
                if let Err(e) = file.flush().await {
                    error!("Failed to flush exemplar log {}: {}", path.display(), e);
                }
            }
            Err(e) => {
                error!("Failed to serialize decision exemplar: {}", e);
            }
        }
    }
}
