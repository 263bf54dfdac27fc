//! Append-only audit log of document store operations.
//!
//! Records are sent over a channel to a single background task that owns the
//! log file, so concurrent appends never interleave inside a line. Callers wait
//! for the writer's acknowledgement, which means a record is on disk by the time
//! the operation that produced it returns.
//!
//! Line format: `<SUCCESS|ERROR> - <message> <unix millis>`

use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "SUCCESS"),
            Outcome::Error => write!(f, "ERROR"),
        }
    }
}

/// A record waiting for the writer task.
struct PendingRecord {
    outcome: Outcome,
    message: String,
    ack: oneshot::Sender<()>,
}

#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::UnboundedSender<PendingRecord>,
}

impl AuditLog {
    /// Create the log handle and spawn its writer task. Must be called inside a tokio runtime.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::drain_loop(path, rx));
        Self { tx }
    }

    /// Append one record. Never fails: write errors are reported through `log`.
    pub async fn append(&self, outcome: Outcome, message: impl Into<String>) {
        let (ack, done) = oneshot::channel();
        let record = PendingRecord {
            outcome,
            message: message.into(),
            ack,
        };
        if self.tx.send(record).is_err() {
            log::error!("[JSON_DB] Audit writer has stopped, record dropped");
            return;
        }
        let _ = done.await;
    }

    pub async fn success(&self, message: impl Into<String>) {
        self.append(Outcome::Success, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.append(Outcome::Error, message).await;
    }

    /// Drains the channel, writing whatever has accumulated in one append.
    async fn drain_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<PendingRecord>) {
        let mut batch: Vec<PendingRecord> = Vec::with_capacity(16);
        let mut last_timestamp: i64 = 0;

        while let Some(record) = rx.recv().await {
            batch.push(record);
            while let Ok(record) = rx.try_recv() {
                batch.push(record);
            }

            let mut buf = String::new();
            for record in &batch {
                // Wall clock may step backwards; the log must not.
                let timestamp = Utc::now().timestamp_millis().max(last_timestamp);
                last_timestamp = timestamp;
                buf.push_str(&format_line(record.outcome, &record.message, timestamp));
            }

            if let Err(e) = append_to_file(&path, &buf).await {
                log::error!(
                    "[JSON_DB] Failed to write {} audit record(s) to {}: {}",
                    batch.len(),
                    path.display(),
                    e
                );
            }

            for record in batch.drain(..) {
                let _ = record.ack.send(());
            }
        }

        log::info!("[JSON_DB] Audit writer shutting down");
    }
}

/// Render one log line. Line breaks inside the message are flattened so a
/// record always occupies exactly one line.
pub fn format_line(outcome: Outcome, message: &str, timestamp: i64) -> String {
    let flat: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!("{} - {} {}\n", outcome, flat, timestamp)
}

async fn append_to_file(path: &Path, buf: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(buf.as_bytes()).await?;
    file.flush().await
}
