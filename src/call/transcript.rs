// Conversation transcript and the optional collaborator that receives it.
//
// Entries are kept on the call and forwarded to a `TranscriptSink` from a
// dedicated task. Sink errors and panics are logged there and never reach
// the call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
    Tool,
}

/// One line of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub call_id: Uuid,
    pub role: TranscriptRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(call_id: Uuid, role: TranscriptRole, text: impl Into<String>) -> Self {
        Self {
            call_id,
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives transcript entries outside the call pipeline
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn record(&self, entry: &TranscriptEntry) -> Result<()>;
}

/// Logs each entry
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl TranscriptSink for TracingSink {
    async fn record(&self, entry: &TranscriptEntry) -> Result<()> {
        info!(call_id = %entry.call_id, role = ?entry.role, "{}", entry.text);
        Ok(())
    }
}

/// Appends entries to a file as JSON lines
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TranscriptSink for JsonLinesSink {
    async fn record(&self, entry: &TranscriptEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize transcript entry")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open transcript file {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to write transcript entry")?;
        Ok(())
    }
}

/// Transcript of the current call plus fire-and-forget forwarding
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    forward: Option<mpsc::UnboundedSender<TranscriptEntry>>,
}

impl Transcript {
    /// Must be called inside a tokio runtime when a sink is given
    pub fn new(sink: Option<Arc<dyn TranscriptSink>>) -> Self {
        let forward = sink.map(|sink| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(forward_entries(sink, rx));
            tx
        });

        Self {
            entries: Vec::new(),
            forward,
        }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        if let Some(tx) = &self.forward {
            if tx.send(entry.clone()).is_err() {
                warn!("Transcript sink is gone; entries are kept locally only");
                self.forward = None;
            }
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start over for a new call; the sink stays attached
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

async fn forward_entries(sink: Arc<dyn TranscriptSink>, mut rx: mpsc::UnboundedReceiver<TranscriptEntry>) {
    while let Some(entry) = rx.recv().await {
        match AssertUnwindSafe(sink.record(&entry)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Transcript sink failed: {:#}", e),
            Err(_) => warn!("Transcript sink panicked"),
        }
    }
}
