// ============================
// crates/backend-lib/src/storage.rs
// ============================
//! Storage abstraction with in-memory and flat-file implementations.
//!
//! The store persists whole [`EventRecord`] aggregates and the per-room chat
//! log. It does not serialize writers on its own: callers reach it through
//! [`crate::ledger::CapacityLedger`], which holds the event lock around every
//! load-modify-save sequence.
use crate::error::AppError;
use crate::models::EventRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use eventroom_common::{ChatMessage, EventId, MessageId};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs as tokio_fs, io::AsyncWriteExt};

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load an event aggregate
    async fn load_event(&self, event_id: EventId) -> Result<Option<EventRecord>, AppError>;

    /// Insert or replace an event aggregate
    async fn save_event(&self, record: &EventRecord) -> Result<(), AppError>;

    /// Append a message to a room's chat log
    async fn append_message(&self, message: &ChatMessage) -> Result<(), AppError>;

    /// Look up a live (not deleted) message
    async fn get_message(
        &self,
        event_id: EventId,
        message_id: MessageId,
    ) -> Result<Option<ChatMessage>, AppError>;

    /// Delete a message; returns whether it existed
    async fn delete_message(
        &self,
        event_id: EventId,
        message_id: MessageId,
    ) -> Result<bool, AppError>;

    /// The most recent `limit` live messages, oldest first
    async fn recent_messages(
        &self,
        event_id: EventId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AppError>;
}

fn tail(mut messages: Vec<ChatMessage>, limit: usize) -> Vec<ChatMessage> {
    messages.sort_by_key(|m| m.created_at);
    let skip = messages.len().saturating_sub(limit);
    messages.split_off(skip)
}

/// Process-local storage
#[derive(Clone, Default)]
pub struct MemoryStorage {
    events: Arc<DashMap<EventId, EventRecord>>,
    messages: Arc<DashMap<EventId, Vec<ChatMessage>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_event(&self, event_id: EventId) -> Result<Option<EventRecord>, AppError> {
        Ok(self.events.get(&event_id).map(|r| r.value().clone()))
    }

    async fn save_event(&self, record: &EventRecord) -> Result<(), AppError> {
        self.events.insert(record.id(), record.clone());
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), AppError> {
        self.messages
            .entry(message.event_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn get_message(
        &self,
        event_id: EventId,
        message_id: MessageId,
    ) -> Result<Option<ChatMessage>, AppError> {
        Ok(self
            .messages
            .get(&event_id)
            .and_then(|log| log.iter().find(|m| m.id == message_id).cloned()))
    }

    async fn delete_message(
        &self,
        event_id: EventId,
        message_id: MessageId,
    ) -> Result<bool, AppError> {
        let Some(mut log) = self.messages.get_mut(&event_id) else {
            return Ok(false);
        };
        let before = log.len();
        log.retain(|m| m.id != message_id);
        Ok(log.len() != before)
    }

    async fn recent_messages(
        &self,
        event_id: EventId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let messages = self
            .messages
            .get(&event_id)
            .map(|log| log.value().clone())
            .unwrap_or_default();
        Ok(tail(messages, limit))
    }
}

/// One line of a room's `messages.log`
#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogLine {
    Posted { message: ChatMessage },
    Deleted { message_id: MessageId },
}

/// Flat-file implementation of the Storage trait
///
/// Layout: `<root>/events/<event_id>/event.json` holds the aggregate snapshot,
/// `<root>/events/<event_id>/messages.log` the append-only chat log.
#[derive(Clone)]
pub struct FlatFileStorage {
    root: PathBuf,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("events"))?;
        Ok(Self { root })
    }

    fn event_dir(&self, event_id: EventId) -> PathBuf {
        self.root.join("events").join(event_id.to_string())
    }

    async fn read_log(&self, event_id: EventId) -> Result<Vec<ChatMessage>, AppError> {
        let path = self.event_dir(event_id).join("messages.log");
        if !tokio_fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }

        let content = tokio_fs::read_to_string(&path).await?;
        let mut live: Vec<ChatMessage> = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<LogLine>(line) {
                Ok(LogLine::Posted { message }) => live.push(message),
                Ok(LogLine::Deleted { message_id }) => live.retain(|m| m.id != message_id),
                // A torn final line from a crash mid-append is skipped
                Err(e) => tracing::warn!(%event_id, "skipping unreadable log line: {e}"),
            }
        }
        Ok(live)
    }

    async fn append_line(&self, event_id: EventId, line: &LogLine) -> Result<(), AppError> {
        let dir = self.event_dir(event_id);
        tokio_fs::create_dir_all(&dir).await?;

        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("messages.log"))
            .await?;

        let mut json = serde_json::to_string(line)?;
        json.push('\n');
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn load_event(&self, event_id: EventId) -> Result<Option<EventRecord>, AppError> {
        let path = self.event_dir(event_id).join("event.json");
        if !tokio_fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = tokio_fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write to a temp file then rename, so readers never see a partial snapshot
    async fn save_event(&self, record: &EventRecord) -> Result<(), AppError> {
        let dir = self.event_dir(record.id());
        tokio_fs::create_dir_all(&dir).await?;

        let json = serde_json::to_vec_pretty(record)?;
        let tmp = dir.join("event.json.tmp");
        let mut file = tokio_fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        tokio_fs::rename(&tmp, dir.join("event.json")).await?;
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), AppError> {
        self.append_line(
            message.event_id,
            &LogLine::Posted {
                message: message.clone(),
            },
        )
        .await
    }

    async fn get_message(
        &self,
        event_id: EventId,
        message_id: MessageId,
    ) -> Result<Option<ChatMessage>, AppError> {
        let live = self.read_log(event_id).await?;
        Ok(live.into_iter().find(|m| m.id == message_id))
    }

    async fn delete_message(
        &self,
        event_id: EventId,
        message_id: MessageId,
    ) -> Result<bool, AppError> {
        if self.get_message(event_id, message_id).await?.is_none() {
            return Ok(false);
        }
        self.append_line(event_id, &LogLine::Deleted { message_id })
            .await?;
        Ok(true)
    }

    async fn recent_messages(
        &self,
        event_id: EventId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AppError> {
        Ok(tail(self.read_log(event_id).await?, limit))
    }
}
