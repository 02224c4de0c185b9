use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEvent {
    TokenRefreshed,
    TokenRefreshFailed,
    DrawFinished,
    VideoJobSubmitted,
    VideoJobFinished,
    VideoJobFailed,
}

impl JournalEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenRefreshed => "token_refreshed",
            Self::TokenRefreshFailed => "token_refresh_failed",
            Self::DrawFinished => "draw_finished",
            Self::VideoJobSubmitted => "video_job_submitted",
            Self::VideoJobFinished => "video_job_finished",
            Self::VideoJobFailed => "video_job_failed",
        }
    }
}

/// Append-only JSONL journal of plugin lifecycle events.
///
/// Each line is `{"type", "plugin", "ts", ..payload}`; payload keys win over
/// the defaults. A disabled journal accepts events and writes nothing, so
/// callers never branch on whether journaling is configured. The file is
/// opened on first write and shared by every clone.
#[derive(Debug, Clone)]
pub struct EventWriter {
    sink: Option<Arc<JournalSink>>,
    plugin: Arc<str>,
}

#[derive(Debug)]
struct JournalSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, plugin: &str) -> Self {
        Self {
            sink: Some(Arc::new(JournalSink {
                path: path.into(),
                file: Mutex::new(None),
            })),
            plugin: Arc::from(plugin),
        }
    }

    pub fn disabled(plugin: &str) -> Self {
        Self {
            sink: None,
            plugin: Arc::from(plugin),
        }
    }

    pub fn from_optional_path(path: Option<&Path>, plugin: &str) -> Self {
        match path {
            Some(path) => Self::new(path, plugin),
            None => Self::disabled(plugin),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_deref().map(|sink| sink.path.as_path())
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Builds the event object and appends it. Returns the object even when
    /// the journal is disabled.
    pub fn emit(&self, event: JournalEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let mut record = Map::new();
        record.insert("type".to_string(), event.as_str().into());
        record.insert("plugin".to_string(), Value::from(self.plugin.as_ref()));
        record.insert(
            "ts".to_string(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, false)
                .into(),
        );
        record.extend(payload);
        let record = Value::Object(record);

        if let Some(sink) = self.sink.as_deref() {
            sink.append(&record)?;
        }
        Ok(record)
    }
}

impl JournalSink {
    fn append(&self, record: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("journal lock poisoned"))?;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("failed opening journal {}", self.path.display()))?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(&line)?;
        }
        Ok(())
    }
}
