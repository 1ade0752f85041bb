//! Durable record backends

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

/// Append-only durable storage, one named record per trace
#[async_trait]
pub trait RecordLog: Send + Sync {
    /// Write a record. Names are unique and sort chronologically.
    async fn append(&self, name: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read up to `limit` records, newest name first
    async fn read_recent(&self, limit: usize) -> Result<Vec<(String, Vec<u8>)>>;

    /// Human-readable location for log lines
    fn location(&self) -> String;
}

/// One JSON file per trace in a directory
#[derive(Debug, Clone)]
pub struct JsonDirectory {
    dir: PathBuf,
}

impl JsonDirectory {
    /// Use `dir`, created lazily on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl RecordLog for JsonDirectory {
    async fn append(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // rename is atomic, so readers never see a half-written record
        let staging = self.dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, self.dir.join(name)).await?;
        Ok(())
    }

    async fn read_recent(&self, limit: usize) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        names.truncate(limit);

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            match tokio::fs::read(self.dir.join(&name)).await {
                Ok(bytes) => records.push((name, bytes)),
                Err(e) => warn!(record = %name, error = %e, "Failed to read trace record"),
            }
        }
        Ok(records)
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Discards writes; the store becomes memory-only
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLog;

#[async_trait]
impl RecordLog for NullLog {
    async fn append(&self, _name: &str, _bytes: Vec<u8>) -> Result<()> {
        Ok(())
    }

    async fn read_recent(&self, _limit: usize) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(Vec::new())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
