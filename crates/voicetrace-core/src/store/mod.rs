//! Trace store - durable record log plus a bounded recency window
//!
//! Every closed trace is appended to the [`RecordLog`] as one self-describing
//! JSON document and inserted into an in-memory window of the most recent
//! traces. The window is what queries read; the log is what survives
//! restarts. Eviction from the window never touches the log.

mod log;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::models::Trace;

pub use log::{JsonDirectory, NullLog, RecordLog};

/// Name of the durable record for a trace.
///
/// Microsecond timestamp first so names sort chronologically, then the id so
/// traces started in the same instant never collide.
pub fn record_name(trace: &Trace) -> String {
    format!(
        "{}_{}.json",
        trace.started_at.format("%Y%m%d_%H%M%S_%6f"),
        trace.id.simple()
    )
}

/// Decode and check one durable record
pub fn decode_record(bytes: &[u8]) -> Result<Trace> {
    let trace: Trace = serde_json::from_slice(bytes)?;
    trace.validate()?;
    Ok(trace)
}

/// Shared sink for closed traces
pub struct TraceStore {
    log: Arc<dyn RecordLog>,
    capacity: usize,
    /// Oldest put first; eviction pops the front
    window: Mutex<Vec<Trace>>,
}

impl std::fmt::Debug for TraceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceStore")
            .field("log", &self.log.location())
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl TraceStore {
    /// Create a store over a record log, keeping `capacity` traces in memory
    pub fn new(log: Arc<dyn RecordLog>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            log,
            capacity,
            window: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Memory-only store
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Arc::new(NullLog), capacity)
    }

    /// Store writing one JSON file per trace under `dir`
    pub fn json_dir(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self::new(Arc::new(JsonDirectory::new(dir)), capacity)
    }

    /// Build from configuration, reloading recent records if enabled
    pub async fn from_config(config: &StoreConfig) -> Self {
        let store = if config.persist {
            Self::json_dir(&config.directory, config.window_size)
        } else {
            Self::in_memory(config.window_size)
        };

        if config.persist && config.load_on_start {
            let loaded = store.load_recent(config.window_size).await;
            info!(loaded, location = %store.log.location(), "Recent traces restored");
        }

        store
    }

    /// Maximum number of traces held in memory
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of traces currently in the window
    pub fn len(&self) -> usize {
        self.window.lock().len()
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.window.lock().is_empty()
    }

    /// Where durable records go
    pub fn location(&self) -> String {
        self.log.location()
    }

    /// Accept a closed trace.
    ///
    /// The trace always lands in the window. A failed durable write is logged
    /// and counted but never reported to the caller.
    pub async fn put(&self, trace: Trace) {
        let id = trace.id;
        let name = record_name(&trace);
        let encoded = serde_json::to_vec_pretty(&trace);

        self.insert(trace);

        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                metrics::counter!("voicetrace_persist_failures_total").increment(1);
                error!(trace_id = %id, error = %e, "Failed to encode trace");
                return;
            }
        };

        match self.log.append(&name, bytes).await {
            Ok(()) => {
                metrics::counter!("voicetrace_traces_persisted_total").increment(1);
                debug!(trace_id = %id, record = %name, "Trace persisted");
            }
            Err(e) => {
                metrics::counter!("voicetrace_persist_failures_total").increment(1);
                error!(
                    trace_id = %id,
                    location = %self.log.location(),
                    error = %e,
                    "Failed to persist trace"
                );
            }
        }
    }

    /// Reload up to `limit` of the newest durable records into the window.
    /// Unreadable or invalid records are skipped. Returns how many loaded.
    pub async fn load_recent(&self, limit: usize) -> usize {
        let records = match self.log.read_recent(limit).await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    location = %self.log.location(),
                    error = %e,
                    "Failed to read trace records"
                );
                return 0;
            }
        };

        let mut loaded = 0;
        for (name, bytes) in records.into_iter().rev() {
            match decode_record(&bytes) {
                Ok(trace) => {
                    self.insert(trace);
                    loaded += 1;
                }
                Err(e) => warn!(record = %name, error = %e, "Skipping trace record"),
            }
        }
        loaded
    }

    fn insert(&self, trace: Trace) {
        let mut window = self.window.lock();

        if let Some(existing) = window.iter().position(|t| t.id == trace.id) {
            warn!(trace_id = %trace.id, "Trace stored twice, replacing earlier copy");
            window.remove(existing);
        }

        window.push(trace);

        let overflow = window.len().saturating_sub(self.capacity);
        if overflow > 0 {
            window.drain(..overflow);
            metrics::counter!("voicetrace_traces_evicted_total").increment(overflow as u64);
        }
    }

    /// Run `f` over the window in put order, under the lock
    pub fn read<R>(&self, f: impl FnOnce(&[Trace]) -> R) -> R {
        f(&self.window.lock())
    }

    /// Copy of the trace with the given id, if still in the window
    pub fn get(&self, id: &Uuid) -> Option<Trace> {
        self.window.lock().iter().find(|t| t.id == *id).cloned()
    }

    /// Copy of the whole window in put order
    pub fn snapshot(&self) -> Vec<Trace> {
        self.window.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CostModel, ToolCall, Tracker};
    use crate::error::Error;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn closed(query: &str) -> Trace {
        let mut tracker = Tracker::open(query, Arc::new(CostModel::new()));
        let stage = tracker.begin_stage("coding");
        let start = Utc::now();
        tracker.record_tool(
            &stage,
            ToolCall::new("llm_tool", start, start + Duration::milliseconds(5))
                .with_provider("llama-3.3-70b-versatile")
                .with_tokens(100, 50),
        );
        tracker.end_stage(&stage, true, None);
        tracker.close(true, None).unwrap()
    }

    fn at(trace: &mut Trace, second: u32) {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, second).unwrap();
        let shift = start - trace.started_at;
        trace.started_at = start;
        trace.ended_at = trace.ended_at.map(|end| end + shift);
    }

    #[test]
    fn test_record_name_sorts_by_time() {
        let mut early = closed("a");
        let mut late = closed("b");
        at(&mut early, 1);
        at(&mut late, 2);
        let (a, b) = (record_name(&early), record_name(&late));
        assert!(a < b);
        assert!(a.starts_with("20250101_120001_000000_"));
        assert!(a.ends_with(".json"));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = TraceStore::in_memory(10);
        let trace = closed("create a login function");
        store.put(trace.clone()).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&trace.id), Some(trace));
        assert_eq!(store.get(&Uuid::now_v7()), None);
    }

    #[tokio::test]
    async fn test_window_keeps_put_order() {
        let store = TraceStore::in_memory(10);
        for second in [30, 10, 20] {
            let mut trace = closed("q");
            at(&mut trace, second);
            store.put(trace).await;
        }

        let seconds: Vec<_> = store.read(|traces| {
            traces
                .iter()
                .map(|t| t.started_at.format("%S").to_string())
                .collect()
        });
        assert_eq!(seconds, vec!["30", "10", "20"]);
    }

    #[tokio::test]
    async fn test_late_closing_trace_survives_full_window() {
        let store = TraceStore::in_memory(3);
        let costs = Arc::new(CostModel::new());
        let mut slow = Tracker::open("slow", Arc::clone(&costs));

        let mut fast_ids = Vec::new();
        for _ in 0..3 {
            let trace = closed("fast");
            fast_ids.push(trace.id);
            store.put(trace).await;
        }

        let stage = slow.begin_stage("coding");
        slow.end_stage(&stage, true, None);
        let slow = slow.close(true, None).unwrap();
        store.put(slow.clone()).await;

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&slow.id), Some(slow));
        assert!(store.get(&fast_ids[0]).is_none());
        assert!(store.get(&fast_ids[2]).is_some());
    }

    #[tokio::test]
    async fn test_eviction_keeps_durable_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::json_dir(dir.path(), 3);

        let mut ids = Vec::new();
        for second in 0..5 {
            let mut trace = closed("q");
            at(&mut trace, second);
            ids.push(trace.id);
            store.put(trace).await;
        }

        assert_eq!(store.len(), 3);
        assert!(store.get(&ids[0]).is_none());
        assert!(store.get(&ids[4]).is_some());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 5);
    }

    #[tokio::test]
    async fn test_load_recent_restores_newest() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceStore::json_dir(dir.path(), 10);
        let mut traces = Vec::new();
        for second in 0..4 {
            let mut trace = closed("q");
            at(&mut trace, second);
            traces.push(trace.clone());
            writer.put(trace).await;
        }
        std::fs::write(dir.path().join("20990101_000000_000000_bad.json"), "{not json").unwrap();

        let reader = TraceStore::json_dir(dir.path(), 10);
        assert_eq!(reader.load_recent(3).await, 2);
        let ids: Vec<Uuid> = reader.snapshot().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![traces[2].id, traces[3].id]);
        assert_eq!(reader.get(&traces[3].id).unwrap().total_tokens, 150);
    }

    #[test]
    fn test_decode_record_errors() {
        assert!(matches!(decode_record(b"{not json"), Err(Error::Serialization(_))));

        let mut open = closed("q");
        open.ended_at = None;
        let bytes = serde_json::to_vec(&open).unwrap();
        assert!(matches!(decode_record(&bytes), Err(Error::Validation(_))));

        let trace = closed("q");
        let bytes = serde_json::to_vec(&trace).unwrap();
        assert_eq!(decode_record(&bytes).unwrap().id, trace.id);
    }

    #[tokio::test]
    async fn test_overflowing_record_is_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceStore::json_dir(dir.path(), 10);
        let good = closed("good");
        writer.put(good.clone()).await;

        let mut json = serde_json::to_value(closed("huge")).unwrap();
        json["stage_spans"][0]["tools"][0]["input_tokens"] = serde_json::Value::from(u64::MAX);
        let name = "20990101_000000_000000_huge.json";
        std::fs::write(dir.path().join(name), json.to_string()).unwrap();

        let reader = TraceStore::json_dir(dir.path(), 10);
        assert_eq!(reader.load_recent(10).await, 1);
        assert!(reader.get(&good.id).is_some());
    }

    struct BrokenLog;

    #[async_trait]
    impl RecordLog for BrokenLog {
        async fn append(&self, _name: &str, _bytes: Vec<u8>) -> Result<()> {
            Err(Error::internal("disk full"))
        }

        async fn read_recent(&self, _limit: usize) -> Result<Vec<(String, Vec<u8>)>> {
            Err(Error::internal("disk gone"))
        }

        fn location(&self) -> String {
            "broken".to_string()
        }
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_trace_in_memory() {
        let store = TraceStore::new(Arc::new(BrokenLog), 5);
        let trace = closed("q");
        store.put(trace.clone()).await;

        assert_eq!(store.get(&trace.id), Some(trace));
        assert_eq!(store.load_recent(5).await, 0);
    }

    #[tokio::test]
    async fn test_same_id_replaces() {
        let store = TraceStore::in_memory(5);
        let mut trace = closed("q");
        store.put(trace.clone()).await;
        trace.query_text = "edited".to_string();
        store.put(trace.clone()).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&trace.id).unwrap().query_text, "edited");
    }
}
