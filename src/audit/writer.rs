use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::redact::redact_in_place;
use super::{AuditEvent, AuditRecord};
use crate::error::AuditError;

// ─── Sinks ───────────────────────────────────────────────────────────────────

/// Destination for finished records. Implementations must make each record
/// durable before returning from `write`; the consumer task relies on that
/// for the crash-safety guarantee.
pub trait AuditSink: Send {
    fn write(&mut self, record: &AuditRecord) -> Result<(), AuditError>;

    fn flush(&mut self) -> Result<(), AuditError>;

    fn entry_count(&self) -> u64;
}

/// JSONL file sink, append-only. One `write` call is one line followed by a
/// flush (and `sync_data` unless disabled).
pub struct FileAuditSink {
    file: File,
    sync_each_record: bool,
    entries: u64,
}

impl FileAuditSink {
    pub fn open(path: &Path, sync_each_record: bool) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            sync_each_record,
            entries: 0,
        })
    }
}

impl AuditSink for FileAuditSink {
    fn write(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        let line =
            serde_json::to_string(record).map_err(|e| AuditError::Serialize(e.to_string()))?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        if self.sync_each_record {
            self.file.sync_data()?;
        }
        self.entries += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AuditError> {
        self.file.flush()?;
        if self.sync_each_record {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn entry_count(&self) -> u64 {
        self.entries
    }
}

/// In-memory sink for tests and dry runs. Keep a handle to `records()`
/// before moving the sink into the writer.
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn records(&self) -> Arc<Mutex<Vec<AuditRecord>>> {
        Arc::clone(&self.records)
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AuditError> {
        Ok(())
    }

    fn entry_count(&self) -> u64 {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len() as u64
    }
}

// ─── Writer ──────────────────────────────────────────────────────────────────

enum WriterMsg {
    Record(AuditEvent),
    Checkpoint(oneshot::Sender<Result<(), AuditError>>),
    Shutdown(oneshot::Sender<Result<u64, AuditError>>),
}

/// Cloneable submission side of the trail. `append` waits for queue capacity
/// (backpressure) and fails only when the consumer is gone.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<WriterMsg>,
}

impl AuditHandle {
    pub async fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.tx
            .send(WriterMsg::Record(event))
            .await
            .map_err(|_| AuditError::WriterClosed)
    }

    /// Wait until every record submitted before this call is durably on the
    /// sink. Surfaces any latched sink failure. The executor calls this at
    /// every barrier and at run end.
    pub async fn checkpoint(&self) -> Result<(), AuditError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WriterMsg::Checkpoint(reply_tx))
            .await
            .map_err(|_| AuditError::WriterClosed)?;
        reply_rx.await.map_err(|_| AuditError::WriterClosed)?
    }
}

/// Single-consumer writer. One dedicated blocking thread owns the sink and
/// assigns sequence numbers in queue-arrival order, which equals submission
/// order. Running the consumer via `spawn_blocking` keeps the per-record
/// file appends and `sync_data` calls off the async worker threads.
pub struct AuditWriter {
    tx: mpsc::Sender<WriterMsg>,
    task: JoinHandle<()>,
}

impl AuditWriter {
    pub fn spawn(sink: Box<dyn AuditSink>, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let task = tokio::task::spawn_blocking(move || consume(sink, rx));
        Self { tx, task }
    }

    pub fn handle(&self) -> AuditHandle {
        AuditHandle {
            tx: self.tx.clone(),
        }
    }

    /// Flush everything accepted so far, stop the consumer, and report the
    /// number of records written (or the first sink failure).
    pub async fn shutdown(self) -> Result<u64, AuditError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WriterMsg::Shutdown(reply_tx))
            .await
            .map_err(|_| AuditError::WriterClosed)?;
        let result = reply_rx.await.map_err(|_| AuditError::WriterClosed)?;
        let _ = self.task.await;
        result
    }
}

fn consume(mut sink: Box<dyn AuditSink>, mut rx: mpsc::Receiver<WriterMsg>) {
    let mut seq: u64 = 0;
    let mut failure: Option<String> = None;

    while let Some(msg) = rx.blocking_recv() {
        match msg {
            WriterMsg::Record(event) => {
                if failure.is_some() {
                    continue;
                }
                seq += 1;
                let mut payload = event.payload;
                redact_in_place(&mut payload);
                let record = AuditRecord {
                    seq,
                    kind: event.kind,
                    stage: event.stage,
                    unit: event.unit,
                    payload,
                    timestamp: Utc::now().to_rfc3339(),
                };
                if let Err(e) = sink.write(&record) {
                    tracing::error!(seq, error = %e, "audit sink write failed");
                    failure = Some(e.to_string());
                }
            }
            WriterMsg::Checkpoint(reply) => {
                let result = match &failure {
                    Some(reason) => Err(AuditError::Sink(reason.clone())),
                    None => match sink.flush() {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            let reason = e.to_string();
                            failure = Some(reason.clone());
                            Err(AuditError::Sink(reason))
                        }
                    },
                };
                let _ = reply.send(result);
            }
            WriterMsg::Shutdown(reply) => {
                let result = match &failure {
                    Some(reason) => Err(AuditError::Sink(reason.clone())),
                    None => sink
                        .flush()
                        .map(|()| sink.entry_count())
                        .map_err(|e| AuditError::Sink(e.to_string())),
                };
                let _ = reply.send(result);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn event(kind: EventKind) -> AuditEvent {
        AuditEvent::new(kind, json!({}))
    }

    struct FailingSink {
        written: u64,
        fail_after: u64,
    }

    impl AuditSink for FailingSink {
        fn write(&mut self, _record: &AuditRecord) -> Result<(), AuditError> {
            if self.written >= self.fail_after {
                return Err(AuditError::Sink("disk full".into()));
            }
            self.written += 1;
            Ok(())
        }

        fn flush(&mut self) -> Result<(), AuditError> {
            Ok(())
        }

        fn entry_count(&self) -> u64 {
            self.written
        }
    }

    #[tokio::test]
    async fn seq_is_gapless_across_concurrent_producers() {
        let sink = MemoryAuditSink::new();
        let records = sink.records();
        let writer = AuditWriter::spawn(Box::new(sink), 8);

        let mut producers = Vec::new();
        for _ in 0..4 {
            let handle = writer.handle();
            producers.push(tokio::spawn(async move {
                for _ in 0..25 {
                    handle.append(event(EventKind::ToolCall)).await.unwrap();
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }

        let written = writer.shutdown().await.unwrap();
        assert_eq!(written, 100);

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 100);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.seq, i as u64 + 1, "gap or reorder at index {i}");
        }
    }

    #[tokio::test]
    async fn single_producer_order_is_submission_order() {
        let sink = MemoryAuditSink::new();
        let records = sink.records();
        let writer = AuditWriter::spawn(Box::new(sink), 4);
        let handle = writer.handle();

        handle.append(event(EventKind::RunStart)).await.unwrap();
        handle.append(event(EventKind::StageStart)).await.unwrap();
        handle.append(event(EventKind::StageEnd)).await.unwrap();
        writer.shutdown().await.unwrap();

        let kinds: Vec<EventKind> = records.lock().unwrap().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::RunStart, EventKind::StageStart, EventKind::StageEnd]
        );
    }

    #[tokio::test]
    async fn checkpoint_acks_after_all_prior_records_hit_the_sink() {
        let sink = MemoryAuditSink::new();
        let records = sink.records();
        let writer = AuditWriter::spawn(Box::new(sink), 4);
        let handle = writer.handle();

        for _ in 0..3 {
            handle.append(event(EventKind::UnitStart)).await.unwrap();
        }
        handle.checkpoint().await.unwrap();
        assert_eq!(records.lock().unwrap().len(), 3);

        writer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn file_sink_persists_parseable_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit").join("audit.jsonl");
        let sink = FileAuditSink::open(&path, true).unwrap();
        let writer = AuditWriter::spawn(Box::new(sink), 4);
        let handle = writer.handle();

        handle
            .append(
                AuditEvent::new(EventKind::RunStart, json!({"scenario": "ransomware"}))
                    .stage("perception"),
            )
            .await
            .unwrap();
        handle.append(event(EventKind::RunEnd)).await.unwrap();
        let written = writer.shutdown().await.unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(first.kind, EventKind::RunStart);
        assert_eq!(first.stage.as_deref(), Some("perception"));
        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.seq, 2);
    }

    #[tokio::test]
    async fn sink_failure_surfaces_at_checkpoint_and_shutdown() {
        let sink = FailingSink {
            written: 0,
            fail_after: 1,
        };
        let writer = AuditWriter::spawn(Box::new(sink), 4);
        let handle = writer.handle();

        handle.append(event(EventKind::RunStart)).await.unwrap();
        handle.append(event(EventKind::ToolCall)).await.unwrap();

        let err = handle.checkpoint().await.unwrap_err();
        assert!(err.to_string().contains("disk full"));

        let err = writer.shutdown().await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn append_after_shutdown_reports_writer_closed() {
        let writer = AuditWriter::spawn(Box::new(MemoryAuditSink::new()), 4);
        let handle = writer.handle();
        writer.shutdown().await.unwrap();

        let err = handle.append(event(EventKind::ToolCall)).await.unwrap_err();
        assert!(matches!(err, AuditError::WriterClosed));
    }

    #[tokio::test]
    async fn payloads_are_redacted_before_hitting_the_sink() {
        let sink = MemoryAuditSink::new();
        let records = sink.records();
        let writer = AuditWriter::spawn(Box::new(sink), 4);
        let handle = writer.handle();

        handle
            .append(AuditEvent::new(
                EventKind::ToolCall,
                json!({"args": {"api_key": "sk-live-12345", "host": "db-01"}}),
            ))
            .await
            .unwrap();
        writer.shutdown().await.unwrap();

        let records = records.lock().unwrap();
        let line = serde_json::to_string(&records[0]).unwrap();
        assert!(!line.contains("sk-live-12345"));
        assert!(line.contains("***REDACTED***"));
        assert!(line.contains("db-01"));
    }
}
