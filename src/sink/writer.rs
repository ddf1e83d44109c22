//! NDJSON sink writer.

use snafu::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OutputConfig;
use crate::emit;
use crate::error::{FlushSnafu, OpenSnafu, SerializeSnafu, WriteError, WriteRecordSnafu};
use crate::metrics::events::{RecordSkipped, RecordsWritten};
use crate::queue::{QueueConsumer, QueueEntry};
use crate::source::Record;

/// What a writer got done before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub records_written: u64,
    pub records_skipped: u64,
    /// Stopped by cancellation rather than the end-of-stream marker.
    pub cancelled: bool,
}

impl fmt::Display for WriterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} written, {} skipped",
            self.records_written, self.records_skipped
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Drains one output queue into one file.
#[derive(Debug, Clone)]
pub struct SinkWriter {
    name: String,
    path: PathBuf,
    append: bool,
}

impl SinkWriter {
    pub fn new(name: impl Into<String>, output: &OutputConfig) -> Self {
        Self {
            name: name.into(),
            path: output.path.clone(),
            append: output.append,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the destination and write records until the end-of-stream marker
    /// or cancellation.
    ///
    /// The file is flushed and closed on every exit path after a successful
    /// open.
    pub async fn run(
        self,
        queue: QueueConsumer,
        shutdown: CancellationToken,
    ) -> Result<WriterReport, WriteError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
            .await
            .context(OpenSnafu { path: &self.path })?;
        info!(
            path = %self.path.display(),
            stream = %queue.stream(),
            append = self.append,
            "Opened destination"
        );

        self.write_to(file, queue, shutdown).await
    }

    /// Drain `queue` into an open destination, then flush and close it.
    async fn write_to<W>(
        &self,
        mut out: W,
        queue: QueueConsumer,
        shutdown: CancellationToken,
    ) -> Result<WriterReport, WriteError>
    where
        W: AsyncWrite + Unpin,
    {
        let report = self.drain(&mut out, queue, shutdown).await;

        out.flush().await.context(FlushSnafu { path: &self.path })?;
        out.shutdown()
            .await
            .context(FlushSnafu { path: &self.path })?;

        if report.cancelled {
            warn!(%report, "Writer cancelled");
        } else {
            info!(%report, "Writer finished");
        }
        Ok(report)
    }

    async fn drain<W>(
        &self,
        out: &mut W,
        mut queue: QueueConsumer,
        shutdown: CancellationToken,
    ) -> WriterReport
    where
        W: AsyncWrite + Unpin,
    {
        let mut report = WriterReport::default();

        loop {
            let entry = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                entry = queue.get() => entry,
            };

            match entry {
                Some(QueueEntry::Record(record)) => match write_record(out, &record).await {
                    Ok(()) => {
                        report.records_written += 1;
                        emit!(RecordsWritten {
                            output: self.name.clone(),
                            count: 1,
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Skipping record");
                        report.records_skipped += 1;
                        emit!(RecordSkipped {
                            output: self.name.clone(),
                        });
                    }
                },
                Some(QueueEntry::EndOfStream) => {
                    debug!("End of stream");
                    break;
                }
                None => {
                    warn!("Queue closed without an end-of-stream marker");
                    break;
                }
            }
        }

        report
    }
}

/// Write one line and flush it, so an I/O error is charged to this record
/// and never to a later one.
async fn write_record<W>(out: &mut W, record: &Record) -> Result<(), WriteError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(record).context(SerializeSnafu)?;
    line.push(b'\n');
    out.write_all(&line).await.context(WriteRecordSnafu)?;
    out.flush().await.context(WriteRecordSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{StreamId, output_queue};
    use serde_json::json;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    fn record(n: u64) -> Record {
        let mut record = Record::new();
        record.insert("n".to_string(), json!(n));
        record.insert("_source".to_string(), json!("users"));
        record
    }

    fn output(path: PathBuf, append: bool) -> OutputConfig {
        OutputConfig {
            stream: StreamId::new(1).unwrap(),
            path,
            append,
        }
    }

    fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_writes_in_order_until_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ndjson");
        let (tx, rx) = output_queue(StreamId::new(1).unwrap(), 16);

        for n in 0..5 {
            tx.put(record(n)).await.unwrap();
        }
        tx.put_end_of_stream().await.unwrap();
        // Anything after the marker is never read.
        tx.put(record(99)).await.unwrap();

        let writer = SinkWriter::new("out", &output(path.clone(), false));
        let report = writer.run(rx, CancellationToken::new()).await.unwrap();
        assert_eq!(
            report,
            WriterReport {
                records_written: 5,
                records_skipped: 0,
                cancelled: false
            }
        );

        let lines = read_lines(&path);
        let ns: Vec<u64> = lines.iter().map(|l| l["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, [0, 1, 2, 3, 4]);
        // Field order survives the round trip.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with(r#"{"n":0,"_source":"users"}"#));
    }

    #[tokio::test]
    async fn test_truncates_by_default_and_appends_on_request() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ndjson");
        std::fs::write(&path, "{\"old\":true}\n").unwrap();

        let (tx, rx) = output_queue(StreamId::new(1).unwrap(), 4);
        tx.put(record(1)).await.unwrap();
        tx.put_end_of_stream().await.unwrap();
        SinkWriter::new("out", &output(path.clone(), false))
            .run(rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(read_lines(&path).len(), 1);

        let (tx, rx) = output_queue(StreamId::new(1).unwrap(), 4);
        tx.put(record(2)).await.unwrap();
        tx.put_end_of_stream().await.unwrap();
        SinkWriter::new("out", &output(path.clone(), true))
            .run(rx, CancellationToken::new())
            .await
            .unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["n"], json!(2));
    }

    #[tokio::test]
    async fn test_cancellation_flushes_what_was_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ndjson");
        let (tx, rx) = output_queue(StreamId::new(1).unwrap(), 4);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(
            SinkWriter::new("out", &output(path.clone(), false)).run(rx, shutdown.clone()),
        );
        tx.put(record(1)).await.unwrap();
        tx.put(record(2)).await.unwrap();
        // Wait until the writer has taken both records.
        while !tx.is_empty() {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();

        let report = handle.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.records_written, 2);
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[tokio::test]
    async fn test_open_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.ndjson");
        let (_tx, rx) = output_queue(StreamId::new(1).unwrap(), 4);

        let err = SinkWriter::new("out", &output(path, false))
            .run(rx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Open { .. }));
    }

    /// Buffers writes and commits them on flush, failing the `fail_on`-th
    /// flush and discarding what it held, like a file whose buffered write
    /// is rejected by the disk.
    struct FlakyWriter {
        flushes: usize,
        fail_on: usize,
        pending: Vec<u8>,
        data: Vec<u8>,
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.pending.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushes += 1;
            if self.flushes == self.fail_on {
                self.pending.clear();
                return Poll::Ready(Err(io::Error::other("disk full")));
            }
            let pending = std::mem::take(&mut self.pending);
            self.data.extend_from_slice(&pending);
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.poll_flush(cx)
        }
    }

    #[tokio::test]
    async fn test_failed_record_is_skipped() {
        let writer = SinkWriter::new("out", &output(PathBuf::from("unused"), false));
        let (tx, rx) = output_queue(StreamId::new(1).unwrap(), 8);
        for n in 0..3 {
            tx.put(record(n)).await.unwrap();
        }
        tx.put_end_of_stream().await.unwrap();

        let mut out = FlakyWriter {
            flushes: 0,
            fail_on: 2,
            pending: Vec::new(),
            data: Vec::new(),
        };
        let report = writer
            .write_to(&mut out, rx, CancellationToken::new())
            .await
            .unwrap();

        // The rejected flush belongs to record 1 only; records 0 and 2 land
        // as whole lines.
        assert_eq!(report.records_written, 2);
        assert_eq!(report.records_skipped, 1);
        let text = String::from_utf8(out.data).unwrap();
        assert!(text.ends_with('\n'));
        let ns: Vec<u64> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["n"].as_u64().unwrap())
            .collect();
        assert_eq!(ns, [0, 2]);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_rejected_writes_are_skipped_not_fatal() {
        // Every write to /dev/full fails with ENOSPC.
        let path = PathBuf::from("/dev/full");
        if !path.exists() {
            return;
        }
        let (tx, rx) = output_queue(StreamId::new(1).unwrap(), 8);
        for n in 0..3 {
            tx.put(record(n)).await.unwrap();
        }
        tx.put_end_of_stream().await.unwrap();

        let report = SinkWriter::new("full", &output(path, false))
            .run(rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            report,
            WriterReport {
                records_written: 0,
                records_skipped: 3,
                cancelled: false
            }
        );
    }

    #[tokio::test]
    async fn test_dropped_producers_end_the_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ndjson");
        let (tx, rx) = output_queue(StreamId::new(1).unwrap(), 4);
        tx.put(record(1)).await.unwrap();
        drop(tx);

        let report = SinkWriter::new("out", &output(path.clone(), false))
            .run(rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.records_written, 1);
        assert!(!report.cancelled);
    }
}
