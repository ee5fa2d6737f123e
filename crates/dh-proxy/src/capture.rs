//! Append-only capture logs of intercepted plaintext
//!
//! One file per direction, shared by every connection. Each record is
//! written with a single `write_all` under the file's lock so concurrent
//! connections never interleave partial records. Async callers go through
//! [`CaptureLogs::record`], which runs the write on tokio's blocking pool.

use crate::relay::Side;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Capture log errors
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open capture log {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to append to capture log {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Capture writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A single append-only log file
pub struct CaptureLog {
    path: PathBuf,
    file: Mutex<File>,
    /// Byte appended after every record, if any
    delimiter: Option<u8>,
}

impl CaptureLog {
    /// Open (creating if needed) a log in append mode
    pub fn open(path: impl AsRef<Path>, delimiter: Option<u8>) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| CaptureError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            delimiter,
        })
    }

    /// Append one record
    pub fn append(&self, record: &[u8]) -> Result<(), CaptureError> {
        let mut buf = Vec::with_capacity(record.len() + 1);
        buf.extend_from_slice(record);
        if let Some(delimiter) = self.delimiter {
            buf.push(delimiter);
        }

        let mut file = self.file.lock();
        file.write_all(&buf).map_err(|source| CaptureError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The pair of logs written by the relay
///
/// Client-to-server records are raw and undelimited; server-to-client
/// records end with a newline.
pub struct CaptureLogs {
    pub from_client: CaptureLog,
    pub from_server: CaptureLog,
}

impl CaptureLogs {
    pub fn open(
        client_path: impl AsRef<Path>,
        server_path: impl AsRef<Path>,
    ) -> Result<Self, CaptureError> {
        Ok(Self {
            from_client: CaptureLog::open(client_path, None)?,
            from_server: CaptureLog::open(server_path, Some(b'\n'))?,
        })
    }

    /// Open both logs under `dir` with their default file names
    pub fn open_in(dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        Self::open(
            dir.join(crate::config::DEFAULT_CLIENT_LOG),
            dir.join(crate::config::DEFAULT_SERVER_LOG),
        )
    }

    /// Log holding plaintext that arrived from `side`
    pub fn log(&self, side: Side) -> &CaptureLog {
        match side {
            Side::Client => &self.from_client,
            Side::Server => &self.from_server,
        }
    }

    /// Append a record from `side` without blocking the async worker
    pub async fn record(self: Arc<Self>, side: Side, record: Vec<u8>) -> Result<(), CaptureError> {
        tokio::task::spawn_blocking(move || self.log(side).append(&record)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_delimiter_asymmetry() {
        let dir = tempdir().unwrap();
        let logs = CaptureLogs::open_in(dir.path()).unwrap();

        logs.from_client.append(b"one").unwrap();
        logs.from_client.append(b"two").unwrap();
        logs.from_server.append(b"one").unwrap();
        logs.from_server.append(b"two").unwrap();

        assert_eq!(std::fs::read(logs.from_client.path()).unwrap(), b"onetwo");
        assert_eq!(std::fs::read(logs.from_server.path()).unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn test_appends_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");

        CaptureLog::open(&path, Some(b'\n')).unwrap().append(b"first").unwrap();
        CaptureLog::open(&path, Some(b'\n')).unwrap().append(b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"first\nsecond\n");
    }

    #[test]
    fn test_open_failure_reports_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("log.txt");
        let err = CaptureLog::open(&missing, None).err().unwrap();
        assert!(err.to_string().contains("no-such-dir"));
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        const THREADS: usize = 16;
        const RECORDS: usize = 200;

        let dir = tempdir().unwrap();
        let log = Arc::new(CaptureLog::open(dir.path().join("stress.txt"), Some(b'\n')).unwrap());

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let log = log.clone();
                thread::spawn(move || {
                    // Records large enough that an unserialized writer would tear them
                    let filler = "x".repeat(4096);
                    for r in 0..RECORDS {
                        let record = format!("{}:{}:{}", t, r, filler);
                        log.append(record.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), THREADS * RECORDS);

        let mut seen = HashSet::new();
        for line in lines {
            let mut parts = line.splitn(3, ':');
            let t: usize = parts.next().unwrap().parse().unwrap();
            let r: usize = parts.next().unwrap().parse().unwrap();
            let filler = parts.next().unwrap();
            assert_eq!(filler.len(), 4096);
            assert!(filler.bytes().all(|b| b == b'x'));
            assert!(seen.insert((t, r)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_records_from_many_tasks() {
        const TASKS: usize = 32;
        const RECORDS: usize = 50;

        let dir = tempdir().unwrap();
        let logs = Arc::new(CaptureLogs::open_in(dir.path()).unwrap());

        let handles: Vec<_> = (0..TASKS)
            .map(|t| {
                let logs = logs.clone();
                tokio::spawn(async move {
                    for r in 0..RECORDS {
                        let record = format!("{}:{}:{}", t, r, "y".repeat(2048));
                        logs.clone()
                            .record(Side::Server, record.into_bytes())
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let contents = std::fs::read_to_string(logs.from_server.path()).unwrap();
        let mut seen = HashSet::new();
        for line in contents.lines() {
            let mut parts = line.splitn(3, ':');
            let t: usize = parts.next().unwrap().parse().unwrap();
            let r: usize = parts.next().unwrap().parse().unwrap();
            assert_eq!(parts.next().unwrap().len(), 2048);
            assert!(seen.insert((t, r)));
        }
        assert_eq!(seen.len(), TASKS * RECORDS);
        assert!(std::fs::read(logs.from_client.path()).unwrap().is_empty());
    }
}
