//! Streaming installer downloads.
//!
//! A [`Download`] is an iterator of [`ProgressEvent`]s: every call to `next`
//! pulls more of the response body into the staging file. The body is never
//! held in memory as a whole, and a failed or abandoned download never leaves
//! a partial file behind.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Bytes pulled from the response per read.
pub const CHUNK_SIZE: usize = 4096;

/// Chunks between two progress reports (512 * 4 KiB = 2 MiB).
pub const CHUNKS_PER_REPORT: usize = 512;

const USER_AGENT: &str = concat!("minitile/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("Connection failed during download: {0}")]
    Network(#[source] std::io::Error),
    #[error("Download ended early: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How far along a transfer is, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Fraction(f32),
    /// No content length was declared.
    Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl ProgressEvent {
    pub fn progress(&self) -> Progress {
        match self.total {
            Some(total) if total > 0 => {
                Progress::Fraction((self.downloaded as f64 / total as f64).min(1.0) as f32)
            }
            _ => Progress::Indeterminate,
        }
    }
}

/// An opened response body.
pub struct Body {
    pub reader: Box<dyn Read + Send>,
    pub content_length: Option<u64>,
}

/// Something that can open a URL for streaming.
pub trait ArtifactSource: Send + Sync {
    fn open(&self, url: &str) -> Result<Body, DownloadError>;
}

/// Plain HTTP(S) source backed by ureq.
#[derive(Debug, Clone, Default)]
pub struct HttpSource;

impl ArtifactSource for HttpSource {
    fn open(&self, url: &str) -> Result<Body, DownloadError> {
        let resp = ureq::get(url)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| DownloadError::Request {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let content_length = resp
            .header("content-length")
            .and_then(|s| s.trim().parse::<u64>().ok());

        Ok(Body {
            reader: Box::new(resp.into_reader()),
            content_length,
        })
    }
}

/// Bookkeeping for one transfer into a staging file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    pub staging_path: PathBuf,
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
}

/// Download `url` over HTTP into `dest`.
pub fn download(url: &str, dest: &Path) -> Result<Download, DownloadError> {
    Download::start(&HttpSource, url, dest)
}

/// A running transfer. Finite and single-use.
pub struct Download {
    reader: Box<dyn Read + Send>,
    file: Option<File>,
    session: DownloadSession,
    buf: Vec<u8>,
    chunks_since_report: usize,
    done: bool,
}

impl Download {
    /// Open `url` through `source` and stream it into `dest`.
    ///
    /// The destination directory is created before the request is made.
    pub fn start(
        source: &dyn ArtifactSource,
        url: &str,
        dest: &Path,
    ) -> Result<Self, DownloadError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        tracing::info!("Downloading {} -> {:?}", url, dest);
        let body = source.open(url)?;
        Self::from_reader(body.reader, body.content_length, dest)
    }

    /// Stream an already opened body into `dest`.
    pub fn from_reader(
        reader: Box<dyn Read + Send>,
        content_length: Option<u64>,
        dest: &Path,
    ) -> Result<Self, DownloadError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(dest).map_err(|source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        Ok(Self {
            reader,
            file: Some(file),
            session: DownloadSession {
                staging_path: dest.to_path_buf(),
                total_bytes: content_length,
                downloaded_bytes: 0,
            },
            buf: vec![0u8; CHUNK_SIZE],
            chunks_since_report: 0,
            done: false,
        })
    }

    pub fn session(&self) -> &DownloadSession {
        &self.session
    }

    /// Drive the transfer to completion, returning the final event.
    pub fn finish(mut self) -> Result<ProgressEvent, DownloadError> {
        let mut last = self.current();
        for event in &mut self {
            last = event?;
        }
        Ok(last)
    }

    /// Progress so far, without reading anything.
    pub fn current(&self) -> ProgressEvent {
        ProgressEvent {
            downloaded: self.session.downloaded_bytes,
            total: self.session.total_bytes,
        }
    }

    /// Close the handle and delete the partial file.
    fn fail(&mut self, err: DownloadError) -> DownloadError {
        self.done = true;
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.session.staging_path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    "Failed to remove partial download {:?}: {e}",
                    self.session.staging_path
                );
            }
        }
        tracing::error!("Download into {:?} failed: {err}", self.session.staging_path);
        err
    }

    fn complete(&mut self) -> Result<ProgressEvent, DownloadError> {
        if let Some(expected) = self.session.total_bytes {
            if expected != self.session.downloaded_bytes {
                return Err(self.fail(DownloadError::Truncated {
                    expected,
                    received: self.session.downloaded_bytes,
                }));
            }
        }

        if let Some(mut file) = self.file.take() {
            if let Err(source) = file.flush().and_then(|_| file.sync_all()) {
                return Err(self.fail(DownloadError::Io {
                    path: self.session.staging_path.clone(),
                    source,
                }));
            }
        }
        self.done = true;
        tracing::info!(
            "Downloaded {} bytes into {:?}",
            self.session.downloaded_bytes,
            self.session.staging_path
        );
        Ok(self.current())
    }
}

impl Iterator for Download {
    type Item = Result<ProgressEvent, DownloadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let n = match self.reader.read(&mut self.buf) {
                Ok(0) => return Some(self.complete()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(self.fail(DownloadError::Network(e)))),
            };

            let Some(file) = self.file.as_mut() else {
                return None;
            };
            if let Err(source) = file.write_all(&self.buf[..n]) {
                let path = self.session.staging_path.clone();
                return Some(Err(self.fail(DownloadError::Io { path, source })));
            }

            self.session.downloaded_bytes += n as u64;
            self.chunks_since_report += 1;
            if self.chunks_since_report == CHUNKS_PER_REPORT {
                self.chunks_since_report = 0;
                return Some(Ok(self.current()));
            }
        }
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        // Abandoned mid-stream: same cleanup as a failure.
        if !self.done {
            drop(self.file.take());
            let _ = std::fs::remove_file(&self.session.staging_path);
        }
    }
}

/// Human-readable byte count in binary units ("512 B", "3.4 MiB").
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1 << 30, "GiB"), (1 << 20, "MiB"), (1 << 10, "KiB")];
    UNITS
        .iter()
        .find(|(scale, _)| bytes >= *scale)
        .map(|(scale, unit)| format!("{:.1} {unit}", bytes as f64 / *scale as f64))
        .unwrap_or_else(|| format!("{bytes} B"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Yields `ok_bytes` bytes, then fails.
    struct FailingReader {
        ok_bytes: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.ok_bytes == 0 {
                return Err(std::io::Error::new(ErrorKind::ConnectionReset, "reset by peer"));
            }
            let n = buf.len().min(self.ok_bytes);
            buf[..n].fill(7);
            self.ok_bytes -= n;
            Ok(n)
        }
    }

    struct MemorySource(Vec<u8>, bool);

    impl ArtifactSource for MemorySource {
        fn open(&self, _url: &str) -> Result<Body, DownloadError> {
            let len = self.1.then_some(self.0.len() as u64);
            Ok(Body {
                reader: Box::new(Cursor::new(self.0.clone())),
                content_length: len,
            })
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_size_matches_content_length() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("download/1.sh");
        let data = payload(5 * 1024 * 1024 + 123);

        let last = Download::start(&MemorySource(data.clone(), true), "mem://x", &dest)
            .unwrap()
            .finish()
            .unwrap();

        assert_eq!(last.downloaded, data.len() as u64);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), data.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn test_progress_is_coarse_and_monotonic() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("a.sh");
        let len = 5 * CHUNK_SIZE * CHUNKS_PER_REPORT / 2;

        let source = MemorySource(payload(len), true);
        let events: Vec<ProgressEvent> = Download::start(&source, "mem://x", &dest)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        // two 2 MiB reports plus the final one
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].downloaded <= w[1].downloaded));
        assert_eq!(events.last().unwrap().downloaded, len as u64);
        assert_eq!(events[0].downloaded, (CHUNK_SIZE * CHUNKS_PER_REPORT) as u64);
        assert_eq!(events.last().unwrap().progress(), Progress::Fraction(1.0));
    }

    #[test]
    fn test_missing_content_length_is_indeterminate() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("a.sh");

        let dl = Download::start(&MemorySource(payload(10_000), false), "mem://x", &dest).unwrap();
        assert_eq!(dl.current().progress(), Progress::Indeterminate);
        drop(dl);

        let last = Download::start(&MemorySource(payload(10_000), false), "mem://x", &dest)
            .unwrap()
            .finish()
            .unwrap();

        assert_eq!(last.total, None);
        assert_eq!(last.progress(), Progress::Indeterminate);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 10_000);
    }

    #[test]
    fn test_zero_total_does_not_divide() {
        let event = ProgressEvent {
            downloaded: 0,
            total: Some(0),
        };
        assert_eq!(event.progress(), Progress::Indeterminate);
    }

    #[test]
    fn test_empty_body() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("empty.sh");
        let events: Vec<_> = Download::start(&MemorySource(Vec::new(), true), "mem://x", &dest)
            .unwrap()
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().downloaded, 0);
        assert!(dest.exists());
    }

    #[test]
    fn test_failure_removes_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("partial.sh");

        let reader = Box::new(FailingReader { ok_bytes: 3 * CHUNK_SIZE });
        let mut dl = Download::from_reader(reader, Some(1 << 20), &dest).unwrap();
        let err = dl.next().unwrap().unwrap_err();

        assert!(matches!(err, DownloadError::Network(_)));
        assert!(!dest.exists());
        assert!(dl.next().is_none());
    }

    #[test]
    fn test_truncated_body_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("short.sh");
        let reader = Box::new(Cursor::new(payload(100)));

        let err = Download::from_reader(reader, Some(200), &dest)
            .unwrap()
            .finish()
            .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::Truncated {
                expected: 200,
                received: 100
            }
        ));
        assert!(!dest.exists());
    }

    #[test]
    fn test_abandoned_download_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("abandoned.sh");
        let len = 3 * CHUNK_SIZE * CHUNKS_PER_REPORT;
        let reader = Box::new(Cursor::new(payload(len)));

        let mut dl = Download::from_reader(reader, Some(len as u64), &dest).unwrap();
        assert!(dl.next().unwrap().is_ok());
        drop(dl);
        assert!(!dest.exists());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KiB");
        assert_eq!(format_size((CHUNK_SIZE * CHUNKS_PER_REPORT) as u64), "2.0 MiB");
        assert_eq!(format_size(3 << 29), "1.5 GiB");
    }
}
