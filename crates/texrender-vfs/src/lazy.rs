//! Lazily fetched files.
//!
//! A lazy file knows only where its bytes live. The length is requested on
//! first `stat` or read; content is fetched in fixed-size chunks on first
//! read of each chunk and kept for the life of the node.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{VfsError, VfsResult};

/// Chunk size used when none is given.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Source of byte ranges for a lazy file.
pub trait RangeFetcher: Send + Sync {
    /// Total length in bytes.
    fn length(&self) -> VfsResult<u64>;

    /// Bytes in `start..end`. May return fewer bytes only at end of file.
    fn fetch(&self, start: u64, end: u64) -> VfsResult<Vec<u8>>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Fetches ranges over HTTP with `Range` headers.
///
/// Servers that ignore `Range` and answer 200 are handled by slicing the
/// full body.
pub struct HttpRangeFetcher {
    url: String,
    agent: ureq::Agent,
}

impl HttpRangeFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::Agent::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RangeFetcher for HttpRangeFetcher {
    fn length(&self) -> VfsResult<u64> {
        let response = self
            .agent
            .head(&self.url)
            .call()
            .map_err(|e| VfsError::io(format!("HEAD {}: {}", self.url, e)))?;
        response
            .header("Content-Length")
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| VfsError::io(format!("no content length for {}", self.url)))
    }

    fn fetch(&self, start: u64, end: u64) -> VfsResult<Vec<u8>> {
        if end <= start {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", start, end - 1);
        let response = self
            .agent
            .get(&self.url)
            .set("Range", &range)
            .call()
            .map_err(|e| VfsError::io(format!("GET {} ({}): {}", self.url, range, e)))?;
        let partial = response.status() == 206;
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| VfsError::io(format!("read {}: {}", self.url, e)))?;
        if partial {
            return Ok(body);
        }
        let from = (start as usize).min(body.len());
        let to = (end as usize).min(body.len());
        Ok(body[from..to].to_vec())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Fetches ranges from a file on the host filesystem.
pub struct FileRangeFetcher {
    path: PathBuf,
}

impl FileRangeFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RangeFetcher for FileRangeFetcher {
    fn length(&self) -> VfsResult<u64> {
        std::fs::metadata(&self.path)
            .map(|meta| meta.len())
            .map_err(|e| VfsError::io(format!("{}: {}", self.path.display(), e)))
    }

    fn fetch(&self, start: u64, end: u64) -> VfsResult<Vec<u8>> {
        let io_err = |e: std::io::Error| VfsError::io(format!("{}: {}", self.path.display(), e));
        let mut file = File::open(&self.path).map_err(io_err)?;
        file.seek(SeekFrom::Start(start)).map_err(io_err)?;
        let mut buf = Vec::new();
        file.take(end.saturating_sub(start))
            .read_to_end(&mut buf)
            .map_err(io_err)?;
        Ok(buf)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Content of a lazy node.
pub(crate) struct LazyFile {
    fetcher: Box<dyn RangeFetcher>,
    chunk_size: u64,
    length: OnceLock<u64>,
    chunks: Mutex<HashMap<u64, Vec<u8>>>,
}

impl LazyFile {
    pub fn new(fetcher: Box<dyn RangeFetcher>, chunk_size: u64) -> Self {
        Self {
            fetcher,
            chunk_size: chunk_size.max(1),
            length: OnceLock::new(),
            chunks: Mutex::new(HashMap::new()),
        }
    }

    pub fn length(&self) -> VfsResult<u64> {
        if let Some(len) = self.length.get() {
            return Ok(*len);
        }
        let len = self.fetcher.length()?;
        debug!(source = %self.fetcher.describe(), len, "lazy file length");
        Ok(*self.length.get_or_init(|| len))
    }

    /// Number of chunks fetched so far.
    pub fn cached_chunks(&self) -> usize {
        self.chunks.lock().len()
    }

    fn with_chunk<R>(&self, index: u64, f: impl FnOnce(&[u8]) -> R) -> VfsResult<R> {
        let mut chunks = self.chunks.lock();
        if let Some(chunk) = chunks.get(&index) {
            return Ok(f(chunk));
        }
        let length = self.length()?;
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(length);
        let bytes = self.fetcher.fetch(start, end)?;
        debug!(source = %self.fetcher.describe(), index, len = bytes.len(), "fetched chunk");
        let result = f(&bytes);
        chunks.insert(index, bytes);
        Ok(result)
    }

    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let length = self.length()?;
        if pos >= length {
            return Ok(0);
        }
        let end = (pos + buf.len() as u64).min(length);
        let mut written = 0usize;
        let mut offset = pos;
        while offset < end {
            let index = offset / self.chunk_size;
            let within = (offset % self.chunk_size) as usize;
            let want = (end - offset) as usize;
            let copied = self.with_chunk(index, |chunk| {
                let available = chunk.len().saturating_sub(within);
                let n = available.min(want);
                buf[written..written + n].copy_from_slice(&chunk[within..within + n]);
                n
            })?;
            if copied == 0 {
                break;
            }
            written += copied;
            offset += copied as u64;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        data: Vec<u8>,
        fetches: Arc<AtomicUsize>,
    }

    impl RangeFetcher for CountingFetcher {
        fn length(&self) -> VfsResult<u64> {
            Ok(self.data.len() as u64)
        }

        fn fetch(&self, start: u64, end: u64) -> VfsResult<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.data[start as usize..end as usize].to_vec())
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }

    fn lazy(data: &[u8], chunk: u64) -> (LazyFile, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let fetcher = CountingFetcher {
            data: data.to_vec(),
            fetches: fetches.clone(),
        };
        (LazyFile::new(Box::new(fetcher), chunk), fetches)
    }

    #[test]
    fn test_read_spans_chunks() {
        let (file, fetches) = lazy(b"0123456789", 4);
        let mut buf = [0u8; 6];
        assert_eq!(file.read_at(2, &mut buf).ok(), Some(6));
        assert_eq!(&buf, b"234567");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_chunks_are_cached() {
        let (file, fetches) = lazy(b"0123456789", 4);
        let mut buf = [0u8; 3];
        file.read_at(0, &mut buf).ok();
        file.read_at(1, &mut buf).ok();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(file.cached_chunks(), 1);
    }

    #[test]
    fn test_read_past_end() {
        let (file, _) = lazy(b"abc", 2);
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(1, &mut buf).ok(), Some(2));
        assert_eq!(&buf[..2], b"bc");
        assert_eq!(file.read_at(3, &mut buf).ok(), Some(0));
    }

    #[test]
    fn test_file_fetcher() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("font.pfb");
        std::fs::write(&path, b"glyph data").expect("write");
        let fetcher = FileRangeFetcher::new(&path);
        assert_eq!(fetcher.length().ok(), Some(10));
        assert_eq!(fetcher.fetch(6, 10).ok(), Some(b"data".to_vec()));
        assert_eq!(fetcher.fetch(6, 100).ok(), Some(b"data".to_vec()));
    }
}
