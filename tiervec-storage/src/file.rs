//! Flat-file storage backend

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use tiervec_common::error::{Error, Result};
use tiervec_common::metrics::LatencyTimer;
use tiervec_common::types::VectorId;

use crate::backend::StorageBackend;
use crate::stats::{IoStats, IoStatsSnapshot};

/// Flat binary file of fixed-dimension records, little-endian f32.
///
/// Record `i` starts at byte offset `i * dimension * 4`; there is no header.
/// The file is single-writer; one mutex serializes all positional I/O.
pub struct FileBackend {
    inner: Mutex<FileInner>,
    stats: IoStats,
    path: PathBuf,
}

struct FileInner {
    file: File,
    dimension: usize,
}

impl FileBackend {
    /// Open (or create) the backing file.
    ///
    /// Pass `dimension = 0` to adopt the dimension from the first write.
    pub fn open<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;

        debug!(path = %path.as_ref().display(), dimension, "opened flat vector file");

        Ok(Self {
            inner: Mutex::new(FileInner { file, dimension }),
            stats: IoStats::new(),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of whole records currently in the file
    pub fn num_records(&self) -> Result<u64> {
        let inner = self.inner.lock();
        if inner.dimension == 0 {
            return Ok(0);
        }
        let len = inner.file.metadata()?.len();
        Ok(len / (inner.dimension as u64 * 4))
    }

    fn read_record(&self, id: VectorId) -> Result<Vec<f32>> {
        let mut inner = self.inner.lock();
        let dim = inner.dimension;
        if dim == 0 {
            return Err(Error::NotFound(id));
        }

        let record_bytes = dim * 4;
        let offset = id
            .checked_mul(record_bytes as u64)
            .ok_or(Error::NotFound(id))?;
        let len = inner.file.metadata()?.len();
        if offset + record_bytes as u64 > len {
            return Err(Error::NotFound(id));
        }

        let mut buf = vec![0u8; record_bytes];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut buf)?;

        Ok(buf
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

impl StorageBackend for FileBackend {
    fn dimension(&self) -> usize {
        self.inner.lock().dimension
    }

    fn read_node(&self, id: VectorId) -> Result<Vec<f32>> {
        let timer = LatencyTimer::start();
        match self.read_record(id) {
            Ok(vector) => {
                self.stats
                    .record_read(vector.len() as u64 * 4, timer.elapsed_us() as u64);
                Ok(vector)
            }
            Err(e) => {
                self.stats.record_error();
                Err(e)
            }
        }
    }

    fn write_node(&self, id: VectorId, vector: &[f32]) -> Result<()> {
        let timer = LatencyTimer::start();
        let mut inner = self.inner.lock();
        if inner.dimension == 0 {
            inner.dimension = vector.len();
        } else if vector.len() != inner.dimension {
            return Err(Error::DimensionMismatch {
                expected: inner.dimension,
                actual: vector.len(),
            });
        }

        let record_bytes = inner.dimension * 4;
        let offset = id
            .checked_mul(record_bytes as u64)
            .ok_or_else(|| Error::InvalidParameter(format!("node id {} out of range", id)))?;

        let mut buf = Vec::with_capacity(record_bytes);
        for value in vector {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&buf)?;
        drop(inner);

        self.stats
            .record_write(record_bytes as u64, timer.elapsed_us() as u64);
        Ok(())
    }

    fn stats(&self) -> IoStatsSnapshot {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }
}
