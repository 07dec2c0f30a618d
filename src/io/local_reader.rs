//! Local-filesystem implementation of [`RangeReader`], used by the
//! conversion pipeline (§4.9) to open a TIFF/SVS file straight off disk
//! without going through the S3-backed serving path's block cache.
//!
//! Grounded on `S3RangeReader`: same trait, same "fetch size once at open,
//! then serve positioned reads" shape, but each read reopens the file and
//! seeks rather than issuing an HTTP range request, so there is no
//! connection state worth caching between calls.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::RangeReader;
use crate::error::IoError;

#[derive(Clone)]
pub struct LocalFileRangeReader {
    path: PathBuf,
    size: u64,
    identifier: String,
}

impl LocalFileRangeReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IoError> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)
            .map_err(|_| IoError::NotFound(path.display().to_string()))?;
        let identifier = format!("file://{}", path.display());
        Ok(LocalFileRangeReader { path, size: metadata.len(), identifier })
    }
}

#[async_trait]
impl RangeReader for LocalFileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset + len as u64 > self.size {
            return Err(IoError::RangeOutOfBounds { offset, requested: len as u64, size: self.size });
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_range(&path, offset, len))
            .await
            .map_err(|e| IoError::Connection(format!("local file read task panicked: {}", e)))?
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

fn read_range(path: &Path, offset: u64, len: usize) -> Result<Bytes, IoError> {
    let mut file = std::fs::File::open(path).map_err(|e| IoError::Connection(e.to_string()))?;
    file.seek(SeekFrom::Start(offset)).map_err(|e| IoError::Connection(e.to_string()))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).map_err(|e| IoError::Connection(e.to_string()))?;
    Ok(Bytes::from(buf))
}
