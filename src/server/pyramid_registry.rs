//! Maps a `seriesId` path segment to an opened [`PyramidSourceInner`],
//! memoized in [`PyramidCache`] the way the core specification's §4.7
//! DICOM pyramid cache describes: "On miss, the mutex is released while the
//! pyramid is constructed... invalidate(seriesId) drops the entry."
//!
//! Grounded on `slide::registry::SlideRegistry`'s "open once, serve many
//! reads" shape, generalized from a single S3 slide source to a directory
//! tree of DICOM series (one subdirectory per series, every file in it an
//! instance belonging to that series).

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::PyramidCache;
use crate::error::PyramidError;
use crate::pyramid::{DicomPyramidSource, PyramidSourceInner};

/// Opens and caches DICOM pyramid sources for the HTTP tile/IIIF surface.
///
/// `root` holds one subdirectory per series, named after the series
/// identifier used in request paths; every regular file directly inside a
/// series directory is treated as one DICOM instance belonging to it.
pub struct PyramidRegistry {
    root: PathBuf,
    cache: PyramidCache<PyramidSourceInner>,
}

impl PyramidRegistry {
    pub fn new(root: PathBuf) -> Self {
        PyramidRegistry { root, cache: PyramidCache::new() }
    }

    pub fn with_capacity(root: PathBuf, capacity: usize) -> Self {
        PyramidRegistry { root, cache: PyramidCache::with_capacity(capacity) }
    }

    /// Returns the pyramid for `series_id`, opening and indexing every
    /// instance in its directory on first access.
    pub async fn get(&self, series_id: &str) -> Result<Arc<PyramidSourceInner>, PyramidError> {
        if series_id.is_empty() || series_id.contains("..") || series_id.contains('/') {
            return Err(PyramidError::ParameterOutOfRange(format!(
                "invalid series id {:?}",
                series_id
            )));
        }

        let series_dir = self.root.join(series_id);
        self.cache
            .get_or_open(series_id, || async move {
                let mut paths = Vec::new();
                let mut entries = tokio::fs::read_dir(&series_dir).await.map_err(|e| {
                    PyramidError::UnknownResource(format!(
                        "series {:?} not found under {}: {}",
                        series_id,
                        series_dir.display(),
                        e
                    ))
                })?;
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| PyramidError::UnknownResource(e.to_string()))?
                {
                    let path = entry.path();
                    if path.is_file() {
                        paths.push(path);
                    }
                }
                if paths.is_empty() {
                    return Err(PyramidError::UnknownResource(format!(
                        "series {:?} contains no instances",
                        series_dir.display()
                    )));
                }
                let source = DicomPyramidSource::open(paths).await?;
                Ok(PyramidSourceInner::DicomPyramid(source))
            })
            .await
    }

    /// Drops a cached series, e.g. after a new instance has been ingested
    /// into it (core specification §3: "invalidated when a new instance is
    /// ingested into the series").
    pub async fn invalidate(&self, series_id: &str) {
        self.cache.invalidate(series_id).await;
    }
}
