//! Type-erased `RangeReader`, letting `TiledSource` implementations hold
//! whichever concrete reader (S3, local file, cached block reader) was used
//! to open them without becoming generic themselves - the enum variants in
//! `PyramidSourceInner` need one concrete type per source kind, not one per
//! reader backend.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;
use crate::io::RangeReader;

#[derive(Clone)]
pub struct DynRangeReader(pub Arc<dyn RangeReader>);

impl DynRangeReader {
    pub fn new(reader: impl RangeReader + 'static) -> Self {
        DynRangeReader(Arc::new(reader))
    }
}

#[async_trait]
impl RangeReader for DynRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.0.read_exact_at(offset, len).await
    }

    fn size(&self) -> u64 {
        self.0.size()
    }

    fn identifier(&self) -> &str {
        self.0.identifier()
    }
}
