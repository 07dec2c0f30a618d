//! S3-backed slide source implementation.
//!
//! This module provides an implementation of `SlideSource` that creates
//! `S3RangeReader` instances for slides stored in S3 or S3-compatible storage.

use async_trait::async_trait;
use aws_sdk_s3::Client;

use crate::error::IoError;
use crate::io::S3RangeReader;

use super::registry::is_slide_file;
use super::{SlideListResult, SlideSource};

/// S3-backed implementation of `SlideSource`.
///
/// Creates `S3RangeReader` instances for slides stored in an S3 bucket.
/// The slide ID is used as the object key within the bucket.
///
/// # Example
///
/// ```ignore
/// use wsi_pyramid::slide::S3SlideSource;
/// use wsi_pyramid::io::create_s3_client;
///
/// let client = create_s3_client(None).await;
/// let source = S3SlideSource::new(client, "my-bucket".to_string());
///
/// // The slide ID "slides/example.svs" becomes the S3 key
/// let reader = source.create_reader("slides/example.svs").await?;
/// ```
#[derive(Clone)]
pub struct S3SlideSource {
    client: Client,
    bucket: String,
}

impl S3SlideSource {
    /// Create a new S3SlideSource for the given bucket.
    ///
    /// # Arguments
    /// * `client` - AWS S3 client to use for requests
    /// * `bucket` - S3 bucket name containing the slides
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Maximum slides returned in a single `list_slides` page, regardless of
/// the caller's requested limit.
const MAX_LIST_LIMIT: u32 = 1000;

#[async_trait]
impl SlideSource for S3SlideSource {
    type Reader = S3RangeReader;

    async fn create_reader(&self, slide_id: &str) -> Result<Self::Reader, IoError> {
        S3RangeReader::new(self.client.clone(), self.bucket.clone(), slide_id.to_string()).await
    }

    /// List slide objects in the bucket, filtered to supported extensions.
    ///
    /// `limit` is clamped to `MAX_LIST_LIMIT`. `cursor`, when present, is
    /// passed through as an S3 continuation token from a previous page.
    async fn list_slides(
        &self,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<SlideListResult, IoError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);

        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(limit as i32);

        if let Some(token) = cursor {
            request = request.continuation_token(token);
        }

        let output = request
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;

        let mut slides: Vec<String> = output
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .filter(|key| is_slide_file(key))
            .map(|key| key.to_string())
            .collect();
        slides.sort();

        let next_cursor = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(|s| s.to_string())
        } else {
            None
        };

        Ok(SlideListResult { slides, next_cursor })
    }
}
