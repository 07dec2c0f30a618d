//! Remote tile source: a single-level virtual pyramid backed by an HMAC-SHA1
//! authenticated HTTP tile server.
//!
//! Grounded on the core specification's §6 remote-tile wire protocol (the
//! Cytomine-style window-tile API the original orthanc-wsi `CytomineImage`
//! class talks to) and on `server::auth::SignedUrlAuth`'s HMAC-signing shape,
//! generalized here from HMAC-SHA256/query-string signing to HMAC-SHA1/
//! `Authorization`-header signing since the two schemes sign different
//! material.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::PyramidError;
use crate::pixel::{Compression, Image, PhotometricInterpretation, PixelFormat};

use super::{DecodedTile, TiledSource, TiledSourceLevel};

type HmacSha1 = Hmac<Sha1>;

/// Credentials for the outbound HMAC-SHA1 authorization scheme.
#[derive(Debug, Clone)]
pub struct RemoteTileAuth {
    pub public_key: String,
    pub private_key: String,
}

impl RemoteTileAuth {
    /// Builds the `Authorization` header value for a GET request to `uri`
    /// with the given content type, per §6: `"GET\n\n<MIME>\n<date>\n/<uri>"`
    /// HMAC-SHA1-signed with the private key, base64-encoded, and prefixed
    /// with the public key.
    pub fn authorize(&self, uri: &str, content_type: &str, date: SystemTime) -> Result<(String, String), PyramidError> {
        let date_header = httpdate::fmt_http_date(date);
        let key = format!("GET\n\n{}\n{}\n/{}", content_type, date_header, uri.trim_start_matches('/'));

        let mut mac = HmacSha1::new_from_slice(self.private_key.as_bytes())
            .map_err(|e| PyramidError::InternalError(format!("HMAC key error: {}", e)))?;
        mac.update(key.as_bytes());
        let signature = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, mac.finalize().into_bytes());

        let authorization = format!("CYTOMINE {}:{}", self.public_key, signature);
        Ok((authorization, date_header))
    }
}

/// A single-level pyramid fetched tile-by-tile from a remote HTTP server
/// using the `api/imageinstance/<id>/window-<x>-<y>-<w>-<h>.<ext>` URI
/// pattern. Unlike the other four sources, levels beyond level 0 do not
/// exist; callers requiring a multi-level pyramid must reconstruct one
/// (§4.6) from this single level.
pub struct RemoteTileSource {
    client: reqwest::Client,
    base_url: String,
    image_instance_id: String,
    auth: RemoteTileAuth,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    compression: Compression,
    extension: &'static str,
}

impl RemoteTileSource {
    /// Queries the remote server's metadata endpoint for the image's
    /// dimensions, then exposes it as a single-level `TiledSource`.
    pub async fn open(
        base_url: String,
        image_instance_id: String,
        auth: RemoteTileAuth,
        tile_width: u32,
        tile_height: u32,
        compression: Compression,
    ) -> Result<Self, PyramidError> {
        let client = reqwest::Client::new();
        let extension = match compression {
            Compression::Jpeg => "jpg",
            Compression::Png => "png",
            other => {
                return Err(PyramidError::NotImplemented(format!(
                    "remote tile source does not support {:?} as a wire compression",
                    other
                )))
            }
        };

        let metadata_uri = format!("api/imageinstance/{}.json", image_instance_id);
        let (width, height) = Self::fetch_dimensions(&client, &base_url, &metadata_uri, &auth).await?;

        Ok(RemoteTileSource {
            client,
            base_url,
            image_instance_id,
            auth,
            width,
            height,
            tile_width,
            tile_height,
            compression,
            extension,
        })
    }

    async fn fetch_dimensions(
        client: &reqwest::Client,
        base_url: &str,
        uri: &str,
        auth: &RemoteTileAuth,
    ) -> Result<(u32, u32), PyramidError> {
        let (authorization, date) = auth.authorize(uri, "application/json", SystemTime::now())?;
        let url = format!("{}/{}", base_url.trim_end_matches('/'), uri);

        let response = client
            .get(&url)
            .header("Authorization", authorization)
            .header("Date", date)
            .send()
            .await
            .map_err(|e| PyramidError::NetworkProtocol(format!("metadata request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PyramidError::NetworkProtocol(format!(
                "metadata request returned status {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PyramidError::NetworkProtocol(format!("metadata response is not valid JSON: {}", e)))?;

        let width = json["width"]
            .as_u64()
            .ok_or_else(|| PyramidError::NetworkProtocol("metadata missing 'width'".to_string()))? as u32;
        let height = json["height"]
            .as_u64()
            .ok_or_else(|| PyramidError::NetworkProtocol("metadata missing 'height'".to_string()))? as u32;

        Ok((width, height))
    }

    fn window_uri(&self, x: u32, y: u32, w: u32, h: u32) -> String {
        format!(
            "api/imageinstance/{}/window-{}-{}-{}-{}.{}",
            self.image_instance_id, x, y, w, h, self.extension
        )
    }

    async fn fetch_tile_bytes(&self, tile_x: u32, tile_y: u32) -> Result<Option<bytes::Bytes>, PyramidError> {
        let x = tile_x * self.tile_width;
        let y = tile_y * self.tile_height;
        if x >= self.width || y >= self.height {
            return Ok(None);
        }

        let w = self.tile_width.min(self.width - x);
        let h = self.tile_height.min(self.height - y);
        let uri = self.window_uri(x, y, w, h);
        let content_type = match self.compression {
            Compression::Jpeg => "image/jpeg",
            Compression::Png => "image/png",
            _ => "application/octet-stream",
        };

        let (authorization, date) = self.auth.authorize(&uri, content_type, SystemTime::now())?;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), uri);

        let response = self
            .client
            .get(&url)
            .header("Authorization", authorization)
            .header("Date", date)
            .send()
            .await
            .map_err(|e| PyramidError::NetworkProtocol(format!("tile request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PyramidError::NetworkProtocol(format!(
                "tile request returned status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PyramidError::NetworkProtocol(format!("tile response read failed: {}", e)))?;

        Ok(Some(bytes))
    }
}

#[async_trait]
impl TiledSource for RemoteTileSource {
    fn level_count(&self) -> u32 {
        1
    }

    fn level(&self, level: u32) -> Option<TiledSourceLevel> {
        if level != 0 {
            return None;
        }
        Some(TiledSourceLevel {
            level: 0,
            width: self.width,
            height: self.height,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            tiles_x: self.width.div_ceil(self.tile_width),
            tiles_y: self.height.div_ceil(self.tile_height),
            downsample: 1.0,
        })
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn photometric_interpretation(&self) -> PhotometricInterpretation {
        PhotometricInterpretation::Rgb
    }

    async fn read_raw_tile(
        &self,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Option<(bytes::Bytes, Compression)>, PyramidError> {
        if level != 0 {
            return Ok(None);
        }
        match self.fetch_tile_bytes(tile_x, tile_y).await? {
            Some(bytes) => Ok(Some((bytes, self.compression))),
            None => Ok(None),
        }
    }

    async fn decode_tile(&self, level: u32, tile_x: u32, tile_y: u32) -> Result<DecodedTile, PyramidError> {
        if level != 0 {
            return Err(PyramidError::ParameterOutOfRange(format!(
                "remote tile source has only level 0, got {}",
                level
            )));
        }

        match self.fetch_tile_bytes(tile_x, tile_y).await? {
            Some(bytes) => {
                let image = crate::pixel::decode_tile(&bytes, self.compression, self.tile_width, self.tile_height)?;
                Ok(DecodedTile { image, is_empty: false })
            }
            None => Ok(DecodedTile {
                image: Image::allocate(PixelFormat::Rgb24, self.tile_width, self.tile_height),
                is_empty: true,
            }),
        }
    }
}
