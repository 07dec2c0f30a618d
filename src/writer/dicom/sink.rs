//! Output sinks for serialized DICOM instance bytes: a local folder using a
//! printf-style numbered file pattern, and an Orthanc-style REST sink.
//!
//! Grounded on `ConvertConfig`'s folder/folder-pattern and
//! orthanc/username/password/proxy/timeout/verify-peers/ca-certificates
//! fields (spec §6's "DICOM REST sink" and "Output sink" paragraphs), using
//! the `reqwest` dependency already carried for the remote tile source
//! client.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::error::PyramidError;

/// Where a `DicomPyramidWriter` delivers each serialized instance once it is
/// flushed. The writer never touches a file or a socket directly.
#[async_trait]
pub trait DicomInstanceSink: Send {
    async fn write_instance(&mut self, bytes: Vec<u8>) -> Result<(), PyramidError>;
}

/// Writes instances to `folder/pattern` where `pattern` contains exactly one
/// printf-style `%0Nd` slot, numbered from 0.
pub struct FolderSink {
    folder: PathBuf,
    pattern: String,
    next_index: u32,
}

impl FolderSink {
    pub fn new(folder: PathBuf, pattern: String) -> Self {
        FolderSink { folder, pattern, next_index: 0 }
    }

    fn file_name(&self, index: u32) -> Result<String, PyramidError> {
        format_numbered_pattern(&self.pattern, index)
    }
}

#[async_trait]
impl DicomInstanceSink for FolderSink {
    async fn write_instance(&mut self, bytes: Vec<u8>) -> Result<(), PyramidError> {
        tokio::fs::create_dir_all(&self.folder)
            .await
            .map_err(|e| PyramidError::InternalError(format!("failed to create output folder: {}", e)))?;
        let name = self.file_name(self.next_index)?;
        let path = self.folder.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PyramidError::InternalError(format!("failed to write {}: {}", path.display(), e)))?;
        info!("wrote DICOM instance {}", path.display());
        self.next_index += 1;
        Ok(())
    }
}

/// Expands a pattern like `"instance-%04d.dcm"` by substituting the first
/// `%0Nd` (or bare `%d`) slot with `index`, zero-padded to `N` digits.
fn format_numbered_pattern(pattern: &str, index: u32) -> Result<String, PyramidError> {
    let Some(percent_pos) = pattern.find('%') else {
        return Err(PyramidError::ParameterOutOfRange(format!(
            "folder pattern '{}' has no '%d' numeric slot",
            pattern
        )));
    };
    let rest = &pattern[percent_pos + 1..];
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let width_str = &rest[..digits_end];
    let width: usize = if width_str.is_empty() { 0 } else { width_str.trim_start_matches('0').parse().unwrap_or(0) };
    let after_digits = &rest[digits_end..];
    if !after_digits.starts_with('d') {
        return Err(PyramidError::ParameterOutOfRange(format!(
            "folder pattern '{}' has an unsupported conversion specifier",
            pattern
        )));
    }
    let suffix = &after_digits[1..];
    Ok(format!("{}{:0width$}{}", &pattern[..percent_pos], index, suffix, width = width))
}

#[derive(Deserialize)]
struct OrthancUploadResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct OrthancInstanceInfo {
    #[serde(rename = "ParentSeries")]
    parent_series: Option<String>,
}

/// Uploads each instance to an Orthanc-style REST API: `POST /instances`
/// with the raw DICOM bytes, then (for the first upload only) `GET
/// /instances/<id>` to log the series the PACS filed it under.
pub struct OrthancSink {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    logged_series: bool,
}

pub struct OrthancSinkConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub proxy: Option<String>,
    pub timeout_seconds: u64,
    pub verify_peers: bool,
    pub ca_certificate_path: Option<PathBuf>,
}

impl OrthancSink {
    pub async fn new(config: OrthancSinkConfig) -> Result<Self, PyramidError> {
        let mut builder = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(!config.verify_peers);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| PyramidError::ParameterOutOfRange(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        if let Some(ca_path) = &config.ca_certificate_path {
            let pem = tokio::fs::read(ca_path)
                .await
                .map_err(|e| PyramidError::InternalError(format!("failed to read CA certificate: {}", e)))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| PyramidError::ParameterOutOfRange(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| PyramidError::NetworkProtocol(format!("failed to build HTTP client: {}", e)))?;

        Ok(OrthancSink {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
            logged_series: false,
        })
    }
}

#[async_trait]
impl DicomInstanceSink for OrthancSink {
    async fn write_instance(&mut self, bytes: Vec<u8>) -> Result<(), PyramidError> {
        let mut request = self.client.post(format!("{}/instances", self.base_url)).body(bytes);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PyramidError::NetworkProtocol(format!("upload to Orthanc failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PyramidError::NetworkProtocol(format!(
                "Orthanc rejected instance upload with status {}",
                response.status()
            )));
        }

        let parsed: OrthancUploadResponse = response
            .json()
            .await
            .map_err(|e| PyramidError::NetworkProtocol(format!("malformed Orthanc upload response: {}", e)))?;

        if !self.logged_series {
            self.logged_series = true;
            let info_url = format!("{}/instances/{}", self.base_url, parsed.id);
            if let Ok(info_response) = self.client.get(&info_url).send().await {
                if let Ok(info) = info_response.json::<OrthancInstanceInfo>().await {
                    info!(
                        "uploaded to Orthanc instance {} (series {})",
                        parsed.id,
                        info.parent_series.unwrap_or_else(|| "unknown".to_string())
                    );
                }
            }
        }

        Ok(())
    }
}
