//! Backing sources for the data arbitrator
//!
//! - [`HttpSource`] - primary live source over HTTP JSON
//! - [`SampleStore`] - keyed sample payloads used as the fallback

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::SyncError;

/// Failure of a primary or fallback source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{url} returned HTTP {code}")]
    Status { code: u16, url: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid payload: {0}")]
    Decode(String),

    #[error("primary source timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

/// Primary source backed by an HTTP JSON API
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SourceError::Request(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// GET `base_url/path` and decode the JSON body.
    ///
    /// 404 maps to [`SourceError::NotFound`], any other non-2xx status to
    /// [`SourceError::Status`]. An empty collection is a success.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = self.url_for(path);
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url));
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                code: status.as_u16(),
                url,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

/// In-memory sample payloads keyed by query
#[derive(Debug, Clone, Default)]
pub struct SampleStore {
    samples: HashMap<String, serde_json::Value>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.samples.insert(key.into(), value);
    }

    /// Load samples from a JSON file holding one object of `key -> payload`
    pub fn load_from(path: &Path) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path).map_err(|e| SyncError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let samples: HashMap<String, serde_json::Value> =
            serde_json::from_str(&content).map_err(|e| SyncError::ConfigError {
                message: format!("Invalid sample file {}: {}", path.display(), e),
            })?;
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, SourceError> {
        let value = self
            .samples
            .get(key)
            .ok_or_else(|| SourceError::NotFound(format!("no sample for '{}'", key)))?;
        serde_json::from_value(value.clone()).map_err(|e| SourceError::Decode(e.to_string()))
    }
}
