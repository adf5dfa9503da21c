//! Provenance-tagged data responses

use serde::{Deserialize, Serialize};

/// Where a response's data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    /// Served by the primary live source
    Live,
    /// Served by the fallback (sample or cached data)
    Mock,
    /// Request still outstanding
    Loading,
    /// Both sources failed or the request was cancelled
    Error,
}

/// Result of one arbitrated fetch
///
/// Constructed only through [`live`](Self::live), [`mock`](Self::mock),
/// [`loading`](Self::loading) and [`error`](Self::error), so `Live`/`Mock`
/// always carry data and `Error` never does.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataResponse<T> {
    data: Option<T>,
    status: DataStatus,
    error_message: Option<String>,
}

impl<T> DataResponse<T> {
    pub fn live(data: T) -> Self {
        Self {
            data: Some(data),
            status: DataStatus::Live,
            error_message: None,
        }
    }

    pub fn mock(data: T) -> Self {
        Self {
            data: Some(data),
            status: DataStatus::Mock,
            error_message: None,
        }
    }

    pub fn loading() -> Self {
        Self {
            data: None,
            status: DataStatus::Loading,
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            status: DataStatus::Error,
            error_message: Some(message.into()),
        }
    }

    pub fn status(&self) -> DataStatus {
        self.status
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.status == DataStatus::Live
    }

    /// Transform the payload, keeping status and message
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataResponse<U> {
        DataResponse {
            data: self.data.map(f),
            status: self.status,
            error_message: self.error_message,
        }
    }
}
