//! Primary/fallback data arbitration
//!
//! ```text
//!            ┌── primary Ok ─────────────────────────► Live
//! fetch ─────┤
//!  (race)    ├── primary Err / timeout ──► fallback ─┬─ Ok ──► Mock
//!            │                                       └─ Err ─► Error (primary's message)
//!            └── cancelled ──────────────────────────► Error("cancelled")
//! ```
//!
//! The arbitrator holds no per-query state and never caches. Callers that
//! need fresh data issue a new `fetch`.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::response::DataResponse;
use super::sources::SourceError;
use crate::config::ArbitratorConfig;

/// Error message of a cancelled fetch
pub const CANCELLED: &str = "cancelled";

/// Per-call options
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub cancel: Option<CancellationToken>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: ArbitratorConfig::default().timeout(),
            cancel: None,
        }
    }
}

impl FetchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DataArbitrator {
    default_timeout: Duration,
}

impl Default for DataArbitrator {
    fn default() -> Self {
        Self::new(&ArbitratorConfig::default())
    }
}

impl DataArbitrator {
    pub fn new(config: &ArbitratorConfig) -> Self {
        Self {
            default_timeout: config.timeout(),
        }
    }

    /// Options carrying this arbitrator's configured timeout
    pub fn options(&self) -> FetchOptions {
        FetchOptions {
            timeout: self.default_timeout,
            cancel: None,
        }
    }

    /// Resolve `query` against `primary`, degrading to `fallback`.
    ///
    /// Never fails: every outcome is a [`DataResponse`].
    pub async fn fetch<'q, Q, T, P, Fut, F>(
        &self,
        query: &'q Q,
        primary: P,
        fallback: F,
        options: FetchOptions,
    ) -> DataResponse<T>
    where
        Q: ?Sized,
        P: FnOnce(&'q Q) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
        F: FnOnce(&'q Q) -> Result<T, SourceError>,
    {
        let cancel = options.cancel.unwrap_or_default();
        let timeout = options.timeout;

        let primary_error = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Fetch cancelled before primary settled");
                return DataResponse::error(CANCELLED);
            }
            outcome = tokio::time::timeout(timeout, primary(query)) => match outcome {
                Ok(Ok(data)) => return DataResponse::live(data),
                Ok(Err(e)) => e,
                Err(_) => SourceError::Timeout(timeout),
            },
        };

        if cancel.is_cancelled() {
            return DataResponse::error(CANCELLED);
        }

        tracing::warn!("Primary source failed ({}), serving fallback", primary_error);
        match fallback(query) {
            Ok(data) => DataResponse::mock(data),
            Err(fallback_error) => {
                tracing::warn!("Fallback source failed too: {}", fallback_error);
                DataResponse::error(primary_error.to_string())
            }
        }
    }

    /// Run `fetch` in the background. The receiver reads `Loading` until the
    /// fetch settles, then the settled response.
    ///
    /// Must be called from within a tokio runtime.
    pub fn track<Q, T, P, Fut, F>(
        &self,
        query: Q,
        primary: P,
        fallback: F,
        options: FetchOptions,
    ) -> watch::Receiver<DataResponse<T>>
    where
        Q: Send + Sync + 'static,
        T: Send + Sync + 'static,
        P: FnOnce(&Q) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SourceError>> + Send,
        F: FnOnce(&Q) -> Result<T, SourceError> + Send + 'static,
    {
        let (tx, rx) = watch::channel(DataResponse::loading());
        let arbitrator = self.clone();
        tokio::spawn(async move {
            let response = arbitrator.fetch(&query, primary, fallback, options).await;
            // Receiver gone means nobody is rendering this any more
            let _ = tx.send(response);
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStatus;

    #[tokio::test]
    async fn test_primary_error_falls_back() {
        let arb = DataArbitrator::default();
        let response = arb
            .fetch(
                "projects",
                |_| async { Err::<Vec<u32>, _>(SourceError::NotFound("projects".into())) },
                |_| Ok(vec![7]),
                FetchOptions::default(),
            )
            .await;
        assert_eq!(response.status(), DataStatus::Mock);
        assert_eq!(response.data(), Some(&vec![7]));
    }

    #[tokio::test]
    async fn test_error_prefers_primary_message() {
        let arb = DataArbitrator::default();
        let response = arb
            .fetch(
                "projects",
                |_| async {
                    Err::<u32, _>(SourceError::Status {
                        code: 503,
                        url: "http://api/projects".into(),
                    })
                },
                |_| Err(SourceError::Failed("no samples".into())),
                FetchOptions::default(),
            )
            .await;
        assert_eq!(response.status(), DataStatus::Error);
        assert!(response.data().is_none());
        assert_eq!(
            response.error_message(),
            Some("http://api/projects returned HTTP 503")
        );
    }

    #[tokio::test]
    async fn test_fallback_receives_query() {
        let arb = DataArbitrator::default();
        let response = arb
            .fetch(
                "workflows",
                |_| async { Err::<String, _>(SourceError::Failed("down".into())) },
                |q: &str| Ok(format!("sample:{}", q)),
                FetchOptions::default(),
            )
            .await;
        assert_eq!(response.into_data().as_deref(), Some("sample:workflows"));
    }

    #[test]
    fn test_options_use_configured_timeout() {
        let arb = DataArbitrator::new(&ArbitratorConfig { timeout_ms: 250 });
        assert_eq!(arb.options().timeout, Duration::from_millis(250));
        assert!(arb.options().cancel.is_none());
    }
}
