//! Transport construction

use super::{PollingTransport, Transport, TransportError, WebSocketTransport};
use crate::config::TransportConfig;

/// Builds a fresh, unconnected transport for every connection attempt
pub trait Connector: Send + Sync {
    fn build(&self) -> Result<Transport, TransportError>;
}

impl<F> Connector for F
where
    F: Fn() -> Result<Transport, TransportError> + Send + Sync,
{
    fn build(&self) -> Result<Transport, TransportError> {
        self()
    }
}

/// Connector driven by [`TransportConfig`]
///
/// Prefers the WebSocket endpoint. When it is missing or cannot be
/// constructed, falls back to the polling endpoint.
#[derive(Debug, Clone)]
pub struct ConfiguredConnector {
    config: TransportConfig,
}

impl ConfiguredConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl Connector for ConfiguredConnector {
    fn build(&self) -> Result<Transport, TransportError> {
        if let Some(url) = &self.config.websocket_url {
            match WebSocketTransport::new(url.as_str(), self.config.connect_timeout()) {
                Ok(ws) => return Ok(Transport::WebSocket(ws)),
                Err(e) if self.config.polling_url.is_some() => {
                    tracing::warn!("WebSocket unavailable ({}), falling back to polling", e);
                }
                Err(e) => return Err(e),
            }
        }

        match &self.config.polling_url {
            Some(url) => Ok(Transport::Polling(PollingTransport::new(
                url.as_str(),
                self.config.poll_interval(),
                self.config.connect_timeout(),
            )?)),
            None => Err(TransportError::NotConfigured),
        }
    }
}
