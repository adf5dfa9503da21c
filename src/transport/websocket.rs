//! WebSocket transport
//!
//! After the handshake the socket is split: a writer task drains an unbounded
//! queue into the sink (so `send` never awaits), and a reader task turns
//! incoming text frames into [`TransportEvent::Frame`]s.
//!
//! `send` only queues. If the socket dies with updates still queued, the
//! writer reports each one as [`TransportEvent::Undelivered`] before the
//! closing error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{EventSink, TransportError, TransportEvent};
use crate::protocol::{self, SyncUpdate};

/// Item queued for the writer task
#[derive(Debug)]
enum Outbound {
    Update(SyncUpdate),
    Control(Message),
}

pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
    open: Arc<AtomicBool>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Validate the endpoint. Fails for anything that is not a `ws://` or
    /// `wss://` URL, which is what sends the connector to the polling fallback.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Result<Self, TransportError> {
        let url = url.into();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint {
                url,
                message: "expected a ws:// or wss:// URL".to_string(),
            });
        }
        if let Err(e) = url.as_str().into_client_request() {
            return Err(TransportError::InvalidEndpoint {
                url,
                message: e.to_string(),
            });
        }

        Ok(Self {
            url,
            connect_timeout,
            open: Arc::new(AtomicBool::new(false)),
            outbound: None,
            tasks: Vec::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn connect(&mut self, events: EventSink) -> Result<(), TransportError> {
        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()));
        let (ws, _response) = match handshake.await {
            Err(_) => return Err(TransportError::Timeout(self.connect_timeout)),
            Ok(Err(e)) => return Err(TransportError::Handshake(e.to_string())),
            Ok(Ok(pair)) => pair,
        };
        tracing::debug!("WebSocket handshake with {} complete", self.url);

        let (sink, mut stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel::<Outbound>();

        let writer = tokio::spawn(write_outbound(
            sink,
            rx,
            events.clone(),
            Arc::clone(&self.open),
        ));

        let reader_open = Arc::clone(&self.open);
        let pong_tx = tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Frame(text)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = pong_tx.send(Outbound::Control(Message::Pong(data)));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Closed);
                        break;
                    }
                    Some(Err(e)) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Error(TransportError::Socket(
                            e.to_string(),
                        )));
                        break;
                    }
                    Some(Ok(other)) => {
                        tracing::debug!("Ignoring non-text frame ({} bytes)", other.len());
                    }
                }
            }
        });

        self.outbound = Some(tx);
        self.tasks = vec![writer, reader];
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn send(&self, update: &SyncUpdate) -> bool {
        if !self.is_open() {
            return false;
        }
        match &self.outbound {
            Some(tx) => tx.send(Outbound::Update(update.clone())).is_ok(),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        // The writer flushes what is queued, then the close frame, then exits
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Outbound::Control(Message::Close(None)));
        }
        if let Some(reader) = self.tasks.get(1) {
            reader.abort();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Drain the outbound queue into the socket. On a write failure every update
/// that did not reach the wire is handed back as `Undelivered`, then the
/// error is reported.
async fn write_outbound<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
    open: Arc<AtomicBool>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(item) = rx.recv().await {
        let (msg, update) = match item {
            Outbound::Update(update) => match protocol::encode(&update) {
                Ok(frame) => (Message::Text(frame), Some(update)),
                Err(e) => {
                    tracing::warn!("Failed to encode update for {}: {}", update.cell_key(), e);
                    continue;
                }
            },
            Outbound::Control(msg) => (msg, None),
        };
        let closing = matches!(msg, Message::Close(_));

        if let Err(e) = sink.send(msg).await {
            open.store(false, Ordering::SeqCst);
            let error = TransportError::Socket(e.to_string());

            // Refuse new sends, then return the backlog
            rx.close();
            let stranded = update.into_iter().chain(std::iter::from_fn(|| {
                loop {
                    match rx.try_recv() {
                        Ok(Outbound::Update(update)) => return Some(update),
                        Ok(Outbound::Control(_)) => continue,
                        Err(_) => return None,
                    }
                }
            }));
            for update in stranded {
                let _ = events.send(TransportEvent::Undelivered {
                    update,
                    error: error.clone(),
                });
            }

            let _ = events.send(TransportEvent::Error(error));
            return;
        }
        if closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_http_url() {
        let err = WebSocketTransport::new("http://localhost:80/sync", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_accepts_ws_url() {
        let t = WebSocketTransport::new("ws://127.0.0.1:9850", Duration::from_secs(1)).unwrap();
        assert_eq!(t.url(), "ws://127.0.0.1:9850");
        assert!(!t.is_open());
    }

    #[test]
    fn test_send_before_connect_is_rejected() {
        let t = WebSocketTransport::new("ws://127.0.0.1:9850", Duration::from_secs(1)).unwrap();
        let update = SyncUpdate::new(
            "p1",
            "f",
            serde_json::json!(1),
            1,
            crate::protocol::UpdateSource::Editor,
        );
        assert!(!t.send(&update));
    }

    fn update(n: i64) -> SyncUpdate {
        SyncUpdate::new(
            "p1",
            "f",
            serde_json::json!(n),
            n,
            crate::protocol::UpdateSource::Editor,
        )
    }

    #[tokio::test]
    async fn test_failed_write_hands_back_queued_updates() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tx.send(Outbound::Update(update(1))).unwrap();
        tx.send(Outbound::Control(Message::Ping(Vec::new()))).unwrap();
        tx.send(Outbound::Update(update(2))).unwrap();

        let broken = Box::pin(futures_util::sink::unfold((), |(), _msg: Message| async {
            Err::<(), _>("connection reset")
        }));
        write_outbound(broken, rx, events_tx, Arc::clone(&open)).await;

        assert!(!open.load(Ordering::SeqCst));
        assert!(tx.send(Outbound::Update(update(3))).is_err());

        let mut undelivered = Vec::new();
        let mut errors = 0;
        while let Ok(event) = events_rx.try_recv() {
            match event {
                TransportEvent::Undelivered { update, error } => {
                    assert_eq!(error, TransportError::Socket("connection reset".into()));
                    undelivered.push(update.timestamp);
                }
                TransportEvent::Error(_) => {
                    assert_eq!(undelivered.len(), 2, "error must follow the backlog");
                    errors += 1;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(undelivered, vec![1, 2]);
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn test_writer_stops_after_close_frame() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let written = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&written);

        tx.send(Outbound::Update(update(1))).unwrap();
        tx.send(Outbound::Control(Message::Close(None))).unwrap();
        tx.send(Outbound::Update(update(2))).unwrap();

        let sink = Box::pin(futures_util::sink::unfold((), move |(), msg: Message| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(msg.is_close());
                Ok::<(), &str>(())
            }
        }));
        write_outbound(sink, rx, events_tx, Arc::new(AtomicBool::new(true))).await;

        assert_eq!(*written.lock(), vec![false, true]);
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_handshake_error() {
        // Bind then drop a listener to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut t =
            WebSocketTransport::new(format!("ws://127.0.0.1:{}", port), Duration::from_secs(2))
                .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = t.connect(tx).await.unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)));
        assert!(!t.is_open());
    }
}
