//! Scripted transport double for engine tests.
//!
//! Each `connect` on the factory materializes a fresh in-memory connection
//! and hands the test a [`ServerHandle`] to play the server side: inject
//! frames toward the client, observe what the client sent, and emulate the
//! close handshake (the fake peer echoes close frames like a well-behaved
//! WebSocket endpoint).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use hass_api::{
    ConnectOptions, Error, Frame, HassClient, SessionConfig, TransportFactory, TransportPair,
    TransportReader, TransportWriter,
};

/// What the fake server observed from the client.
#[derive(Debug)]
pub enum ClientMsg {
    Text(Value),
    Close { code: u16, reason: String },
}

/// The server side of one scripted connection.
pub struct ServerHandle {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<ClientMsg>,
}

impl ServerHandle {
    /// Emit one complete JSON message toward the client.
    pub fn send_json(&self, value: Value) {
        self.send_frame(Frame::Text {
            data: value.to_string(),
            end_of_message: true,
        });
    }

    /// Emit a raw text fragment, optionally leaving the message open.
    pub fn send_fragment(&self, data: &str, end_of_message: bool) {
        self.send_frame(Frame::Text {
            data: data.to_string(),
            end_of_message,
        });
    }

    pub fn send_frame(&self, frame: Frame) {
        self.to_client.send(frame).expect("client reader gone");
    }

    /// Next text message the client sent, failing the test on close or
    /// disconnect.
    pub async fn expect_text(&mut self) -> Value {
        match self.recv().await {
            Some(ClientMsg::Text(value)) => value,
            other => panic!("expected text message from client, got {other:?}"),
        }
    }

    pub async fn recv(&mut self) -> Option<ClientMsg> {
        tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .expect("timed out waiting for client message")
    }

    /// `true` if the client has sent nothing (more).
    pub fn is_idle(&mut self) -> bool {
        matches!(
            self.from_client.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        )
    }
}

/// Factory that yields one [`ServerHandle`] per `connect` call.
pub struct ScriptedFactory {
    handle_tx: mpsc::UnboundedSender<ServerHandle>,
}

pub fn scripted() -> (Arc<ScriptedFactory>, mpsc::UnboundedReceiver<ServerHandle>) {
    let (handle_tx, handle_rx) = mpsc::unbounded_channel();
    (Arc::new(ScriptedFactory { handle_tx }), handle_rx)
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn connect(&self, _url: &Url) -> Result<TransportPair, Error> {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();

        self.handle_tx
            .send(ServerHandle {
                to_client: to_client_tx.clone(),
                from_client: from_client_rx,
            })
            .map_err(|_| Error::Transport("no test server listening".into()))?;

        Ok(TransportPair {
            writer: Box::new(ScriptedWriter {
                from_client_tx,
                // Weak so that dropping the ServerHandle ends the stream
                // even while the client's writer is still alive.
                to_client_tx: to_client_tx.downgrade(),
            }),
            reader: Box::new(ScriptedReader { to_client_rx }),
        })
    }
}

struct ScriptedWriter {
    from_client_tx: mpsc::UnboundedSender<ClientMsg>,
    to_client_tx: mpsc::WeakUnboundedSender<Frame>,
}

#[async_trait]
impl TransportWriter for ScriptedWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), Error> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::Transport(e.to_string()))?;
        self.from_client_tx
            .send(ClientMsg::Text(value))
            .map_err(|_| Error::Transport("server hung up".into()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        let _ = self.from_client_tx.send(ClientMsg::Close {
            code,
            reason: reason.to_string(),
        });
        // Well-behaved peer: answer with its own close frame so the
        // client's reader observes the handshake completing.
        if let Some(tx) = self.to_client_tx.upgrade() {
            let _ = tx.send(Frame::Close {
                code: Some(code),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}

struct ScriptedReader {
    to_client_rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl TransportReader for ScriptedReader {
    async fn receive(&mut self) -> Result<Frame, Error> {
        match self.to_client_rx.recv().await {
            Some(frame) => Ok(frame),
            // Server handle dropped: stream ended without a close frame.
            None => Ok(Frame::Close {
                code: None,
                reason: String::new(),
            }),
        }
    }
}

// ── Harness helpers ──────────────────────────────────────────────────

pub const TEST_TOKEN: &str = "TEST_TOKEN";

pub fn test_config(factory: Arc<ScriptedFactory>) -> SessionConfig {
    let mut config = SessionConfig::new("ws://hass.test:8123/api/websocket", TEST_TOKEN);
    config.socket_timeout = Duration::from_millis(500);
    config.max_close_wait = Duration::from_millis(500);
    config.transport = factory;
    config
}

/// Drive the full happy-path handshake and return a `Ready` client plus
/// the server side of its connection.
pub async fn connected_client(opts: ConnectOptions) -> (HassClient, ServerHandle) {
    let (factory, mut conns) = scripted();
    let client = HassClient::new(test_config(factory));

    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.connect(opts).await })
    };

    let mut server = conns.recv().await.expect("client never dialed");
    server.send_json(serde_json::json!({ "type": "auth_required", "ha_version": "2026.7.0" }));
    let auth = server.expect_text().await;
    assert_eq!(auth["type"], "auth");
    server.send_json(serde_json::json!({ "type": "auth_ok", "ha_version": "2026.7.0" }));

    let authed = task
        .await
        .expect("connect task panicked")
        .expect("connect failed");
    assert!(authed, "handshake should succeed");

    (client, server)
}
