//! Scripted transport double for hub tests.
//!
//! Same shape as the engine-test double in `hass-api`: each `connect`
//! materializes an in-memory connection whose server side the test plays.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use hass_api::{
    Error, Frame, SessionConfig, TransportFactory, TransportPair, TransportReader,
    TransportWriter,
};

#[derive(Debug)]
pub enum ClientMsg {
    Text(Value),
    Close { code: u16, reason: String },
}

pub struct ServerHandle {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<ClientMsg>,
}

impl ServerHandle {
    pub fn send_json(&self, value: Value) {
        self.to_client
            .send(Frame::Text {
                data: value.to_string(),
                end_of_message: true,
            })
            .expect("client reader gone");
    }

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
}

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
        // Well-behaved peer: echo the close frame.
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
            None => Ok(Frame::Close {
                code: None,
                reason: String::new(),
            }),
        }
    }
}

pub fn test_session_config(factory: Arc<ScriptedFactory>) -> SessionConfig {
    let mut config = SessionConfig::new("ws://hass.test:8123/api/websocket", "TEST_TOKEN");
    config.socket_timeout = Duration::from_millis(500);
    config.max_close_wait = Duration::from_millis(500);
    config.transport = factory;
    config
}
