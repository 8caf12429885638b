//! Transport capability set and the default `tokio-tungstenite` provider.
//!
//! The session engine never talks to a WebSocket library directly; it works
//! against the small trait surface below so tests can substitute a scripted
//! double. The default provider performs the upgrade with
//! [`tokio_tungstenite::connect_async`] and splits the stream into
//! independently-owned writer/reader halves, one per pump.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;

/// A single received WebSocket frame.
///
/// Text and binary frames carry `end_of_message`; the reader pump
/// concatenates text fragments until it sees `end_of_message = true`.
/// The default provider always delivers complete messages, but scripted
/// transports may fragment to exercise reassembly.
#[derive(Debug, Clone)]
pub enum Frame {
    Text { data: String, end_of_message: bool },
    Binary { data: Vec<u8>, end_of_message: bool },
    Close { code: Option<u16>, reason: String },
}

/// Both halves of a freshly-upgraded connection.
///
/// The writer half goes to the write pump, the reader half to the read
/// pump; neither is shared. Connection state is conveyed through
/// `receive()` results (`Frame::Close`, `Err`) rather than polled.
pub struct TransportPair {
    pub writer: Box<dyn TransportWriter>,
    pub reader: Box<dyn TransportReader>,
}

/// Produces connected transports. Swapped for a test double in tests.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Perform the WebSocket upgrade against `url`.
    async fn connect(&self, url: &Url) -> Result<TransportPair, Error>;
}

/// Send half of a connection. Owned exclusively by the write pump.
#[async_trait]
pub trait TransportWriter: Send {
    /// Send one complete text message.
    async fn send_text(&mut self, text: &str) -> Result<(), Error>;

    /// Initiate a half-close. The peer is expected to answer with its own
    /// close frame, observable on the reader half.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error>;
}

/// Receive half of a connection. Owned exclusively by the read pump.
#[async_trait]
pub trait TransportReader: Send {
    /// Receive the next frame. A stream that ends without a close frame
    /// is reported as `Frame::Close` with no code.
    async fn receive(&mut self) -> Result<Frame, Error>;
}

// ── Default tungstenite provider ─────────────────────────────────────

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Factory backed by [`tokio_tungstenite::connect_async`].
///
/// TLS (for `wss://`) is handled by the library's connector; the session
/// never configures it beyond choosing the URL scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteFactory;

#[async_trait]
impl TransportFactory for TungsteniteFactory {
    async fn connect(&self, url: &Url) -> Result<TransportPair, Error> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let (sink, source) = stream.split();
        Ok(TransportPair {
            writer: Box::new(TungsteniteWriter { sink }),
            reader: Box::new(TungsteniteReader { source }),
        })
    }
}

struct TungsteniteWriter {
    sink: WsSink,
}

#[async_trait]
impl TransportWriter for TungsteniteWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), Error> {
        self.sink
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

struct TungsteniteReader {
    source: WsSource,
}

#[async_trait]
impl TransportReader for TungsteniteReader {
    async fn receive(&mut self) -> Result<Frame, Error> {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Text(text))) => {
                    // tungstenite reassembles fragments internally, so every
                    // delivered message is complete.
                    return Ok(Frame::Text {
                        data: text.to_string(),
                        end_of_message: true,
                    });
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Frame::Binary {
                        data: data.to_vec(),
                        end_of_message: true,
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return Ok(Frame::Close { code, reason });
                }
                // Ping/Pong control frames: the library answers pings itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::Transport(e.to_string())),
                None => {
                    return Ok(Frame::Close {
                        code: None,
                        reason: String::new(),
                    })
                }
            }
        }
    }
}
