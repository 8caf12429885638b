//! The two long-lived tasks of a connected session.
//!
//! Exactly one write pump and one read pump exist per session. The write
//! pump drains the bounded outbound queue and serializes one message per
//! frame; the read pump reassembles frames, parses the envelope, and
//! routes replies to pending callers and events to the event channel.
//! Either pump cancels the session token on exit so its peer unwinds.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::messages::inbound::{CommandReply, InboundKind, InboundMessage, ReplyPayload};
use crate::messages::outbound::{CommandKind, OutboundMessage};
use crate::models::{HassConfig, HassEvent, HassState};
use crate::transport::{Frame, TransportReader, TransportWriter};

/// Backoff after a transport send failure or an inbound decode failure.
/// Keeps a misbehaving peer from driving the pumps into a hot loop.
pub(crate) const ERROR_BACKOFF: Duration = Duration::from_millis(20);

/// Work items for the write pump.
pub(crate) enum WriteOp {
    Message(OutboundMessage),
    /// Emit the WebSocket close frame. Routed through the queue so the
    /// single writer stays the only task touching the send half.
    Close { code: u16, reason: String },
}

/// Pending-commands map entry: the command's kind (so the reply can be
/// typed) and the one-shot the issuing caller is parked on.
pub(crate) struct PendingCommand {
    pub kind: CommandKind,
    pub reply_tx: oneshot::Sender<Result<CommandReply, Error>>,
}

pub(crate) type PendingMap = DashMap<u64, PendingCommand>;

// ── Write pump ───────────────────────────────────────────────────────

pub(crate) async fn write_pump(
    mut writer: Box<dyn TransportWriter>,
    mut outbound_rx: mpsc::Receiver<WriteOp>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            op = outbound_rx.recv() => {
                let Some(op) = op else { break };
                match op {
                    WriteOp::Message(msg) => {
                        let text = match serde_json::to_string(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "failed to serialize outbound message");
                                continue;
                            }
                        };
                        trace!(id = ?msg.id(), len = text.len(), "sending message");
                        if let Err(e) = writer.send_text(&text).await {
                            warn!(error = %e, "websocket send failed");
                            tokio::time::sleep(ERROR_BACKOFF).await;
                            break;
                        }
                    }
                    WriteOp::Close { code, reason } => {
                        if let Err(e) = writer.close(code, &reason).await {
                            debug!(error = %e, "close frame send failed");
                            break;
                        }
                        // Stay alive until cancellation so the close
                        // handshake can finish on the reader side.
                    }
                }
            }
        }
    }
    debug!("write pump exiting");
    cancel.cancel();
}

// ── Read pump & dispatcher ───────────────────────────────────────────

pub(crate) struct ReaderContext {
    pub pending: Arc<PendingMap>,
    pub event_tx: mpsc::Sender<HassEvent>,
    pub cancel: CancellationToken,
    pub receive_buffer_bytes: usize,
}

pub(crate) async fn read_pump(mut reader: Box<dyn TransportReader>, ctx: ReaderContext) {
    let mut buf = String::with_capacity(ctx.receive_buffer_bytes);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            frame = reader.receive() => match frame {
                Ok(Frame::Text { data, end_of_message }) => {
                    buf.push_str(&data);
                    if !end_of_message {
                        continue;
                    }
                    let text = std::mem::take(&mut buf);
                    match serde_json::from_str::<InboundMessage>(&text) {
                        Ok(msg) => dispatch(msg, &ctx),
                        Err(e) => {
                            // A single bad frame never takes the reader down.
                            debug!(error = %e, "malformed inbound message");
                            tokio::time::sleep(ERROR_BACKOFF).await;
                        }
                    }
                }
                Ok(Frame::Binary { .. }) => {
                    debug!("ignoring binary frame");
                }
                Ok(Frame::Close { code, reason }) => {
                    info!(?code, %reason, "close frame received");
                    break;
                }
                Err(e) => {
                    if !ctx.cancel.is_cancelled() {
                        warn!(error = %e, "websocket receive failed");
                    }
                    break;
                }
            }
        }
    }
    debug!("read pump exiting");
    ctx.cancel.cancel();
}

fn dispatch(msg: InboundMessage, ctx: &ReaderContext) {
    match msg.kind {
        InboundKind::Event => {
            let Some(event) = msg.event else {
                debug!("event message without event payload");
                return;
            };
            // Best-effort delivery: a lagging consumer loses events rather
            // than stalling the reader.
            if let Err(mpsc::error::TrySendError::Full(_)) = ctx.event_tx.try_send(event) {
                debug!("event channel full, dropping event");
            }
        }
        InboundKind::Result | InboundKind::Pong => complete_pending(msg, ctx),
        InboundKind::AuthRequired | InboundKind::AuthOk | InboundKind::AuthInvalid => {
            debug!(kind = ?msg.kind, "unexpected auth message after handshake");
        }
        InboundKind::Unknown => {
            debug!("discarding message of unknown type");
        }
    }
}

/// Match a reply to the caller that issued its command. Late, duplicate,
/// or otherwise unknown ids have no owner and are dropped after logging.
fn complete_pending(msg: InboundMessage, ctx: &ReaderContext) {
    let Some(id) = msg.id else {
        debug!(kind = ?msg.kind, "reply without id");
        return;
    };
    let Some((_, pending)) = ctx.pending.remove(&id) else {
        debug!(id, "reply for unknown command id");
        return;
    };
    let reply = type_reply(msg, id, pending.kind);
    if pending.reply_tx.send(reply).is_err() {
        trace!(id, "caller gone before reply delivery");
    }
}

/// Decode the polymorphic `result` subtree using the command kind recorded
/// at enqueue time.
fn type_reply(msg: InboundMessage, id: u64, kind: CommandKind) -> Result<CommandReply, Error> {
    let success = msg.success;

    let payload = if msg.kind == InboundKind::Pong {
        ReplyPayload::Pong
    } else {
        match kind {
            CommandKind::GetConfig => match msg.result_value() {
                Some(raw) => ReplyPayload::Config(decode_result::<HassConfig>(raw)?),
                None => ReplyPayload::Raw(None),
            },
            CommandKind::GetStates => match msg.result_value() {
                Some(raw) => ReplyPayload::States(decode_result::<Vec<HassState>>(raw)?),
                None => ReplyPayload::Raw(None),
            },
            CommandKind::CallService | CommandKind::SubscribeEvents | CommandKind::Ping => {
                ReplyPayload::Raw(msg.result)
            }
        }
    };

    Ok(CommandReply {
        id,
        success,
        payload,
    })
}

fn decode_result<T: serde::de::DeserializeOwned>(raw: &serde_json::value::RawValue) -> Result<T, Error> {
    serde_json::from_str(raw.get()).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: raw.get().to_string(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────
