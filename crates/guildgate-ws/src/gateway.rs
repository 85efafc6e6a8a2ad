use std::fmt::Display;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use guildgate_core::ClientContext;
use guildgate_models::gateway::*;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::session::Session;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("gateway writer failed: {0}")]
    Send(String),
}

/// Drives one gateway connection: inbound frames go through the client
/// context, outbound requests from the setup controller go to the writer.
pub struct GatewaySession {
    ctx: Arc<ClientContext>,
    outbound: mpsc::UnboundedReceiver<GatewayMessage>,
    session: Session,
    sweep_interval: Duration,
    /// Sequence number of the last event-cache eviction.
    last_eviction: u64,
}

enum Flow {
    Continue,
    /// The connection drops but the session can be resumed.
    Resume,
    /// The session is gone; the next connection starts from READY.
    Reidentify,
}

impl GatewaySession {
    pub fn new(ctx: Arc<ClientContext>, outbound: mpsc::UnboundedReceiver<GatewayMessage>) -> Self {
        Self {
            ctx,
            outbound,
            session: Session::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            last_eviction: 0,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Continue from a previous connection's resume state.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run until the inbound stream ends or `shutdown` resolves. Returns the
    /// resume state so a later connection can pick it up.
    pub async fn run<R, W>(
        mut self,
        inbound: R,
        writer: W,
        shutdown: impl Future<Output = ()>,
    ) -> Result<Session, SessionError>
    where
        R: Stream<Item = String>,
        W: Sink<String>,
        W::Error: Display,
    {
        let mut inbound = pin!(inbound);
        let mut writer = pin!(writer);
        let mut shutdown = pin!(shutdown);
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let disconnect_reason = loop {
            tokio::select! {
                frame = inbound.next() => {
                    match frame {
                        Some(text) => match self.handle_frame(&text) {
                            Flow::Continue => {}
                            Flow::Resume => {
                                tracing::info!("gateway asked for a reconnect, keeping state for resume");
                            }
                            Flow::Reidentify => {
                                tracing::info!("gateway session invalidated, dropped connection state");
                            }
                        },
                        None => break "gateway stream ended",
                    }
                }
                Some(message) = self.outbound.recv() => {
                    send_message(&mut writer, &message).await?;
                }
                _ = sweep.tick() => {
                    self.ctx.sweep_chunk_timeouts(Instant::now());
                }
                () = &mut shutdown => {
                    break "shutdown requested";
                }
            }
        };

        // Requests produced by the last frames still belong on the wire.
        while let Ok(message) = self.outbound.try_recv() {
            send_message(&mut writer, &message).await?;
        }
        if let Err(err) = writer.close().await {
            tracing::debug!("gateway writer close failed: {err}");
        }

        tracing::info!(
            sequence = self.session.sequence,
            session_id = self.session.session_id.as_deref().unwrap_or(""),
            "gateway session ended: {disconnect_reason}"
        );
        Ok(self.session)
    }

    fn handle_frame(&mut self, text: &str) -> Flow {
        let message = match serde_json::from_str::<GatewayMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed gateway frame");
                return Flow::Continue;
            }
        };
        self.session.observe(&message);

        match message.op {
            OP_DISPATCH => {
                self.handle_dispatch(message);
                Flow::Continue
            }
            OP_RECONNECT => Flow::Resume,
            OP_INVALID_SESSION => {
                let resumable = message.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
                if resumable {
                    return Flow::Resume;
                }
                self.session.invalidate();
                self.last_eviction = 0;
                self.ctx.reset();
                Flow::Reidentify
            }
            OP_HELLO => {
                let interval = message
                    .d
                    .as_ref()
                    .and_then(|d| d.get("heartbeat_interval"))
                    .and_then(Value::as_u64);
                tracing::debug!(heartbeat_interval = ?interval, "gateway hello");
                Flow::Continue
            }
            OP_HEARTBEAT_ACK => {
                tracing::trace!("heartbeat acknowledged");
                Flow::Continue
            }
            op => {
                tracing::debug!(op, "ignoring gateway opcode");
                Flow::Continue
            }
        }
    }

    fn handle_dispatch(&mut self, message: GatewayMessage) {
        let Some(event_type) = message.t else {
            tracing::warn!("dispatch frame without event type");
            return;
        };
        let seq = message.s.unwrap_or(self.session.sequence);
        let payload = message.d.unwrap_or(Value::Null);

        if event_type == EVENT_READY {
            if let Some(session_id) = payload.get("session_id").and_then(Value::as_str) {
                self.session.set_session_id(session_id);
            }
        }

        self.ctx.dispatch(seq, &event_type, &payload);

        if seq.saturating_sub(self.last_eviction) >= self.ctx.config.eviction_threshold() {
            self.ctx.evict_stale_events(seq);
            self.last_eviction = seq;
        }
    }
}

async fn send_message<W>(writer: &mut W, message: &GatewayMessage) -> Result<(), SessionError>
where
    W: Sink<String> + Unpin,
    W::Error: Display,
{
    let text = serde_json::to_string(message)?;
    tracing::trace!(op = message.op, "sending gateway message");
    writer
        .send(text)
        .await
        .map_err(|err| SessionError::Send(err.to_string()))
}
