use guildgate_models::gateway::GatewayMessage;
use tokio::sync::mpsc;

/// Fire-and-forget outbound path to the gateway connection.
pub trait GatewaySink: Send + Sync {
    fn send(&self, message: GatewayMessage);
}

/// Sink backed by an unbounded channel; the session loop owns the receiver
/// and writes the messages to the socket.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<GatewayMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewayMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl GatewaySink for ChannelSink {
    fn send(&self, message: GatewayMessage) {
        if self.tx.send(message).is_err() {
            tracing::warn!("gateway writer is gone, dropping outbound message");
        }
    }
}
