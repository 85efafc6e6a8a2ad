use guildgate_models::gateway::GatewayMessage;

/// Resume bookkeeping for one gateway connection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: Option<String>,
    pub sequence: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sequence number carried by an inbound frame. Sequence
    /// numbers never move backwards.
    pub fn observe(&mut self, message: &GatewayMessage) {
        if let Some(seq) = message.s {
            self.sequence = self.sequence.max(seq);
        }
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    pub fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }

    /// Forget the session after the gateway refused to resume it.
    pub fn invalidate(&mut self) {
        self.session_id = None;
        self.sequence = 0;
    }
}
