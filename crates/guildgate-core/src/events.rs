use guildgate_models::channel::Channel;
use guildgate_models::member::Member;
use guildgate_models::role::Role;
use serde::Serialize;
use tokio::sync::broadcast;

/// Typed events handed to the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Every guild listed in the handshake has been resolved.
    GatewayReady { guild_count: usize },
    Resumed,
    /// A handshake guild finished setup.
    GuildReady { guild_id: i64 },
    /// The bot was added to a guild at runtime.
    GuildJoin { guild_id: i64 },
    /// A guild came back after an outage.
    GuildAvailable { guild_id: i64 },
    GuildUnavailable { guild_id: i64 },
    /// A guild was joined while it was unavailable; it will be set up once it
    /// becomes available.
    UnavailableGuildJoined { guild_id: i64 },
    GuildLeave { guild_id: i64 },
    GuildUpdate { guild_id: i64, name: String },
    MemberJoin { guild_id: i64, member: Member },
    MemberUpdate { guild_id: i64, member: Member },
    MemberLeave { guild_id: i64, user_id: i64 },
    ChannelCreate { channel: Channel },
    ChannelUpdate { channel: Channel },
    ChannelDelete { guild_id: Option<i64>, channel_id: i64 },
    RoleCreate { guild_id: i64, role: Role },
    RoleUpdate { guild_id: i64, role: Role },
    RoleDelete { guild_id: i64, role_id: i64 },
    MessageReceived {
        guild_id: Option<i64>,
        channel_id: i64,
        message_id: i64,
        author_id: Option<i64>,
        content: String,
    },
}

impl ClientEvent {
    pub fn guild_id(&self) -> Option<i64> {
        match self {
            ClientEvent::GatewayReady { .. } | ClientEvent::Resumed => None,
            ClientEvent::GuildReady { guild_id }
            | ClientEvent::GuildJoin { guild_id }
            | ClientEvent::GuildAvailable { guild_id }
            | ClientEvent::GuildUnavailable { guild_id }
            | ClientEvent::UnavailableGuildJoined { guild_id }
            | ClientEvent::GuildLeave { guild_id }
            | ClientEvent::GuildUpdate { guild_id, .. }
            | ClientEvent::MemberJoin { guild_id, .. }
            | ClientEvent::MemberUpdate { guild_id, .. }
            | ClientEvent::MemberLeave { guild_id, .. }
            | ClientEvent::RoleCreate { guild_id, .. }
            | ClientEvent::RoleUpdate { guild_id, .. }
            | ClientEvent::RoleDelete { guild_id, .. } => Some(*guild_id),
            ClientEvent::ChannelCreate { channel } | ClientEvent::ChannelUpdate { channel } => {
                channel.guild_id
            }
            ClientEvent::ChannelDelete { guild_id, .. }
            | ClientEvent::MessageReceived { guild_id, .. } => *guild_id,
        }
    }
}

/// Broadcast-based event bus for application delivery.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: ClientEvent) {
        tracing::trace!(event = ?event, "publishing client event");
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
