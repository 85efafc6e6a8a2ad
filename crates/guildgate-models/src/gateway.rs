use guildgate_util::snowflake;
use serde::{Deserialize, Serialize};

// Client -> Server opcodes
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_PRESENCE_UPDATE: u8 = 3;
pub const OP_VOICE_STATE_UPDATE: u8 = 4;
pub const OP_RESUME: u8 = 6;
pub const OP_REQUEST_GUILD_MEMBERS: u8 = 8;
pub const OP_GUILD_SYNC: u8 = 12;

// Server -> Client opcodes
pub const OP_DISPATCH: u8 = 0;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

/// Gateway ceiling on guild ids per member-chunk or sync request.
pub const MAX_GUILDS_PER_REQUEST: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayMessage {
    pub fn dispatch(seq: u64, event_type: &str, d: serde_json::Value) -> Self {
        Self {
            op: OP_DISPATCH,
            d: Some(d),
            s: Some(seq),
            t: Some(event_type.to_string()),
        }
    }
}

// Dispatch event names
pub const EVENT_READY: &str = "READY";
pub const EVENT_RESUMED: &str = "RESUMED";

// Guild events
pub const EVENT_GUILD_CREATE: &str = "GUILD_CREATE";
pub const EVENT_GUILD_SYNC: &str = "GUILD_SYNC";
pub const EVENT_GUILD_UPDATE: &str = "GUILD_UPDATE";
pub const EVENT_GUILD_DELETE: &str = "GUILD_DELETE";
pub const EVENT_GUILD_MEMBER_ADD: &str = "GUILD_MEMBER_ADD";
pub const EVENT_GUILD_MEMBER_REMOVE: &str = "GUILD_MEMBER_REMOVE";
pub const EVENT_GUILD_MEMBER_UPDATE: &str = "GUILD_MEMBER_UPDATE";
pub const EVENT_GUILD_MEMBERS_CHUNK: &str = "GUILD_MEMBERS_CHUNK";
pub const EVENT_GUILD_ROLE_CREATE: &str = "GUILD_ROLE_CREATE";
pub const EVENT_GUILD_ROLE_UPDATE: &str = "GUILD_ROLE_UPDATE";
pub const EVENT_GUILD_ROLE_DELETE: &str = "GUILD_ROLE_DELETE";

// Channel events
pub const EVENT_CHANNEL_CREATE: &str = "CHANNEL_CREATE";
pub const EVENT_CHANNEL_UPDATE: &str = "CHANNEL_UPDATE";
pub const EVENT_CHANNEL_DELETE: &str = "CHANNEL_DELETE";

// Message events
pub const EVENT_MESSAGE_CREATE: &str = "MESSAGE_CREATE";

/// Outbound op 8 payload. An empty query with limit 0 asks for every member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGuildMembers {
    #[serde(with = "snowflake::serde_id_vec")]
    pub guild_id: Vec<i64>,
    pub query: String,
    pub limit: u32,
}

impl RequestGuildMembers {
    pub fn all_members(guild_ids: Vec<i64>) -> Self {
        Self {
            guild_id: guild_ids,
            query: String::new(),
            limit: 0,
        }
    }

    pub fn into_message(self) -> GatewayMessage {
        GatewayMessage {
            op: OP_REQUEST_GUILD_MEMBERS,
            d: serde_json::to_value(self).ok(),
            s: None,
            t: None,
        }
    }
}

/// Outbound op 12 payload: a bare array of guild ids to sync.
pub fn guild_sync_message(guild_ids: &[i64]) -> GatewayMessage {
    let ids: Vec<String> = guild_ids.iter().map(|id| (*id as u64).to_string()).collect();
    GatewayMessage {
        op: OP_GUILD_SYNC,
        d: Some(serde_json::json!(ids)),
        s: None,
        t: None,
    }
}

/// Inbound GUILD_MEMBERS_CHUNK body. Members stay raw; the setup node keeps
/// member payloads as delivered until the guild is built.
#[derive(Debug, Clone, Deserialize)]
pub struct MembersChunk {
    #[serde(with = "snowflake::serde_id")]
    pub guild_id: i64,
    #[serde(default)]
    pub members: Vec<serde_json::Value>,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    #[serde(default)]
    pub chunk_count: Option<u32>,
}

impl MembersChunk {
    /// Whether the sender marked this as the final chunk for the guild.
    pub fn is_last(&self) -> bool {
        match (self.chunk_index, self.chunk_count) {
            (Some(index), Some(count)) => index + 1 >= count,
            _ => false,
        }
    }
}
