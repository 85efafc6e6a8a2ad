use guildgate_util::snowflake;
use serde::{Deserialize, Serialize};

pub const CHANNEL_TYPE_TEXT: u8 = 0;
pub const CHANNEL_TYPE_DM: u8 = 1;
pub const CHANNEL_TYPE_VOICE: u8 = 2;
pub const CHANNEL_TYPE_GROUP_DM: u8 = 3;
pub const CHANNEL_TYPE_CATEGORY: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(with = "snowflake::serde_id")]
    pub id: i64,
    #[serde(default, with = "snowflake::serde_opt_id")]
    pub guild_id: Option<i64>,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default, with = "snowflake::serde_opt_id")]
    pub parent_id: Option<i64>,
}

impl Channel {
    pub fn is_private(&self) -> bool {
        matches!(self.kind, CHANNEL_TYPE_DM | CHANNEL_TYPE_GROUP_DM)
    }
}
