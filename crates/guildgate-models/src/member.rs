use chrono::{DateTime, Utc};
use guildgate_util::snowflake;
use serde::{Deserialize, Serialize};

use crate::user::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default, with = "snowflake::serde_id_vec")]
    pub roles: Vec<i64>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
}

impl Member {
    pub fn user_id(&self) -> i64 {
        self.user.id
    }
}
