use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::member::Member;
use crate::role::Role;

/// Fully assembled guild aggregate, registered in the entity cache once setup
/// completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: i64,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: Option<i64>,
    pub member_count: i64,
    pub channels: BTreeMap<i64, Channel>,
    pub roles: BTreeMap<i64, Role>,
    pub members: BTreeMap<i64, Member>,
}

impl Guild {
    pub fn channel_ids(&self) -> Vec<i64> {
        self.channels.keys().copied().collect()
    }

    pub fn role_ids(&self) -> Vec<i64> {
        self.roles.keys().copied().collect()
    }
}
