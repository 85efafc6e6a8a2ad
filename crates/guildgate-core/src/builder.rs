use std::collections::BTreeMap;

use guildgate_models::channel::Channel;
use guildgate_models::guild::Guild;
use guildgate_models::member::Member;
use guildgate_models::role::Role;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CoreError;
use crate::setup::GuildSnapshot;

/// Domain-layer collaborator that turns accumulated setup state into a linked
/// guild aggregate.
pub trait EntityBuilder: Send + Sync {
    fn build_guild(&self, snapshot: &GuildSnapshot) -> Result<Guild, CoreError>;
}

/// Builds guilds straight from the gateway payload. Malformed channels, roles
/// and members are skipped rather than failing the whole guild.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEntityBuilder;

impl EntityBuilder for DefaultEntityBuilder {
    fn build_guild(&self, snapshot: &GuildSnapshot) -> Result<Guild, CoreError> {
        let payload = &snapshot.payload;
        if !payload.is_object() {
            return Err(CoreError::Unexpected(format!(
                "guild {} payload is not an object",
                snapshot.guild_id
            )));
        }

        let mut channels = BTreeMap::new();
        for mut channel in parse_list::<Channel>(snapshot.guild_id, payload.get("channels"), "channel") {
            channel.guild_id = Some(snapshot.guild_id);
            channels.insert(channel.id, channel);
        }

        let roles: BTreeMap<i64, Role> = parse_list::<Role>(snapshot.guild_id, payload.get("roles"), "role")
            .into_iter()
            .map(|role| (role.id, role))
            .collect();

        let mut members = BTreeMap::new();
        for (user_id, raw) in &snapshot.members {
            match serde_json::from_value::<Member>(raw.clone()) {
                Ok(member) => {
                    members.insert(*user_id, member);
                }
                Err(err) => tracing::warn!(
                    guild_id = snapshot.guild_id,
                    user_id,
                    error = %err,
                    "skipping malformed member payload"
                ),
            }
        }

        Ok(Guild {
            id: snapshot.guild_id,
            name: payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            icon: payload.get("icon").and_then(Value::as_str).map(str::to_string),
            owner_id: guildgate_util::snowflake::opt_field(payload, "owner_id"),
            member_count: snapshot.expected_member_count.max(members.len() as i64),
            channels,
            roles,
            members,
        })
    }
}

fn parse_list<T: DeserializeOwned>(guild_id: i64, value: Option<&Value>, what: &str) -> Vec<T> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(guild_id, kind = what, error = %err, "skipping malformed entity in guild payload");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::SetupKind;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn builds_linked_guild() {
        let mut members = HashMap::new();
        members.insert(10, json!({ "user": { "id": "10", "username": "a" }, "roles": ["200"] }));
        members.insert(11, json!({ "user": "broken" }));
        let snapshot = GuildSnapshot {
            guild_id: 1,
            kind: SetupKind::Join,
            payload: json!({
                "id": "1",
                "name": "guild",
                "owner_id": "10",
                "channels": [{ "id": "100", "type": 0, "name": "general" }, { "bogus": true }],
                "roles": [{ "id": "200", "name": "@everyone" }]
            }),
            members,
            expected_member_count: 2,
        };

        let guild = DefaultEntityBuilder.build_guild(&snapshot).unwrap();
        assert_eq!(guild.name, "guild");
        assert_eq!(guild.owner_id, Some(10));
        assert_eq!(guild.channels.len(), 1);
        assert_eq!(guild.channels[&100].guild_id, Some(1));
        assert_eq!(guild.roles[&200].name, "@everyone");
        assert_eq!(guild.members.len(), 1);
        assert_eq!(guild.members[&10].roles, vec![200]);
        assert_eq!(guild.member_count, 2);
    }
}
