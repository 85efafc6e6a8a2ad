use dashmap::DashMap;
use guildgate_models::channel::Channel;
use guildgate_models::guild::Guild;
use guildgate_models::user::User;

/// Permanent in-memory cache of fully assembled entities.
/// Guilds only land here once their setup has completed.
pub struct EntityCache {
    guilds: DashMap<i64, Guild>,
    /// Channel id -> owning guild id, for guild channels.
    channel_index: DashMap<i64, i64>,
    private_channels: DashMap<i64, Channel>,
    users: DashMap<i64, User>,
}

impl EntityCache {
    pub fn empty() -> Self {
        EntityCache {
            guilds: DashMap::new(),
            channel_index: DashMap::new(),
            private_channels: DashMap::new(),
            users: DashMap::new(),
        }
    }

    /// Register an assembled guild, indexing its channels and member users.
    pub fn register_guild(&self, guild: Guild) {
        for channel_id in guild.channels.keys() {
            self.channel_index.insert(*channel_id, guild.id);
        }
        for member in guild.members.values() {
            self.users.insert(member.user.id, member.user.clone());
        }
        tracing::debug!(
            guild_id = guild.id,
            channels = guild.channels.len(),
            members = guild.members.len(),
            "guild registered"
        );
        self.guilds.insert(guild.id, guild);
    }

    pub fn remove_guild(&self, guild_id: i64) -> Option<Guild> {
        let (_, guild) = self.guilds.remove(&guild_id)?;
        for channel_id in guild.channels.keys() {
            self.channel_index.remove(channel_id);
        }
        Some(guild)
    }

    pub fn has_guild(&self, guild_id: i64) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    pub fn guild(&self, guild_id: i64) -> Option<Guild> {
        self.guilds.get(&guild_id).map(|g| g.clone())
    }

    /// Run `f` against the cached guild. The shard lock is held for the call,
    /// so `f` must not touch this cache.
    pub fn with_guild_mut<R>(&self, guild_id: i64, f: impl FnOnce(&mut Guild) -> R) -> Option<R> {
        self.guilds.get_mut(&guild_id).map(|mut g| f(&mut g))
    }

    pub fn guild_ids(&self) -> Vec<i64> {
        self.guilds.iter().map(|g| *g.key()).collect()
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    /// Owning guild of a cached guild channel.
    pub fn channel_guild(&self, channel_id: i64) -> Option<i64> {
        self.channel_index.get(&channel_id).map(|g| *g)
    }

    pub fn has_channel(&self, channel_id: i64) -> bool {
        self.channel_index.contains_key(&channel_id) || self.private_channels.contains_key(&channel_id)
    }

    pub fn channel(&self, channel_id: i64) -> Option<Channel> {
        if let Some(channel) = self.private_channels.get(&channel_id) {
            return Some(channel.clone());
        }
        let guild_id = self.channel_guild(channel_id)?;
        self.guilds
            .get(&guild_id)
            .and_then(|g| g.channels.get(&channel_id).cloned())
    }

    /// Insert or replace a channel. Guild channels require the guild to be cached.
    pub fn upsert_channel(&self, channel: Channel) -> bool {
        match channel.guild_id {
            None => {
                self.private_channels.insert(channel.id, channel);
                true
            }
            Some(guild_id) => {
                let channel_id = channel.id;
                let inserted = self
                    .with_guild_mut(guild_id, |g| {
                        g.channels.insert(channel_id, channel);
                    })
                    .is_some();
                if inserted {
                    self.channel_index.insert(channel_id, guild_id);
                }
                inserted
            }
        }
    }

    pub fn remove_channel(&self, channel_id: i64) -> Option<Channel> {
        if let Some((_, channel)) = self.private_channels.remove(&channel_id) {
            return Some(channel);
        }
        let (_, guild_id) = self.channel_index.remove(&channel_id)?;
        self.with_guild_mut(guild_id, |g| g.channels.remove(&channel_id))
            .flatten()
    }

    pub fn upsert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn user(&self, user_id: i64) -> Option<User> {
        self.users.get(&user_id).map(|u| u.clone())
    }

    /// Drop everything (connection-scoped state is rebuilt after a new handshake).
    pub fn clear(&self) {
        self.guilds.clear();
        self.channel_index.clear();
        self.private_channels.clear();
        self.users.clear();
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn channel(id: i64, guild_id: Option<i64>) -> Channel {
        Channel {
            id,
            guild_id,
            kind: 0,
            name: Some(format!("c{id}")),
            topic: None,
            position: None,
            parent_id: None,
        }
    }

    fn guild(id: i64) -> Guild {
        let mut channels = BTreeMap::new();
        channels.insert(10, channel(10, Some(id)));
        Guild {
            id,
            name: "g".into(),
            icon: None,
            owner_id: None,
            member_count: 0,
            channels,
            roles: BTreeMap::new(),
            members: BTreeMap::new(),
        }
    }

    #[test]
    fn register_indexes_channels() {
        let cache = EntityCache::empty();
        cache.register_guild(guild(1));
        assert!(cache.has_guild(1));
        assert_eq!(cache.channel_guild(10), Some(1));
        assert!(cache.has_channel(10));

        cache.remove_guild(1);
        assert!(!cache.has_channel(10));
    }

    #[test]
    fn guild_channel_needs_cached_guild() {
        let cache = EntityCache::empty();
        assert!(!cache.upsert_channel(channel(20, Some(2))));
        assert!(!cache.has_channel(20));

        cache.register_guild(guild(2));
        assert!(cache.upsert_channel(channel(20, Some(2))));
        assert_eq!(cache.channel(20).and_then(|c| c.name), Some("c20".into()));
        assert_eq!(cache.remove_channel(20).map(|c| c.id), Some(20));
        assert!(!cache.has_channel(20));
    }

    #[test]
    fn private_channels_need_no_guild() {
        let cache = EntityCache::empty();
        assert!(cache.upsert_channel(channel(30, None)));
        assert!(cache.has_channel(30));
        assert_eq!(cache.channel_guild(30), None);
    }
}
