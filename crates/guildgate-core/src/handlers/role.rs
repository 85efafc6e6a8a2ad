use guildgate_models::gateway::{
    EVENT_GUILD_ROLE_CREATE, EVENT_GUILD_ROLE_DELETE, EVENT_GUILD_ROLE_UPDATE,
};
use guildgate_models::role::Role;
use serde_json::Value;

use super::{id_field, nested, parse, SocketHandler};
use crate::context::ClientContext;
use crate::error::CoreError;
use crate::event_cache::CacheKind;
use crate::events::ClientEvent;

pub struct RoleCreateHandler;

impl SocketHandler for RoleCreateHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "guild_id")?;
        if ctx.controller.is_locked(guild_id) {
            return Ok(Some(guild_id));
        }
        let role: Role = parse(nested(content, "role")?)?;
        let role_id = role.id;
        let inserted = ctx.entities.with_guild_mut(guild_id, |guild| {
            guild.roles.insert(role_id, role.clone());
        });
        if inserted.is_none() {
            ctx.park(CacheKind::Guild, guild_id, seq, EVENT_GUILD_ROLE_CREATE, content);
            return Ok(None);
        }
        ctx.events.publish(ClientEvent::RoleCreate { guild_id, role });
        ctx.playback(CacheKind::Role, role_id);
        Ok(None)
    }
}

pub struct RoleUpdateHandler;

impl SocketHandler for RoleUpdateHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "guild_id")?;
        if ctx.controller.is_locked(guild_id) {
            return Ok(Some(guild_id));
        }
        let role: Role = parse(nested(content, "role")?)?;
        let role_id = role.id;
        let known = ctx.entities.with_guild_mut(guild_id, |guild| {
            match guild.roles.get_mut(&role_id) {
                Some(existing) => {
                    *existing = role.clone();
                    true
                }
                None => false,
            }
        });
        match known {
            None => ctx.park(CacheKind::Guild, guild_id, seq, EVENT_GUILD_ROLE_UPDATE, content),
            Some(false) => ctx.park(CacheKind::Role, role_id, seq, EVENT_GUILD_ROLE_UPDATE, content),
            Some(true) => ctx.events.publish(ClientEvent::RoleUpdate { guild_id, role }),
        }
        Ok(None)
    }
}

pub struct RoleDeleteHandler;

impl SocketHandler for RoleDeleteHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "guild_id")?;
        let role_id = id_field(content, "role_id")?;
        if ctx.controller.is_locked(guild_id) {
            return Ok(Some(guild_id));
        }
        let removed = ctx.entities.with_guild_mut(guild_id, |guild| {
            let removed = guild.roles.remove(&role_id).is_some();
            if removed {
                for member in guild.members.values_mut() {
                    member.roles.retain(|id| *id != role_id);
                }
            }
            removed
        });
        match removed {
            None => ctx.park(CacheKind::Guild, guild_id, seq, EVENT_GUILD_ROLE_DELETE, content),
            Some(false) => ctx.park(CacheKind::Role, role_id, seq, EVENT_GUILD_ROLE_DELETE, content),
            Some(true) => {
                ctx.event_cache.clear(CacheKind::Role, role_id);
                ctx.events.publish(ClientEvent::RoleDelete { guild_id, role_id });
            }
        }
        Ok(None)
    }
}
