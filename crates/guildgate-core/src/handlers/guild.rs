use guildgate_models::gateway::EVENT_GUILD_UPDATE;
use guildgate_util::snowflake;
use serde_json::Value;
use tracing::debug;

use super::{id_field, SocketHandler};
use crate::context::ClientContext;
use crate::error::CoreError;
use crate::event_cache::CacheKind;
use crate::events::ClientEvent;

fn is_unavailable(content: &Value) -> bool {
    content
        .get("unavailable")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub struct GuildCreateHandler;

impl SocketHandler for GuildCreateHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        _seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "id")?;
        if ctx.entities.has_guild(guild_id) && !ctx.controller.is_locked(guild_id) {
            debug!(guild_id, "ignoring create for a guild that is already cached");
            return Ok(None);
        }
        ctx.apply(ctx.controller.on_guild_appears(guild_id, content));
        Ok(None)
    }
}

/// GUILD_SYNC (user accounts): second half of the guild payload.
pub struct GuildSyncHandler;

impl SocketHandler for GuildSyncHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        _seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "id")?;
        match ctx.controller.on_sync(guild_id, content) {
            Some(outcome) => ctx.apply(outcome),
            None => debug!(guild_id, "received sync for a guild that is not being set up"),
        }
        Ok(None)
    }
}

pub struct GuildUpdateHandler;

impl SocketHandler for GuildUpdateHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "id")?;
        if ctx.controller.is_locked(guild_id) {
            return Ok(Some(guild_id));
        }
        let updated = ctx.entities.with_guild_mut(guild_id, |guild| {
            if let Some(name) = content.get("name").and_then(Value::as_str) {
                guild.name = name.to_string();
            }
            if let Some(icon) = content.get("icon") {
                guild.icon = icon.as_str().map(str::to_string);
            }
            if let Some(owner_id) = snowflake::opt_field(content, "owner_id") {
                guild.owner_id = Some(owner_id);
            }
            guild.name.clone()
        });
        match updated {
            Some(name) => ctx.events.publish(ClientEvent::GuildUpdate { guild_id, name }),
            None => ctx.park(CacheKind::Guild, guild_id, seq, EVENT_GUILD_UPDATE, content),
        }
        Ok(None)
    }
}

pub struct GuildDeleteHandler;

impl SocketHandler for GuildDeleteHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        _seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "id")?;
        let unavailable = is_unavailable(content);

        if let Some(outcome) = ctx.controller.on_guild_removed(guild_id, unavailable) {
            ctx.apply(outcome);
            return Ok(None);
        }

        if let Some(guild) = ctx.entities.remove_guild(guild_id) {
            if unavailable {
                debug!(guild_id, "guild became unavailable");
                ctx.controller.mark_unavailable(guild_id);
                ctx.events.publish(ClientEvent::GuildUnavailable { guild_id });
            } else {
                ctx.event_cache.clear(CacheKind::Guild, guild_id);
                for channel_id in guild.channel_ids() {
                    ctx.event_cache.clear(CacheKind::Channel, channel_id);
                }
                for role_id in guild.role_ids() {
                    ctx.event_cache.clear(CacheKind::Role, role_id);
                }
                ctx.events.publish(ClientEvent::GuildLeave { guild_id });
            }
            return Ok(None);
        }

        if !unavailable && ctx.controller.forget_unavailable(guild_id) {
            debug!(guild_id, "left a guild while it was unavailable");
            ctx.event_cache.clear(CacheKind::Guild, guild_id);
            ctx.events.publish(ClientEvent::GuildLeave { guild_id });
            return Ok(None);
        }

        debug!(guild_id, unavailable, "guild delete for unknown guild, treating as duplicate");
        Ok(None)
    }
}
