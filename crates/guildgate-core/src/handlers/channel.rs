use guildgate_models::channel::Channel;
use guildgate_models::gateway::{EVENT_CHANNEL_CREATE, EVENT_CHANNEL_DELETE, EVENT_CHANNEL_UPDATE};
use serde_json::Value;

use super::{parse, SocketHandler};
use crate::context::ClientContext;
use crate::error::CoreError;
use crate::event_cache::CacheKind;
use crate::events::ClientEvent;

pub struct ChannelCreateHandler;

impl SocketHandler for ChannelCreateHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let channel: Channel = parse(content)?;
        if let Some(guild_id) = channel.guild_id {
            if ctx.controller.is_locked(guild_id) {
                return Ok(Some(guild_id));
            }
        }
        let channel_id = channel.id;
        if !ctx.entities.upsert_channel(channel.clone()) {
            if let Some(guild_id) = channel.guild_id {
                ctx.park(CacheKind::Guild, guild_id, seq, EVENT_CHANNEL_CREATE, content);
            }
            return Ok(None);
        }
        ctx.events.publish(ClientEvent::ChannelCreate { channel });
        ctx.playback(CacheKind::Channel, channel_id);
        Ok(None)
    }
}

pub struct ChannelUpdateHandler;

impl SocketHandler for ChannelUpdateHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let channel: Channel = parse(content)?;
        if let Some(guild_id) = channel.guild_id {
            if ctx.controller.is_locked(guild_id) {
                return Ok(Some(guild_id));
            }
        }
        if !ctx.entities.has_channel(channel.id) {
            ctx.park(CacheKind::Channel, channel.id, seq, EVENT_CHANNEL_UPDATE, content);
            return Ok(None);
        }
        ctx.entities.upsert_channel(channel.clone());
        ctx.events.publish(ClientEvent::ChannelUpdate { channel });
        Ok(None)
    }
}

pub struct ChannelDeleteHandler;

impl SocketHandler for ChannelDeleteHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let channel: Channel = parse(content)?;
        if let Some(guild_id) = channel.guild_id {
            if ctx.controller.is_locked(guild_id) {
                return Ok(Some(guild_id));
            }
        }
        if ctx.entities.remove_channel(channel.id).is_none() {
            ctx.park(CacheKind::Channel, channel.id, seq, EVENT_CHANNEL_DELETE, content);
            return Ok(None);
        }
        ctx.event_cache.clear(CacheKind::Channel, channel.id);
        ctx.events.publish(ClientEvent::ChannelDelete {
            guild_id: channel.guild_id,
            channel_id: channel.id,
        });
        Ok(None)
    }
}
