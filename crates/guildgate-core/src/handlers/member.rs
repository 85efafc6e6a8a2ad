use guildgate_models::gateway::{
    MembersChunk, EVENT_GUILD_MEMBER_ADD, EVENT_GUILD_MEMBER_REMOVE, EVENT_GUILD_MEMBER_UPDATE,
};
use guildgate_models::member::Member;
use guildgate_util::snowflake;
use serde_json::Value;
use tracing::debug;

use super::{id_field, nested, parse, SocketHandler};
use crate::context::ClientContext;
use crate::error::CoreError;
use crate::event_cache::CacheKind;
use crate::events::ClientEvent;

pub struct MembersChunkHandler;

impl SocketHandler for MembersChunkHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        _seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let chunk: MembersChunk = parse(content)?;
        match ctx
            .controller
            .on_member_chunk(chunk.guild_id, &chunk.members, chunk.is_last())
        {
            Some(outcome) => ctx.apply(outcome),
            None => debug!(
                guild_id = chunk.guild_id,
                members = chunk.members.len(),
                "discarding member chunk for a guild that is not being set up"
            ),
        }
        Ok(None)
    }
}

pub struct MemberAddHandler;

impl SocketHandler for MemberAddHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "guild_id")?;
        if ctx.controller.is_locked(guild_id) {
            return Ok(match ctx.controller.on_add_member(guild_id, content) {
                Some(outcome) => {
                    ctx.apply(outcome);
                    None
                }
                None => Some(guild_id),
            });
        }

        let member: Member = parse(content)?;
        let user_id = member.user_id();
        let joined = ctx.entities.with_guild_mut(guild_id, |guild| {
            if guild.members.insert(user_id, member.clone()).is_none() {
                guild.member_count += 1;
            }
        });
        if joined.is_none() {
            ctx.park(CacheKind::Guild, guild_id, seq, EVENT_GUILD_MEMBER_ADD, content);
            return Ok(None);
        }
        ctx.entities.upsert_user(member.user.clone());
        ctx.events.publish(ClientEvent::MemberJoin { guild_id, member });
        ctx.playback(CacheKind::Member, user_id);
        Ok(None)
    }
}

pub struct MemberUpdateHandler;

impl SocketHandler for MemberUpdateHandler {
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
        let member: Member = parse(content)?;
        let user_id = member.user_id();
        let updated = ctx.entities.with_guild_mut(guild_id, |guild| {
            match guild.members.get_mut(&user_id) {
                Some(cached) => {
                    *cached = member.clone();
                    true
                }
                None => false,
            }
        });
        match updated {
            None => {
                ctx.park(CacheKind::Guild, guild_id, seq, EVENT_GUILD_MEMBER_UPDATE, content);
                return Ok(None);
            }
            Some(false) => {
                ctx.park(CacheKind::Member, user_id, seq, EVENT_GUILD_MEMBER_UPDATE, content);
                return Ok(None);
            }
            Some(true) => {}
        }
        ctx.entities.upsert_user(member.user.clone());
        ctx.events.publish(ClientEvent::MemberUpdate { guild_id, member });
        Ok(None)
    }
}

pub struct MemberRemoveHandler;

impl SocketHandler for MemberRemoveHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let guild_id = id_field(content, "guild_id")?;
        let user_id = id_field(nested(content, "user")?, "id")?;
        if ctx.controller.is_locked(guild_id) {
            return Ok(match ctx.controller.on_remove_member(guild_id, user_id) {
                Some(outcome) => {
                    ctx.apply(outcome);
                    None
                }
                None => Some(guild_id),
            });
        }

        let removed = ctx.entities.with_guild_mut(guild_id, |guild| {
            let known = guild.members.remove(&user_id).is_some();
            if known {
                guild.member_count = (guild.member_count - 1).max(0);
            }
            known
        });
        match removed {
            None => ctx.park(CacheKind::Guild, guild_id, seq, EVENT_GUILD_MEMBER_REMOVE, content),
            Some(known) => {
                if !known {
                    debug!(guild_id, user_id, "member leave for a member that was not cached");
                }
                ctx.event_cache.clear_where(CacheKind::Member, user_id, |event| {
                    snowflake::opt_field(&event.payload, "guild_id") == Some(guild_id)
                });
                ctx.events.publish(ClientEvent::MemberLeave { guild_id, user_id });
            }
        }
        Ok(None)
    }
}
