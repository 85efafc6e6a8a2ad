use guildgate_models::channel::Channel;
use guildgate_models::user::User;
use guildgate_util::snowflake;
use serde_json::Value;
use tracing::{debug, warn};

use super::{parse, SocketHandler};
use crate::context::ClientContext;
use crate::error::CoreError;
use crate::event_cache::CacheKind;
use crate::events::ClientEvent;

/// READY: the guild list starts the handshake countdown.
pub struct ReadyHandler;

impl SocketHandler for ReadyHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        _seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        if let Some(user) = content.get("user") {
            let user: User = parse(user)?;
            debug!(user_id = user.id, "identified as user");
            ctx.entities.upsert_user(user);
        }

        let guilds = content
            .get("guilds")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut guild_ids = Vec::with_capacity(guilds.len());
        for guild in &guilds {
            match snowflake::field(guild, "id") {
                Ok(id) => guild_ids.push(id),
                Err(err) => warn!(error = %err, "skipping READY guild without id"),
            }
        }

        ctx.apply(ctx.controller.on_ready(&guild_ids));

        // User accounts receive full guild objects in READY.
        for guild in &guilds {
            let available = !guild
                .get("unavailable")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !available {
                continue;
            }
            if let Some(id) = snowflake::opt_field(guild, "id") {
                ctx.apply(ctx.controller.on_guild_appears(id, guild));
            }
        }

        let private_channels = content
            .get("private_channels")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for raw in &private_channels {
            match parse::<Channel>(raw) {
                Ok(channel) => {
                    let id = channel.id;
                    ctx.entities.upsert_channel(channel);
                    ctx.playback(CacheKind::Channel, id);
                }
                Err(err) => warn!(error = %err, "skipping malformed private channel"),
            }
        }
        Ok(None)
    }
}

pub struct ResumedHandler;

impl SocketHandler for ResumedHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        _seq: u64,
        _content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        ctx.resume();
        ctx.events.publish(ClientEvent::Resumed);
        Ok(None)
    }
}
