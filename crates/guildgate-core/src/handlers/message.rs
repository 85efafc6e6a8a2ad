use guildgate_models::gateway::EVENT_MESSAGE_CREATE;
use guildgate_util::snowflake;
use serde_json::Value;

use super::{id_field, SocketHandler};
use crate::context::ClientContext;
use crate::error::CoreError;
use crate::event_cache::CacheKind;
use crate::events::ClientEvent;

pub struct MessageCreateHandler;

impl SocketHandler for MessageCreateHandler {
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError> {
        let message_id = id_field(content, "id")?;
        let channel_id = id_field(content, "channel_id")?;
        let guild_id = snowflake::opt_field(content, "guild_id");
        if let Some(guild_id) = guild_id {
            if ctx.controller.is_locked(guild_id) {
                return Ok(Some(guild_id));
            }
        }
        if !ctx.entities.has_channel(channel_id) {
            ctx.park(CacheKind::Channel, channel_id, seq, EVENT_MESSAGE_CREATE, content);
            return Ok(None);
        }
        ctx.events.publish(ClientEvent::MessageReceived {
            guild_id,
            channel_id,
            message_id,
            author_id: content
                .get("author")
                .and_then(|author| snowflake::opt_field(author, "id")),
            content: content
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
        Ok(None)
    }
}
