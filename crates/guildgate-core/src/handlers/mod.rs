mod channel;
mod guild;
mod member;
mod message;
mod ready;
mod role;

use std::collections::HashMap;

use guildgate_models::gateway::*;
use guildgate_util::snowflake;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::ClientContext;
use crate::error::CoreError;

pub use channel::{ChannelCreateHandler, ChannelDeleteHandler, ChannelUpdateHandler};
pub use guild::{GuildCreateHandler, GuildDeleteHandler, GuildSyncHandler, GuildUpdateHandler};
pub use member::{
    MemberAddHandler, MemberRemoveHandler, MemberUpdateHandler, MembersChunkHandler,
};
pub use message::MessageCreateHandler;
pub use ready::{ReadyHandler, ResumedHandler};
pub use role::{RoleCreateHandler, RoleDeleteHandler, RoleUpdateHandler};

/// One handler per dispatch event type.
pub trait SocketHandler: Send + Sync {
    /// Process the `d` object of a dispatch.
    ///
    /// `Ok(Some(guild_id))` means the guild is locked for setup and the raw
    /// event has to wait on its setup node.
    fn handle_internally(
        &self,
        ctx: &ClientContext,
        seq: u64,
        content: &Value,
    ) -> Result<Option<i64>, CoreError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn SocketHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EVENT_READY, ReadyHandler);
        registry.register(EVENT_RESUMED, ResumedHandler);
        registry.register(EVENT_GUILD_CREATE, GuildCreateHandler);
        registry.register(EVENT_GUILD_SYNC, GuildSyncHandler);
        registry.register(EVENT_GUILD_UPDATE, GuildUpdateHandler);
        registry.register(EVENT_GUILD_DELETE, GuildDeleteHandler);
        registry.register(EVENT_GUILD_MEMBERS_CHUNK, MembersChunkHandler);
        registry.register(EVENT_GUILD_MEMBER_ADD, MemberAddHandler);
        registry.register(EVENT_GUILD_MEMBER_UPDATE, MemberUpdateHandler);
        registry.register(EVENT_GUILD_MEMBER_REMOVE, MemberRemoveHandler);
        registry.register(EVENT_CHANNEL_CREATE, ChannelCreateHandler);
        registry.register(EVENT_CHANNEL_UPDATE, ChannelUpdateHandler);
        registry.register(EVENT_CHANNEL_DELETE, ChannelDeleteHandler);
        registry.register(EVENT_GUILD_ROLE_CREATE, RoleCreateHandler);
        registry.register(EVENT_GUILD_ROLE_UPDATE, RoleUpdateHandler);
        registry.register(EVENT_GUILD_ROLE_DELETE, RoleDeleteHandler);
        registry.register(EVENT_MESSAGE_CREATE, MessageCreateHandler);
        registry
    }

    /// Install or replace the handler for an event type.
    pub fn register(&mut self, event_type: &str, handler: impl SocketHandler + 'static) {
        self.handlers.insert(event_type.to_string(), Box::new(handler));
    }

    pub fn get(&self, event_type: &str) -> Option<&dyn SocketHandler> {
        self.handlers.get(event_type).map(|h| h.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn id_field(content: &Value, key: &str) -> Result<i64, CoreError> {
    Ok(snowflake::field(content, key)?)
}

fn parse<T: DeserializeOwned>(value: &Value) -> Result<T, CoreError> {
    Ok(serde_json::from_value(value.clone())?)
}

fn nested<'a>(content: &'a Value, key: &'static str) -> Result<&'a Value, CoreError> {
    content.get(key).ok_or(CoreError::MissingField(key))
}
