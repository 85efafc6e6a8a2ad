use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::builder::{DefaultEntityBuilder, EntityBuilder};
use crate::config::SetupConfig;
use crate::entity_cache::EntityCache;
use crate::event_cache::{CacheKind, CachedEvent, EventCache};
use crate::events::{ClientEvent, EventBus};
use crate::handlers::HandlerRegistry;
use crate::setup::{GuildSetupController, GuildSnapshot, SetupKind, SetupOutcome};
use crate::sink::GatewaySink;

/// Connection-scoped state shared by every handler.
pub struct ClientContext {
    pub config: SetupConfig,
    pub controller: GuildSetupController,
    pub event_cache: EventCache,
    pub entities: EntityCache,
    pub events: EventBus,
    builder: Box<dyn EntityBuilder>,
    handlers: HandlerRegistry,
}

impl ClientContext {
    pub fn new(config: SetupConfig, sink: Arc<dyn GatewaySink>) -> Self {
        Self::with_parts(
            config,
            sink,
            Box::new(DefaultEntityBuilder),
            HandlerRegistry::with_defaults(),
        )
    }

    pub fn with_parts(
        config: SetupConfig,
        sink: Arc<dyn GatewaySink>,
        builder: Box<dyn EntityBuilder>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            controller: GuildSetupController::new(config.clone(), sink),
            event_cache: EventCache::new(),
            entities: EntityCache::empty(),
            events: EventBus::new(config.event_bus_capacity),
            builder,
            handlers,
            config,
        }
    }

    /// Route one dispatch payload through its handler. Nothing here may fail
    /// the caller: bad payloads are logged and dropped.
    pub fn dispatch(&self, seq: u64, event_type: &str, payload: &Value) {
        let Some(handler) = self.handlers.get(event_type) else {
            debug!(seq, event_type, "no handler for event type, dropping");
            return;
        };
        match handler.handle_internally(self, seq, payload) {
            Ok(None) => {}
            Ok(Some(guild_id)) => {
                let event = CachedEvent::new(seq, event_type, payload.clone());
                if !self.controller.queue_event(guild_id, event.clone()) {
                    // The node finished between the lock check and the queue.
                    self.event_cache.cache(CacheKind::Guild, guild_id, event);
                }
            }
            Err(err) => {
                warn!(seq, event_type, error = %err, "dropping payload that could not be handled");
            }
        }
    }

    /// Re-run deferred events through the handler table in order.
    pub fn replay(&self, events: Vec<CachedEvent>) {
        for event in events {
            self.dispatch(event.seq, &event.event_type, &event.payload);
        }
    }

    /// Park an event until the entity `(kind, id)` is cached.
    pub fn park(&self, kind: CacheKind, id: i64, seq: u64, event_type: &str, payload: &Value) {
        debug!(%kind, id, seq, event_type, "prerequisite not cached, parking event");
        self.event_cache
            .cache(kind, id, CachedEvent::new(seq, event_type, payload.clone()));
    }

    pub fn playback(&self, kind: CacheKind, id: i64) {
        let events = self.event_cache.take(kind, id);
        self.replay(events);
    }

    /// Carry out the side effects a controller call asked for.
    pub fn apply(&self, outcome: SetupOutcome) {
        for (kind, id) in outcome.purge {
            self.event_cache.clear(kind, id);
        }
        for event in outcome.events {
            self.events.publish(event);
        }
        if let Some(guild_count) = outcome.gateway_ready {
            self.publish_ready(guild_count);
        }
        for snapshot in outcome.completed {
            self.complete_setup(snapshot);
        }
    }

    fn publish_ready(&self, guild_count: usize) {
        info!(guild_count, "gateway connection fully established");
        self.events.publish(ClientEvent::GatewayReady { guild_count });
    }

    fn complete_setup(&self, snapshot: GuildSnapshot) {
        let guild_id = snapshot.guild_id;
        let built = self.builder.build_guild(&snapshot);
        let (channel_ids, role_ids) = match built {
            Ok(guild) => {
                let ids = (guild.channel_ids(), guild.role_ids());
                self.entities.register_guild(guild);
                ids
            }
            Err(err) => {
                warn!(guild_id, error = %err, "failed to build guild, abandoning setup");
                (Vec::new(), Vec::new())
            }
        };
        let registered = self.entities.has_guild(guild_id);

        let Some(finished) = self.controller.finish(guild_id) else {
            return;
        };
        if registered {
            self.events.publish(match finished.kind {
                SetupKind::InitialSync => ClientEvent::GuildReady { guild_id },
                SetupKind::Join => ClientEvent::GuildJoin { guild_id },
                SetupKind::Reappearing => ClientEvent::GuildAvailable { guild_id },
            });
        }
        if let Some(guild_count) = finished.gateway_ready {
            self.publish_ready(guild_count);
        }

        debug!(guild_id, queued = finished.queued.len(), "finished guild setup, replaying queued events");
        self.replay(finished.queued);
        self.playback(CacheKind::Guild, guild_id);
        for channel_id in channel_ids {
            self.playback(CacheKind::Channel, channel_id);
        }
        for role_id in role_ids {
            self.playback(CacheKind::Role, role_id);
        }
    }

    /// Bound the event cache relative to the current stream position.
    pub fn evict_stale_events(&self, current_seq: u64) -> usize {
        self.event_cache
            .evict_older_than(current_seq, self.config.eviction_threshold())
    }

    pub fn sweep_chunk_timeouts(&self, now: Instant) {
        let outcome = self.controller.sweep_chunk_timeouts(now);
        self.apply(outcome);
    }

    /// The gateway replayed what we missed; requests sent over the old
    /// connection may have been lost.
    pub fn resume(&self) {
        self.controller.resend_requests();
    }

    /// Forget everything tied to the current session.
    pub fn reset(&self) {
        self.controller.reset();
        self.event_cache.clear_all();
        self.entities.clear();
    }
}
