pub mod builder;
pub mod config;
pub mod context;
pub mod entity_cache;
pub mod error;
pub mod event_cache;
pub mod events;
pub mod handlers;
pub mod setup;
pub mod sink;

pub use config::SetupConfig;
pub use context::ClientContext;
pub use error::CoreError;
pub use event_cache::{CacheKind, CachedEvent, EventCache};
pub use events::{ClientEvent, EventBus};
pub use sink::{ChannelSink, GatewaySink};
