mod gateway;
mod session;

pub use gateway::{GatewaySession, SessionError, DEFAULT_SWEEP_INTERVAL};
pub use session::Session;
