mod controller;
mod node;

pub use controller::{FinishedSetup, GuildSetupController, SetupOutcome};
pub use node::{GuildSetupNode, GuildSnapshot, SetupKind, SetupStatus, SetupStep};
