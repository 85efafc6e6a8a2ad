use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "guildgate-replay",
    about = "Replay a captured gateway stream through guild setup and print the resulting events"
)]
pub struct Args {
    /// Capture file with one gateway frame (JSON) per line
    pub capture: PathBuf,

    /// Path to configuration file
    #[arg(short, long, default_value = "config/guildgate.toml")]
    pub config: String,

    /// Emit logs as JSON (overrides config)
    #[arg(long)]
    pub json_logs: bool,

    /// Print only a summary, not every event
    #[arg(short, long)]
    pub quiet: bool,
}
