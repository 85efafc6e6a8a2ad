use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{sink, stream};
use guildgate_core::{ChannelSink, ClientContext};
use guildgate_ws::GatewaySession;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    if args.json_logs || config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let capture = std::fs::read_to_string(&args.capture)
        .with_context(|| format!("failed to read capture '{}'", args.capture.display()))?;
    let frames: Vec<String> = capture
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    tracing::info!(frames = frames.len(), capture = %args.capture.display(), "replaying capture");

    let (gateway_sink, outbound) = ChannelSink::new();
    let ctx = Arc::new(ClientContext::new(config.setup.clone(), Arc::new(gateway_sink)));

    let mut events = ctx.events.subscribe();
    let quiet = args.quiet;
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        loop {
            match events.recv().await {
                Ok(event) => {
                    printed += 1;
                    if quiet {
                        continue;
                    }
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(err) => tracing::warn!(error = %err, "failed to encode event"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event printer fell behind");
                }
                Err(RecvError::Closed) => break printed,
            }
        }
    });

    // Requests the setup controller would send to a live gateway.
    let writer = sink::unfold((), |(), request: String| async move {
        tracing::info!(target: "guildgate::outbound", %request, "gateway request");
        Ok::<_, Infallible>(())
    });
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let session = GatewaySession::new(ctx.clone(), outbound)
        .run(stream::iter(frames), writer, shutdown)
        .await?;

    tracing::info!(
        sequence = session.sequence,
        guilds = ctx.entities.guild_count(),
        still_in_setup = ctx.controller.setup_count(),
        pending_chunks = ctx.controller.pending_chunk_count(),
        parked_events = ctx.event_cache.len(),
        gateway_ready = ctx.controller.is_ready(),
        "replay finished"
    );

    drop(ctx);
    let printed = printer.await.context("event printer task failed")?;
    tracing::info!(events = printed, "events delivered");
    Ok(())
}
