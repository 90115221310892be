//! SentinelX Agent - Fleet reporting loop
//!
//! Runs two independent ticks against the kernel:
//! - Heartbeat: CPU/memory + primary IPv4 to `/infrastructure/register`
//! - Event: synthetic log event to `/logs/ingest`, sent on a probability roll
//!
//! Failures never stop the agent. Each heartbeat prints one character on
//! stdout: `.` delivered, `X` failed.

mod config;
mod discovery;
mod events;
mod metrics;
mod reporter;

use anyhow::{Context, Result};
use clap::Parser;
use config::AgentArgs;
use discovery::HostIdentity;
use metrics::LoadSampler;
use reporter::{Heartbeat, Reporter};
use std::io::Write;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Fires on every tick whatever earlier sends are doing: each POST runs in its
/// own task and prints its mark when it settles.
fn spawn_heartbeat_loop(args: AgentArgs, identity: HostIdentity, reporter: Reporter) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = LoadSampler::new();
        let mut timer = interval(args.heartbeat_every());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            let heartbeat = Heartbeat::new(&identity, discovery::primary_ipv4(), &args.region, sampler.sample());
            let reporter = reporter.clone();
            tokio::spawn(async move {
                let mark = match reporter.send_heartbeat(&heartbeat).await {
                    Ok(()) => ".",
                    Err(e) => {
                        debug!("[heartbeat] {}", e);
                        "X"
                    }
                };
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(mark.as_bytes());
                let _ = stdout.flush();
            });
        }
    })
}

fn spawn_event_loop(args: AgentArgs, identity: HostIdentity, reporter: Reporter) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(args.event_every());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately; events start after one period
        timer.tick().await;
        loop {
            timer.tick().await;
            let Some(event) = events::roll(&mut rand::rng(), args.event_probability, &identity.hostname) else {
                continue;
            };
            let reporter = reporter.clone();
            tokio::spawn(async move {
                if let Err(e) = reporter.send_event(&event).await {
                    debug!("[events] {}", e);
                }
            });
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentinel_agent=warn")))
        .init();

    let args = AgentArgs::parse();
    let identity = HostIdentity::discover(args.name.as_deref());
    let reporter = Reporter::new(args.server_base(), args.request_timeout()).context("Failed to build HTTP client")?;

    println!("\n--- SentinelX Agent v{} ---", env!("CARGO_PKG_VERSION"));
    println!("Target Server: {}", reporter.base());
    println!("Device Name:   {}", identity.hostname);
    println!("Interval:      {}ms", args.interval);
    println!("-----------------------------\n");
    info!("[agent] reporting as {} every {:?}", identity.hostname, args.heartbeat_every());

    let heartbeat = spawn_heartbeat_loop(args.clone(), identity.clone(), reporter.clone());
    let events = spawn_event_loop(args, identity, reporter);

    println!("Agent is running... (Press Ctrl+C to stop)");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

    heartbeat.abort();
    events.abort();
    println!();
    info!("[agent] stopped");
    Ok(())
}
