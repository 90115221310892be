//! Command-line configuration for the agent
//!
//! Every flag can also come from a `SENTINEL_*` environment variable, so
//! the same binary runs from a shell or a service unit without wrappers.

use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "sentinel-agent", version, about = "Reports heartbeats and events to a SentinelX kernel")]
pub struct AgentArgs {
    /// Kernel base URL (e.g. http://192.168.1.5:3000)
    #[arg(short, long, env = "SENTINEL_SERVER", default_value = "http://localhost:3000")]
    pub server: String,

    /// Device name reported as hostname (defaults to the OS hostname)
    #[arg(short, long, env = "SENTINEL_NAME")]
    pub name: Option<String>,

    /// Heartbeat interval in milliseconds
    #[arg(short, long, env = "SENTINEL_INTERVAL", default_value_t = 5000)]
    pub interval: u64,

    /// Region label attached to every heartbeat
    #[arg(long, env = "SENTINEL_REGION", default_value = "Remote-Office")]
    pub region: String,

    /// Synthetic event tick in milliseconds
    #[arg(long, env = "SENTINEL_EVENT_INTERVAL", default_value_t = 8000)]
    pub event_interval: u64,

    /// Chance that one event tick emits an event
    #[arg(long, env = "SENTINEL_EVENT_PROBABILITY", default_value_t = 0.3, value_parser = parse_probability)]
    pub event_probability: f64,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "SENTINEL_REQUEST_TIMEOUT", default_value_t = 4000)]
    pub request_timeout: u64,
}

impl AgentArgs {
    pub fn heartbeat_every(&self) -> Duration {
        Duration::from_millis(self.interval.max(100))
    }

    pub fn event_every(&self) -> Duration {
        Duration::from_millis(self.event_interval.max(100))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout.max(100))
    }

    /// Server URL without trailing slashes.
    pub fn server_base(&self) -> &str {
        self.server.trim_end_matches('/')
    }
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let p: f64 = raw.parse().map_err(|e| format!("not a number: {e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is not within 0.0..=1.0"))
    }
}
