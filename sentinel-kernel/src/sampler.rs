//! System-wide metrics sampling for the realtime `metrics_update` push.
//!
//! Keeps one `sysinfo::System` alive between samples so CPU usage and
//! network byte counters are deltas over the previous sample.

use crate::models::MetricsSample;
use std::time::Instant;
use sysinfo::{Networks, System};
use time::OffsetDateTime;

pub struct SystemSampler {
    sys: System,
    networks: Networks,
    last_refresh: Instant,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            networks: Networks::new_with_refreshed_list(),
            last_refresh: Instant::now(),
        }
    }

    /// Takes one sample. CPU and memory are whole percentages, network is
    /// bytes per second summed over non-loopback interfaces.
    pub fn sample(&mut self) -> MetricsSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.networks.refresh();

        let elapsed = self.last_refresh.elapsed().as_secs_f64().max(0.001);
        self.last_refresh = Instant::now();

        let (rx, tx) = self
            .networks
            .iter()
            .filter(|(name, _)| !is_loopback(name))
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.received(), tx + data.transmitted())
            });

        MetricsSample {
            cpu_load: self.sys.global_cpu_info().cpu_usage().round(),
            memory_usage: percent(self.sys.used_memory(), self.sys.total_memory()),
            network_rx: (rx as f64 / elapsed).round(),
            network_tx: (tx as f64 / elapsed).round(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 100.0).round() as f32
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_lowercase().contains("loopback")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_and_handles_zero_total() {
        assert_eq!(percent(1, 3), 33.0);
        assert_eq!(percent(5, 0), 0.0);
    }

    #[test]
    fn sample_is_within_bounds() {
        let mut sampler = SystemSampler::new();
        let sample = sampler.sample();
        assert!((0.0..=100.0).contains(&sample.cpu_load));
        assert!((0.0..=100.0).contains(&sample.memory_usage));
        assert!(sample.network_rx >= 0.0 && sample.network_tx >= 0.0);
    }

    #[test]
    fn loopback_names() {
        assert!(is_loopback("lo"));
        assert!(is_loopback("Loopback Pseudo-Interface 1"));
        assert!(!is_loopback("eth0"));
    }
}
