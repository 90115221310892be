use serde::{Deserialize, Serialize};
use std::time::Instant;
use sysinfo::{Pid, System};

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub nodes_tracked: u32,
    pub sessions_connected: u32,
    pub logs_stored: u32,
    pub memory_usage_mb: f32,
    pub analysis_backend: String,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn report(
        &self,
        nodes: usize,
        sessions: usize,
        logs: usize,
        analysis_backend: &str,
    ) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.uptime_seconds(),
            nodes_tracked: nodes as u32,
            sessions_connected: sessions as u32,
            logs_stored: logs as u32,
            memory_usage_mb: get_memory_usage_mb(),
            analysis_backend: analysis_backend.to_string(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resident memory of the kernel process, 0 when it cannot be read.
fn get_memory_usage_mb() -> f32 {
    let pid = Pid::from_u32(std::process::id());
    let mut sys = System::new();
    if !sys.refresh_process(pid) {
        return 0.0;
    }
    sys.process(pid)
        .map(|p| p.memory() as f32 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_and_memory() {
        let tracker = HealthTracker::new();
        let health = tracker.report(3, 2, 10, "http://127.0.0.1:5001/analysis/upload");
        assert_eq!(health.nodes_tracked, 3);
        assert_eq!(health.sessions_connected, 2);
        assert_eq!(health.logs_stored, 10);
        assert!(health.memory_usage_mb >= 0.0);
    }
}
