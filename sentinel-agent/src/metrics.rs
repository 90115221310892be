//! CPU and memory sampling for heartbeats

use sysinfo::System;

/// Whole-percent load figures carried by one heartbeat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub cpu: f32,
    pub memory: f32,
}

/// Keeps one `System` between ticks so CPU usage is measured over the
/// heartbeat interval instead of a fresh 0%.
pub struct LoadSampler {
    sys: System,
}

impl LoadSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self { sys }
    }

    pub fn sample(&mut self) -> LoadSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        LoadSample {
            cpu: self.sys.global_cpu_info().cpu_usage().clamp(0.0, 100.0).round(),
            memory: percent(self.sys.used_memory(), self.sys.total_memory()),
        }
    }
}

impl Default for LoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 100.0).round().min(100.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_and_guards_zero() {
        assert_eq!(percent(2, 3), 67.0);
        assert_eq!(percent(5, 0), 0.0);
    }

    #[test]
    fn samples_are_percentages() {
        let mut sampler = LoadSampler::new();
        let sample = sampler.sample();
        assert!((0.0..=100.0).contains(&sample.cpu));
        assert!((0.0..=100.0).contains(&sample.memory));
        assert_eq!(sample.cpu.fract(), 0.0);
    }
}
