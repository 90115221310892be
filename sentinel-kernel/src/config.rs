use crate::models::NodeStatus;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub bind: String,
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub history_limit: usize,
    pub analysis: AnalysisConf,
    pub realtime: RealtimeConf,
    pub staleness: StalenessConf,
    /// Nodes inserted when the registry starts empty.
    pub seed: Vec<SeedNode>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConf {
    pub backend_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RealtimeConf {
    pub tick_ms: u64,
    pub jitter_loads: bool,
    pub jitter_amplitude: f32,
    pub session_buffer: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StalenessConf {
    pub enabled: bool,
    pub warning_after_secs: u64,
    pub offline_after_secs: u64,
    pub sweep_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SeedNode {
    pub hostname: String,
    pub ip_address: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub status: Option<NodeStatus>,
    #[serde(default)]
    pub load: Option<f32>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".into(),
            data_dir: "./data".into(),
            upload_dir: "./uploads".into(),
            history_limit: 50,
            analysis: AnalysisConf::default(),
            realtime: RealtimeConf::default(),
            staleness: StalenessConf::default(),
            seed: Vec::new(),
        }
    }
}

impl Default for AnalysisConf {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:5001/analysis/upload".into(),
            timeout_secs: 10,
        }
    }
}

impl Default for RealtimeConf {
    fn default() -> Self {
        Self {
            tick_ms: 3000,
            jitter_loads: true,
            jitter_amplitude: 5.0,
            session_buffer: 256,
        }
    }
}

impl Default for StalenessConf {
    fn default() -> Self {
        Self {
            enabled: false,
            warning_after_secs: 30,
            offline_after_secs: 90,
            sweep_secs: 15,
        }
    }
}

impl KernelConfig {
    pub fn nodes_file(&self) -> PathBuf {
        self.data_dir.join("nodes.json")
    }

    pub fn logs_file(&self) -> PathBuf {
        self.data_dir.join("logs.json")
    }

    pub fn metrics_file(&self) -> PathBuf {
        self.data_dir.join("metrics.json")
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.realtime.tick_ms.max(100))
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis.timeout_secs.max(1))
    }

    /// Applies `SENTINEL_BIND` and `SENTINEL_ANALYSIS_URL` on top of the file.
    pub fn apply_env(mut self) -> Self {
        if let Ok(bind) = std::env::var("SENTINEL_BIND") {
            if !bind.trim().is_empty() {
                self.bind = bind;
            }
        }
        if let Ok(url) = std::env::var("SENTINEL_ANALYSIS_URL") {
            if !url.trim().is_empty() {
                self.analysis.backend_url = url;
            }
        }
        self
    }
}

/// Parses a YAML config; blank input yields the defaults.
pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

/// Loads `SENTINEL_KERNEL_CONFIG` (default `kernel.yaml`). A missing or invalid
/// file falls back to the defaults.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("SENTINEL_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!("[kernel] invalid config {}: {}", path, e);
            KernelConfig::default()
        })
    } else {
        warn!("[kernel] no {} found, using default config", path);
        KernelConfig::default()
    };
    cfg.apply_env()
}
