/**
 * STORES - Append-only persistence for logs and metric points
 *
 * ROLE:
 * Keeps the Log Store and the metrics time series in memory with a JSON
 * mirror on disk. Records are only ever appended, never rewritten.
 *
 * OPERATION:
 * - In-memory cache guarded by a mutex, loaded from disk at startup
 * - Whole-file rewrite after each append (temp file + rename)
 * - HistoryQuery = pagination shared by every history read
 */

pub mod logs;
pub mod metrics;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

pub use logs::LogStore;
pub use metrics::MetricStore;

/// Errors raised by the stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pagination for history reads.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Hard cap on any history page.
pub const MAX_PAGE: usize = 500;

impl HistoryQuery {
    pub fn page(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }

    /// Effective limit, falling back to `default` and never above [`MAX_PAGE`].
    pub fn limit_or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).min(MAX_PAGE)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::page(50)
    }
}

/// Reads a JSON document, creating it with `T::default()` when missing.
pub(crate) fn load_json<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Serialize + Default,
{
    if !path.exists() {
        let empty = T::default();
        save_json(path, &empty)?;
        return Ok(empty);
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Writes a JSON document atomically so a crash never leaves half a file.
pub(crate) fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
