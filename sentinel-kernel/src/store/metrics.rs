//! Time series of synthesized [`MetricsSample`]s, bounded to the most recent
//! points and mirrored to `metrics.json`.

use super::{load_json, save_json, StoreError};
use crate::models::MetricsSample;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_CAPACITY: usize = 1000;

pub struct MetricStore {
    storage_path: PathBuf,
    points: Mutex<VecDeque<MetricsSample>>,
    capacity: usize,
}

impl MetricStore {
    pub fn open<P: Into<PathBuf>>(storage_path: P, capacity: usize) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        let capacity = capacity.max(1);
        let mut points: VecDeque<MetricsSample> = load_json(&storage_path)?;
        while points.len() > capacity {
            points.pop_front();
        }
        info!("[metrics] loaded {} points from {:?}", points.len(), storage_path);
        Ok(Self {
            storage_path,
            points: Mutex::new(points),
            capacity,
        })
    }

    /// Appends a point, evicting the oldest beyond capacity.
    pub fn append(&self, sample: &MetricsSample) -> Result<(), StoreError> {
        let mut points = self.points.lock();
        points.push_back(sample.clone());
        while points.len() > self.capacity {
            points.pop_front();
        }
        save_json(&self.storage_path, &*points)
    }

    /// Last `limit` points, oldest first (chart order).
    pub fn recent(&self, limit: usize) -> Vec<MetricsSample> {
        let points = self.points.lock();
        let skip = points.len().saturating_sub(limit);
        points.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
