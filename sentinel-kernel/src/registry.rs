/**
 * FLEET REGISTRY - Table of known nodes and their state machine
 *
 * ROLE: Sole owner of Node mutation. Upsert keyed by hostname, ordered reads,
 * JSON mirror on disk, full snapshot pushed to the realtime sessions after
 * every change.
 *
 * STATES: online / warning / offline. Heartbeats and registrations set the
 * status explicitly; the optional staleness sweep demotes silent nodes.
 */

use crate::broadcast::SessionManager;
use crate::models::{Node, NodeStatus, NodeUpdate};
use crate::store::StoreError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info};

pub type NodesMap = BTreeMap<String, Node>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    Invalid(String),
    #[error("failed to persist registry: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of an upsert.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub node: Node,
    pub created: bool,
}

/// Thresholds for the staleness sweep.
#[derive(Debug, Clone, Copy)]
pub struct Staleness {
    pub warning_after: Duration,
    pub offline_after: Duration,
}

pub struct FleetRegistry {
    nodes: RwLock<NodesMap>,
    data_file: PathBuf,
    save_lock: Mutex<()>,
    sessions: Option<SessionManager>,
}

impl FleetRegistry {
    pub fn new<P: Into<PathBuf>>(data_file: P) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            data_file: data_file.into(),
            save_lock: Mutex::new(()),
            sessions: None,
        }
    }

    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Loads nodes from the JSON mirror.
    pub async fn load_nodes(&mut self) -> Result<(), StoreError> {
        if !tokio::fs::try_exists(&self.data_file).await? {
            info!("[registry] no existing nodes file, starting fresh");
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.data_file).await?;
        let nodes: NodesMap = if content.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&content)?
        };

        let mut map = self.nodes.write().await;
        *map = nodes;
        info!("[registry] loaded {} nodes from {:?}", map.len(), self.data_file);
        Ok(())
    }

    /// Writes the current table to disk. Saves are serialized so an older
    /// snapshot can never overwrite a newer one.
    pub async fn save_nodes(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;
        let content = {
            let map = self.nodes.read().await;
            serde_json::to_vec_pretty(&*map)?
        };
        if let Some(parent) = self.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.data_file.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.data_file).await?;
        Ok(())
    }

    /// Insert-or-update keyed by hostname, then persist and broadcast.
    ///
    /// The in-memory write always lands; a failed save is returned so direct
    /// writers can report it.
    pub async fn upsert(&self, update: NodeUpdate) -> Result<Upserted, RegistryError> {
        let hostname = update
            .hostname
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RegistryError::Invalid("hostname is required".into()))?
            .to_string();
        if let Some(load) = update.load {
            if !load.is_finite() {
                return Err(RegistryError::Invalid("load must be a finite number".into()));
            }
        }

        let now = OffsetDateTime::now_utc();
        let upserted = {
            let mut map = self.nodes.write().await;
            let created = !map.contains_key(&hostname);
            let node = match map.get_mut(&hostname) {
                Some(node) => {
                    if let Some(ip) = update.ip_address.filter(|ip| !ip.trim().is_empty()) {
                        node.ip_address = ip;
                    }
                    if update.region.is_some() {
                        node.region = update.region;
                    }
                    if let Some(status) = update.status {
                        node.status = status;
                    }
                    if let Some(load) = update.load {
                        node.load = clamp_load(load);
                    }
                    node.last_seen = now;
                    node.clone()
                }
                None => {
                    let ip_address = update
                        .ip_address
                        .filter(|ip| !ip.trim().is_empty())
                        .ok_or_else(|| RegistryError::Invalid("ipAddress is required".into()))?;
                    let node = Node {
                        hostname: hostname.clone(),
                        ip_address,
                        region: update.region,
                        status: update.status.unwrap_or(NodeStatus::Online),
                        load: clamp_load(update.load.unwrap_or(0.0)),
                        last_seen: now,
                    };
                    map.insert(hostname.clone(), node.clone());
                    node
                }
            };
            // published under the write guard so frames leave in write order
            self.publish(&map);
            Upserted { node, created }
        };

        if upserted.created {
            info!("[registry] registered node {}", hostname);
        } else {
            debug!("[registry] updated node {}", hostname);
        }
        self.save_nodes().await?;
        Ok(upserted)
    }

    /// Full registry, ordered by hostname.
    pub async fn list_nodes(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn get_node(&self, hostname: &str) -> Option<Node> {
        self.nodes.read().await.get(hostname).cloned()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Nudges each online node's load by up to ±`amplitude` and rebroadcasts.
    /// In-memory only: the next real write persists it.
    pub async fn jitter_loads(&self, amplitude: f32) -> usize {
        use rand::Rng;

        let amplitude = amplitude.abs();
        let mut map = self.nodes.write().await;
        let mut rng = rand::rng();
        let mut changed = 0;
        for node in map.values_mut().filter(|n| n.status == NodeStatus::Online) {
            let delta: f32 = rng.random_range(-amplitude..=amplitude);
            node.load = clamp_load(node.load + delta);
            changed += 1;
        }
        if changed > 0 {
            self.publish(&map);
        }
        changed
    }

    /// Demotes nodes whose last heartbeat is older than the thresholds.
    /// Returns how many nodes changed status.
    pub async fn sweep_stale(&self, now: OffsetDateTime, staleness: Staleness) -> usize {
        let changed = {
            let mut map = self.nodes.write().await;
            let mut changed = 0;
            for node in map.values_mut() {
                let age = (now - node.last_seen).whole_seconds().max(0) as u64;
                let next = if age > staleness.offline_after.as_secs() {
                    NodeStatus::Offline
                } else if age > staleness.warning_after.as_secs() && node.status == NodeStatus::Online {
                    NodeStatus::Warning
                } else {
                    node.status
                };
                if next != node.status {
                    info!("[registry] node {} is now {:?} (silent for {}s)", node.hostname, next, age);
                    node.status = next;
                    changed += 1;
                }
            }
            if changed > 0 {
                self.publish(&map);
            }
            changed
        };

        if changed > 0 {
            if let Err(e) = self.save_nodes().await {
                error!("[registry] failed to save after staleness sweep: {}", e);
            }
        }
        changed
    }

    /// Runs the staleness sweep on its own timer until `shutdown` flips.
    pub fn start_staleness_sweep(
        registry: SharedFleetRegistry,
        staleness: Staleness,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        info!(
            "[registry] staleness sweep every {:?} (warning {:?}, offline {:?})",
            every, staleness.warning_after, staleness.offline_after
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.sweep_stale(OffsetDateTime::now_utc(), staleness).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("[registry] staleness sweep stopped");
        })
    }

    /// Pushes the full table. Callers hold the write guard: `try_send` never
    /// blocks, and two writers cannot enqueue their snapshots out of order.
    fn publish(&self, map: &NodesMap) {
        if let Some(sessions) = &self.sessions {
            sessions.publish_nodes(map.values().cloned().collect());
        }
    }
}

fn clamp_load(load: f32) -> f32 {
    load.clamp(0.0, 100.0)
}

pub type SharedFleetRegistry = Arc<FleetRegistry>;
