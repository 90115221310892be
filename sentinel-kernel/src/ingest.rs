//! Ingestion gateway: applies a heterogeneous batch of agent events.
//!
//! Each event is handled on its own. A malformed event, or one whose writes
//! fail, is logged and skipped without touching the rest of the batch.

use crate::models::{IngestEvent, NewLogEvent, NodeUpdate};
use crate::registry::{FleetRegistry, RegistryError};
use crate::store::LogStore;
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub accepted: usize,
    pub rejected: usize,
}

pub async fn ingest_batch(registry: &FleetRegistry, logs: &LogStore, events: Vec<Value>) -> IngestOutcome {
    let mut outcome = IngestOutcome::default();
    for (index, raw) in events.into_iter().enumerate() {
        let event: IngestEvent = match serde_json::from_value(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("[ingest] event #{index} rejected: {e}");
                outcome.rejected += 1;
                continue;
            }
        };
        if apply_event(registry, logs, event).await {
            outcome.accepted += 1;
        } else {
            outcome.rejected += 1;
        }
    }
    debug!("[ingest] batch done: {} accepted, {} rejected", outcome.accepted, outcome.rejected);
    outcome
}

/// Returns false when a write the event asked for could not be applied.
async fn apply_event(registry: &FleetRegistry, logs: &LogStore, event: IngestEvent) -> bool {
    let mut ok = true;
    let hostname = event.hostname.as_deref().map(str::trim).filter(|h| !h.is_empty());

    if let Some(message) = event.message.as_ref().filter(|m| !m.trim().is_empty()) {
        let new = NewLogEvent {
            severity: event.severity,
            device: hostname.map(str::to_string),
            message: Some(message.clone()),
            suggestion: None,
            timestamp: event.timestamp,
        };
        if let Err(e) = logs.append(new) {
            warn!("[ingest] failed to append log from {:?}: {}", hostname, e);
            ok = false;
        }
    }

    if event.is_heartbeat() {
        match hostname {
            Some(host) => {
                let update = NodeUpdate::heartbeat(host, event.ip.clone(), event.load);
                match registry.upsert(update).await {
                    Ok(_) => {}
                    // the in-memory write landed, only the mirror is behind
                    Err(RegistryError::Store(e)) => {
                        warn!("[ingest] heartbeat from {} not persisted: {}", host, e);
                    }
                    Err(e) => {
                        warn!("[ingest] heartbeat from {} rejected: {}", host, e);
                        ok = false;
                    }
                }
            }
            None => {
                warn!("[ingest] heartbeat without hostname ignored");
                ok = false;
            }
        }
    }
    ok
}
