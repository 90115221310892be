/**
 * REALTIME BROADCASTER - Fan-out of fleet, log and metrics updates
 *
 * ROLE:
 * Tracks connected dashboard sessions and pushes every update to all of them.
 * Owns no data: the registry and the stores publish here after each write.
 *
 * OPERATION:
 * - One bounded channel per session, created on subscribe
 * - Subscription dropped = session removed (tied to the connection lifetime)
 * - publish() copies the sender list, releases the lock, then try_send()s
 *   so a slow or dead session never blocks the others
 * - Per-session FIFO; nothing is promised across sessions
 */

use crate::models::{LogEvent, MetricsSample, Node};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Frame sent on the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RealtimeMessage {
    InfrastructureUpdate(Vec<Node>),
    NewLog(LogEvent),
    MetricsUpdate(MetricsSample),
}

impl RealtimeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeMessage::InfrastructureUpdate(_) => "infrastructure_update",
            RealtimeMessage::NewLog(_) => "new_log",
            RealtimeMessage::MetricsUpdate(_) => "metrics_update",
        }
    }
}

pub type SessionId = u64;
type Frame = Arc<RealtimeMessage>;

struct Inner {
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Handle on the session set. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// `buffer` = frames queued per session before it counts as slow.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Registers a new session. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner.sessions.write().insert(id, tx);
        debug!("[realtime] session {id} subscribed");
        Subscription {
            id,
            rx,
            manager: self.clone(),
        }
    }

    pub fn unsubscribe(&self, id: SessionId) {
        if self.inner.sessions.write().remove(&id).is_some() {
            debug!("[realtime] session {id} unsubscribed");
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Pushes one frame to every session, returns how many accepted it.
    pub fn publish(&self, message: RealtimeMessage) -> usize {
        let targets: Vec<(SessionId, mpsc::Sender<Frame>)> = self
            .inner
            .sessions
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let frame = Arc::new(message);
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("[realtime] session {id} is lagging, dropped {}", frame.kind());
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }
        for id in closed {
            self.unsubscribe(id);
        }
        delivered
    }

    pub fn publish_nodes(&self, nodes: Vec<Node>) -> usize {
        self.publish(RealtimeMessage::InfrastructureUpdate(nodes))
    }

    pub fn publish_log(&self, event: LogEvent) -> usize {
        self.publish(RealtimeMessage::NewLog(event))
    }

    pub fn publish_metrics(&self, sample: MetricsSample) -> usize {
        self.publish(RealtimeMessage::MetricsUpdate(sample))
    }
}

/// One dashboard session's inbox.
pub struct Subscription {
    id: SessionId,
    rx: mpsc::Receiver<Frame>,
    manager: SessionManager,
}

impl Subscription {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<RealtimeMessage>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<RealtimeMessage>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.manager.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeStatus, Severity};
    use time::OffsetDateTime;

    fn sample(cpu: f32) -> MetricsSample {
        MetricsSample {
            cpu_load: cpu,
            memory_usage: 40.0,
            network_rx: 0.0,
            network_tx: 0.0,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn every_session_gets_the_frame() {
        let sessions = SessionManager::new(8);
        let mut a = sessions.subscribe();
        let mut b = sessions.subscribe();
        assert_eq!(sessions.publish_metrics(sample(10.0)), 2);
        assert_eq!(a.recv().await.unwrap().kind(), "metrics_update");
        assert_eq!(b.recv().await.unwrap().kind(), "metrics_update");
    }

    #[tokio::test]
    async fn per_session_order_is_preserved() {
        let sessions = SessionManager::new(8);
        let mut sub = sessions.subscribe();
        for cpu in [1.0, 2.0, 3.0] {
            sessions.publish_metrics(sample(cpu));
        }
        for expected in [1.0, 2.0, 3.0] {
            match &*sub.recv().await.unwrap() {
                RealtimeMessage::MetricsUpdate(s) => assert_eq!(s.cpu_load, expected),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let sessions = SessionManager::new(8);
        let sub = sessions.subscribe();
        assert_eq!(sessions.session_count(), 1);
        drop(sub);
        assert_eq!(sessions.session_count(), 0);
        assert_eq!(sessions.publish_nodes(Vec::new()), 0);
    }

    #[test]
    fn slow_session_does_not_block_others() {
        let sessions = SessionManager::new(1);
        let _slow = sessions.subscribe();
        let mut fast = sessions.subscribe();

        assert_eq!(sessions.publish_metrics(sample(1.0)), 2);
        let _ = fast.try_recv();
        // slow inbox is full now, fast one still drains
        assert_eq!(sessions.publish_metrics(sample(2.0)), 1);
        assert!(fast.try_recv().is_some());
        assert_eq!(sessions.session_count(), 2);
    }

    #[test]
    fn frames_are_tagged_by_type() {
        let event = LogEvent {
            id: uuid::Uuid::nil(),
            severity: Severity::High,
            device: "node-a".into(),
            message: "disk full".into(),
            suggestion: None,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(RealtimeMessage::NewLog(event)).unwrap();
        assert_eq!(json["type"], "new_log");
        assert_eq!(json["data"]["severity"], "high");

        let node = Node {
            hostname: "node-a".into(),
            ip_address: "10.0.0.1".into(),
            region: None,
            status: NodeStatus::Online,
            load: 1.0,
            last_seen: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(RealtimeMessage::InfrastructureUpdate(vec![node])).unwrap();
        assert_eq!(json["type"], "infrastructure_update");
        assert_eq!(json["data"][0]["hostname"], "node-a");
    }
}
