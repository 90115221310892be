//! Log Store: append-only list of [`LogEvent`]s mirrored to `logs.json`.
//!
//! Every successful append is pushed to the realtime sessions as `new_log`.

use super::{load_json, save_json, HistoryQuery, StoreError};
use crate::broadcast::SessionManager;
use crate::models::{LogEvent, NewLogEvent, Severity};
use parking_lot::Mutex;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

pub struct LogStore {
    storage_path: PathBuf,
    cache: Mutex<Vec<LogEvent>>,
    sessions: Option<SessionManager>,
}

impl LogStore {
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        let events: Vec<LogEvent> = load_json(&storage_path)?;
        info!("[logs] loaded {} events from {:?}", events.len(), storage_path);
        Ok(Self {
            storage_path,
            cache: Mutex::new(events),
            sessions: None,
        })
    }

    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Validates, stamps and appends one event. Severity defaults to info,
    /// device to `unknown`, timestamp to now.
    pub fn append(&self, new: NewLogEvent) -> Result<LogEvent, StoreError> {
        let message = new
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| StoreError::Invalid("message is required".into()))?;

        let event = LogEvent {
            id: Uuid::new_v4(),
            severity: new.severity.unwrap_or(Severity::Info),
            device: new
                .device
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            message,
            suggestion: new.suggestion,
            timestamp: new.timestamp.unwrap_or_else(OffsetDateTime::now_utc),
        };

        {
            let mut cache = self.cache.lock();
            cache.push(event.clone());
            if let Err(e) = save_json(&self.storage_path, &*cache) {
                // keep memory and disk in step
                cache.pop();
                return Err(e);
            }
        }

        debug!("[logs] appended {} from {}", event.severity, event.device);
        if let Some(sessions) = &self.sessions {
            sessions.publish_log(event.clone());
        }
        Ok(event)
    }

    /// Most recently received first. Agent-reported timestamps are kept on
    /// the events but never reorder them.
    pub fn history(&self, query: &HistoryQuery, default_limit: usize) -> Vec<LogEvent> {
        self.cache
            .lock()
            .iter()
            .rev()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit_or(default_limit))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn new_event(message: &str) -> NewLogEvent {
        NewLogEvent {
            severity: None,
            device: None,
            message: Some(message.to_string()),
            suggestion: None,
            timestamp: None,
        }
    }

    #[test]
    fn append_applies_defaults_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        let store = LogStore::open(&path).unwrap();

        let event = store.append(new_event("backup done")).unwrap();
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.device, "unknown");

        let reopened = LogStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.history(&HistoryQuery::default(), 50)[0], event);
    }

    #[test]
    fn empty_message_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("logs.json")).unwrap();
        assert!(matches!(store.append(new_event("  ")), Err(StoreError::Invalid(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn history_is_newest_first_and_paged() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("logs.json")).unwrap();
        for i in 0..3 {
            store.append(new_event(&format!("event {i}"))).unwrap();
        }

        let all = store.history(&HistoryQuery::default(), 50);
        let messages: Vec<_> = all.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["event 2", "event 1", "event 0"]);

        let page = store.history(&HistoryQuery { limit: Some(1), offset: Some(1) }, 50);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].message, "event 1");
    }

    #[test]
    fn reported_timestamp_does_not_reorder_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("logs.json")).unwrap();
        let mut skewed = new_event("skewed clock");
        skewed.timestamp = Some(datetime!(2099-01-01 00:00 UTC));
        store.append(skewed).unwrap();
        store.append(new_event("just received")).unwrap();

        let history = store.history(&HistoryQuery::default(), 50);
        assert_eq!(history[0].message, "just received");
        assert_eq!(history[1].timestamp, datetime!(2099-01-01 00:00 UTC));
    }

    #[test]
    fn failed_save_rolls_the_append_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        let store = LogStore::open(&path).unwrap();
        store.append(new_event("kept")).unwrap();
        // a directory where the temp file goes makes the next save fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        assert!(store.append(new_event("lost")).is_err());
        assert_eq!(store.len(), 1);
        let history = store.history(&HistoryQuery::default(), 50);
        assert_eq!(history[0].message, "kept");
    }

    #[tokio::test]
    async fn append_is_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionManager::new(4);
        let mut sub = sessions.subscribe();
        let store = LogStore::open(dir.path().join("logs.json"))
            .unwrap()
            .with_sessions(sessions.clone());

        let event = store.append(new_event("disk full")).unwrap();
        match &*sub.recv().await.unwrap() {
            crate::broadcast::RealtimeMessage::NewLog(pushed) => assert_eq!(pushed, &event),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
