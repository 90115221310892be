use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Node status. Only explicit writes (heartbeats, registration) and the
/// optional staleness sweep move a node between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Warning,
    Offline,
}

/// A monitored host, keyed by hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub hostname: String,
    pub ip_address: String,
    #[serde(default)]
    pub region: Option<String>,
    pub status: NodeStatus,
    pub load: f32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

/// Write applied to the registry. `None` fields keep the stored value on
/// update and take the default on creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub status: Option<NodeStatus>,
    #[serde(default)]
    pub load: Option<f32>,
}

impl NodeUpdate {
    /// Heartbeat form used by the ingest path: forces `online`.
    pub fn heartbeat(hostname: &str, ip: Option<String>, load: Option<f32>) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            ip_address: Some(ip.unwrap_or_else(|| "0.0.0.0".to_string())),
            region: None,
            status: Some(NodeStatus::Online),
            load: Some(load.unwrap_or(0.0)),
        }
    }
}

/// Log severity, ordered from least to most urgent.
///
/// Accepts the aliases `warn`/`warning` (medium) and `error` (high) so agents
/// speaking either vocabulary land in the same scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" | "warn" | "warning" => Ok(Severity::Medium),
            "high" | "error" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Immutable log observation. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub id: Uuid,
    pub severity: Severity,
    pub device: String,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Body of `POST /logs/ingest`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLogEvent {
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
    /// Event time reported by an agent. Only the ingest gateway sets it; the
    /// direct route always stamps receipt time.
    #[serde(skip_deserializing)]
    pub timestamp: Option<OffsetDateTime>,
}

/// One element of a `POST /ingest` batch.
///
/// Every field is optional and parsed leniently: a value of the wrong shape
/// counts as absent, so a bad `severity` never costs the heartbeat.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestEvent {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub hostname: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub load: Option<f32>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub severity: Option<Severity>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<OffsetDateTime>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// RFC 3339 string or epoch milliseconds.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use time::format_description::well_known::Rfc3339;

    let parsed = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => OffsetDateTime::parse(&s, &Rfc3339).ok(),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()),
        _ => None,
    };
    Ok(parsed)
}

impl IngestEvent {
    pub fn is_heartbeat(&self) -> bool {
        self.kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case("heartbeat"))
            .unwrap_or(false)
    }
}

/// System-wide sample pushed on `metrics_update` and kept as a time-series point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSample {
    pub cpu_load: f32,
    pub memory_usage: f32,
    pub network_rx: f64,
    pub network_tx: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Bucket used by the analysis engines (remote and fallback alike).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LineSeverity {
    Info,
    Warn,
    Error,
}

/// Which engine produced an [`AnalysisReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Remote,
    Fallback,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Remote => "remote",
            Engine::Fallback => "fallback",
        }
    }
}

/// LogEvent-shaped finding returned to the caller, not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub device: String,
    pub severity: LineSeverity,
    pub message: String,
    pub suggestion: String,
}

/// Result of one upload. Same shape whichever engine produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub summary: BTreeMap<LineSeverity, u64>,
    pub issues: Vec<Issue>,
    pub engine: Engine,
}

impl AnalysisReport {
    pub fn empty(engine: Engine) -> Self {
        let summary = [LineSeverity::Info, LineSeverity::Warn, LineSeverity::Error]
            .into_iter()
            .map(|s| (s, 0))
            .collect();
        Self {
            summary,
            issues: Vec::new(),
            engine,
        }
    }

    pub fn count(&self, severity: LineSeverity) -> u64 {
        self.summary.get(&severity).copied().unwrap_or(0)
    }

    pub fn total_lines(&self) -> u64 {
        self.summary.values().sum()
    }

    /// Every reported issue is counted in its bucket and no INFO line is
    /// reported as an issue.
    pub fn is_consistent(&self) -> bool {
        let reported = |sev| self.issues.iter().filter(|i| i.severity == sev).count() as u64;
        reported(LineSeverity::Info) == 0
            && reported(LineSeverity::Warn) == self.count(LineSeverity::Warn)
            && reported(LineSeverity::Error) == self.count(LineSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_aliases_and_order() {
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Medium);
        assert_eq!("error".parse::<Severity>().unwrap(), Severity::High);
        assert!("bogus".parse::<Severity>().is_err());
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn node_serializes_camel_case() {
        let node = Node {
            hostname: "node-a".into(),
            ip_address: "10.0.0.1".into(),
            region: None,
            status: NodeStatus::Online,
            load: 12.0,
            last_seen: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["ipAddress"], "10.0.0.1");
        assert_eq!(json["status"], "online");
        assert_eq!(json["lastSeen"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn ingest_event_tolerates_missing_fields() {
        let ev: IngestEvent =
            serde_json::from_str(r#"{"type":"heartbeat","hostname":"h1","extra":1}"#).unwrap();
        assert!(ev.is_heartbeat());
        assert!(ev.timestamp.is_none());
        assert!(ev.message.is_none());
    }

    #[test]
    fn report_summary_uses_uppercase_buckets() {
        let report = AnalysisReport::empty(Engine::Fallback);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["INFO"], 0);
        assert_eq!(json["summary"]["ERROR"], 0);
        assert_eq!(json["engine"], "fallback");
    }

    #[test]
    fn ingest_event_fields_degrade_to_absent() {
        let event: IngestEvent = serde_json::from_str(
            r#"{"type":"heartbeat","hostname":"node-a","load":"high","severity":"notice","timestamp":true}"#,
        )
        .unwrap();
        assert!(event.is_heartbeat());
        assert_eq!(event.hostname.as_deref(), Some("node-a"));
        assert_eq!(event.load, None);
        assert_eq!(event.severity, None);
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn ingest_timestamp_accepts_epoch_millis_and_rfc3339() {
        let millis: IngestEvent = serde_json::from_str(r#"{"timestamp":1700000000000}"#).unwrap();
        assert_eq!(millis.timestamp.unwrap().unix_timestamp(), 1_700_000_000);
        let text: IngestEvent = serde_json::from_str(r#"{"timestamp":"2023-11-14T22:13:20Z"}"#).unwrap();
        assert_eq!(text.timestamp, millis.timestamp);
    }

    #[test]
    fn direct_log_body_cannot_set_timestamp() {
        let new: NewLogEvent =
            serde_json::from_str(r#"{"message":"m","timestamp":"2099-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(new.timestamp, None);
    }
}
