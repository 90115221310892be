//! Synthetic security/operations events
//!
//! Stands in for a real log tail: each event tick rolls once against the
//! configured probability and, on a hit, picks a severity and a message from
//! a fixed catalogue. The remediation hint depends only on severity.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::Serialize;

pub const SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];

pub const MESSAGES: &[&str] = &[
    "User login successful",
    "Failed SSH attempt from 192.168.1.55",
    "Disk usage exceeded 85%",
    "Service \"nginx\" restarted",
    "Firewall dropped packet from external IP",
    "Backup completed successfully",
    "Memory fragmentation detected",
];

/// Body of `POST /logs/ingest`.
#[derive(Debug, Clone, Serialize)]
pub struct SyntheticEvent {
    pub severity: &'static str,
    pub device: String,
    pub message: String,
    pub suggestion: &'static str,
}

pub fn suggestion_for(severity: &str) -> &'static str {
    match severity {
        "critical" => "Immediate investigation required. Check firewall logs.",
        "high" => "Monitor closely. Potential security risk.",
        "medium" => "Review system performance benchmarks.",
        _ => "Routine activity. No action needed.",
    }
}

/// One event tick. `None` when the roll misses.
pub fn roll<R: Rng>(rng: &mut R, probability: f64, device: &str) -> Option<SyntheticEvent> {
    if rng.random::<f64>() >= probability {
        return None;
    }
    let severity = SEVERITIES[rng.random_range(0..SEVERITIES.len())];
    let text = MESSAGES[rng.random_range(0..MESSAGES.len())];
    Some(build_event(severity, device, text, Utc::now()))
}

fn build_event(severity: &'static str, device: &str, text: &str, at: DateTime<Utc>) -> SyntheticEvent {
    SyntheticEvent {
        severity,
        device: device.to_string(),
        message: format!("[{}] {}", at.to_rfc3339_opts(SecondsFormat::Millis, true), text),
        suggestion: suggestion_for(severity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn message_is_prefixed_with_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let event = build_event("high", "edge-01", "Disk usage exceeded 85%", at);
        assert_eq!(event.message, "[2026-03-01T12:00:00.000Z] Disk usage exceeded 85%");
        assert_eq!(event.suggestion, "Monitor closely. Potential security risk.");
    }

    #[test]
    fn suggestions_are_keyed_by_severity() {
        assert!(suggestion_for("critical").starts_with("Immediate"));
        assert!(suggestion_for("medium").starts_with("Review"));
        assert_eq!(suggestion_for("low"), suggestion_for("anything else"));
    }

    #[test]
    fn probability_bounds_are_respected() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            assert!(roll(&mut rng, 0.0, "edge-01").is_none());
        }
        for _ in 0..200 {
            let event = roll(&mut rng, 1.0, "edge-01").unwrap();
            assert!(SEVERITIES.contains(&event.severity));
            assert!(MESSAGES.iter().any(|m| event.message.ends_with(m)));
            assert_eq!(event.device, "edge-01");
        }
    }

    #[test]
    fn serializes_as_log_ingest_body() {
        let event = build_event("low", "edge-01", "User login successful", Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["severity"], "low");
        assert_eq!(json["device"], "edge-01");
        assert!(json["suggestion"].is_string());
    }
}
