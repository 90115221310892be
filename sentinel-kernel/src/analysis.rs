/**
 * ANALYSIS PROXY - Delegates log classification, falls back locally
 *
 * ROLE:
 * Takes one uploaded log file and returns an AnalysisReport. The external
 * engine is tried first under a deadline; any failure (timeout, transport,
 * non-2xx, malformed body) switches to the local classifier.
 *
 * OPERATION:
 * - Upload streamed to a temporary artifact, removed on drop whatever path ran
 * - Remote call: multipart field `log`, bounded by `timeout`
 * - Fallback: pure function over the text, no I/O
 * - Both paths return the same shape, only `engine` differs
 */

use crate::models::{AnalysisReport, Engine, Issue, LineSeverity};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const FALLBACK_DEVICE: &str = "Node-Fallback";
pub const FALLBACK_SUGGESTION: &str =
    "Fix manually or wait for the analysis engine to come back online.";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("analysis engine answered HTTP {0}")]
    Status(u16),
    #[error("malformed analysis body: {0}")]
    Malformed(String),
    #[error("upload artifact error: {0}")]
    Io(#[from] std::io::Error),
}

/// Temporary copy of an upload on disk. Removed when dropped.
pub struct UploadArtifact {
    path: PathBuf,
    file_name: String,
    file: Option<tokio::fs::File>,
    size: u64,
}

impl UploadArtifact {
    pub async fn create(upload_dir: &Path, file_name: &str) -> Result<Self, AnalysisError> {
        tokio::fs::create_dir_all(upload_dir).await?;
        let path = upload_dir.join(format!("upload-{}", Uuid::new_v4()));
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file_name: file_name.to_string(),
            file: Some(file),
            size: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), AnalysisError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
            self.size += chunk.len() as u64;
        }
        Ok(())
    }

    /// Flushes and closes the file; the artifact stays until drop.
    pub async fn finish(&mut self) -> Result<(), AnalysisError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for UploadArtifact {
    fn drop(&mut self) {
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("[analysis] failed to remove {:?}: {}", self.path, e);
            }
        }
    }
}

/// Body accepted from the remote engine. Its own engine label is ignored.
#[derive(Debug, Deserialize)]
struct RemoteReport {
    summary: BTreeMap<LineSeverity, u64>,
    issues: Vec<Issue>,
}

pub struct AnalysisProxy {
    client: reqwest::Client,
    backend_url: String,
    timeout: Duration,
}

impl AnalysisProxy {
    pub fn new(backend_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend_url: backend_url.into(),
            timeout,
        }
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    /// Fails only when the stored upload cannot be read back; the fallback
    /// covers every delegation error.
    pub async fn analyze(&self, artifact: &UploadArtifact) -> Result<AnalysisReport, AnalysisError> {
        let content = tokio::fs::read(artifact.path()).await.map_err(|e| {
            error!("[analysis] cannot read upload {:?}: {}", artifact.path(), e);
            AnalysisError::Io(e)
        })?;
        Ok(self.analyze_bytes(artifact.file_name(), content).await)
    }

    pub async fn analyze_bytes(&self, file_name: &str, content: Vec<u8>) -> AnalysisReport {
        info!("[analysis] forwarding {} ({} bytes) to {}", file_name, content.len(), self.backend_url);
        match self.delegate(file_name, content.clone()).await {
            Ok(report) => report,
            Err(e) => {
                warn!("[analysis] remote engine unavailable ({}), using local fallback", e);
                classify(&String::from_utf8_lossy(&content))
            }
        }
    }

    /// Remote path under the deadline.
    pub async fn delegate(&self, file_name: &str, content: Vec<u8>) -> Result<AnalysisReport, AnalysisError> {
        let call = async {
            let part = Part::bytes(content)
                .file_name(file_name.to_string())
                .mime_str("text/plain")?;
            let form = Form::new().part("log", part);
            let response = self.client.post(&self.backend_url).multipart(form).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AnalysisError::Status(status.as_u16()));
            }
            let body = response.bytes().await?;
            Ok::<_, AnalysisError>(body)
        };

        let body = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AnalysisError::Timeout(self.timeout))??;
        parse_remote(&body)
    }
}

fn parse_remote(body: &[u8]) -> Result<AnalysisReport, AnalysisError> {
    let remote: RemoteReport =
        serde_json::from_slice(body).map_err(|e| AnalysisError::Malformed(e.to_string()))?;
    let mut report = AnalysisReport::empty(Engine::Remote);
    report.summary.extend(remote.summary);
    report.issues = remote.issues;
    if !report.is_consistent() {
        return Err(AnalysisError::Malformed(
            "summary does not match the reported issues".into(),
        ));
    }
    Ok(report)
}

/// Severity of one line: `error` beats `warn`, anything else is INFO.
pub fn classify_line(line: &str) -> LineSeverity {
    let lower = line.to_lowercase();
    if lower.contains("error") {
        LineSeverity::Error
    } else if lower.contains("warn") {
        LineSeverity::Warn
    } else {
        LineSeverity::Info
    }
}

/// Local classifier. Blank lines are skipped, every other line lands in
/// exactly one bucket, non-INFO lines become issues in file order.
pub fn classify(content: &str) -> AnalysisReport {
    let mut report = AnalysisReport::empty(Engine::Fallback);
    for line in content.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        let severity = classify_line(line);
        *report.summary.entry(severity).or_insert(0) += 1;
        if severity != LineSeverity::Info {
            report.issues.push(Issue {
                device: FALLBACK_DEVICE.to_string(),
                severity,
                message: line.to_string(),
                suggestion: FALLBACK_SUGGESTION.to_string(),
            });
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_line_scenario() {
        let report = classify("INFO ok\nERROR disk full\nWARN high load");
        assert_eq!(report.engine, Engine::Fallback);
        assert_eq!(report.count(LineSeverity::Info), 1);
        assert_eq!(report.count(LineSeverity::Warn), 1);
        assert_eq!(report.count(LineSeverity::Error), 1);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].severity, LineSeverity::Error);
        assert_eq!(report.issues[0].message, "ERROR disk full");
        assert_eq!(report.issues[1].severity, LineSeverity::Warn);
        assert!(report.is_consistent());
    }

    #[test]
    fn totals_match_non_blank_lines() {
        let content = "a\n\n   \nwarning: x\r\nAn Error occurred\n\ntrailing\n";
        let report = classify(content);
        let non_blank = content.lines().filter(|l| !l.trim().is_empty()).count() as u64;
        assert_eq!(report.total_lines(), non_blank);
        assert_eq!(report.issues[0].message, "warning: x");
    }

    #[test]
    fn error_wins_over_warn() {
        assert_eq!(classify_line("warn: previous error repeated"), LineSeverity::Error);
        assert_eq!(classify_line("WARNING low disk"), LineSeverity::Warn);
        assert_eq!(classify_line("all good"), LineSeverity::Info);
    }

    #[test]
    fn empty_upload_has_zeroed_summary() {
        let report = classify("");
        assert_eq!(report.total_lines(), 0);
        assert!(report.issues.is_empty());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["WARN"], 0);
    }

    #[test]
    fn remote_body_must_be_consistent() {
        let good = br#"{"summary":{"INFO":1,"WARN":0,"ERROR":1},"issues":[
            {"device":"Linux Backend","severity":"ERROR","message":"kernel error","suggestion":"x"}
        ],"engine":"Python-NLP-v6"}"#;
        let report = parse_remote(good).unwrap();
        assert_eq!(report.engine, Engine::Remote);
        assert_eq!(report.count(LineSeverity::Error), 1);

        let bad = br#"{"summary":{"INFO":0,"WARN":0,"ERROR":3},"issues":[]}"#;
        assert!(matches!(parse_remote(bad), Err(AnalysisError::Malformed(_))));
        assert!(matches!(parse_remote(b"<html>"), Err(AnalysisError::Malformed(_))));
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back() {
        // nothing listens on the discard port on loopback
        let proxy = AnalysisProxy::new("http://127.0.0.1:9/analysis/upload", Duration::from_secs(2));
        let report = proxy
            .analyze_bytes("app.log", b"INFO ok\nERROR disk full\nWARN high load".to_vec())
            .await;
        assert_eq!(report.engine, Engine::Fallback);
        assert_eq!(report.issues.len(), 2);
    }

    #[tokio::test]
    async fn artifact_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut artifact = UploadArtifact::create(dir.path(), "app.log").await.unwrap();
            artifact.write_chunk(b"ERROR boom\n").await.unwrap();
            artifact.finish().await.unwrap();
            assert_eq!(artifact.size(), 11);
            let proxy = AnalysisProxy::new("http://127.0.0.1:9/", Duration::from_secs(1));
            let report = proxy.analyze(&artifact).await.unwrap();
            assert_eq!(report.count(LineSeverity::Error), 1);
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unreadable_artifact_is_an_error_not_an_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = UploadArtifact::create(dir.path(), "app.log").await.unwrap();
        artifact.write_chunk(b"ERROR boom\n").await.unwrap();
        artifact.finish().await.unwrap();
        std::fs::remove_file(artifact.path()).unwrap();

        let proxy = AnalysisProxy::new("http://127.0.0.1:9/", Duration::from_secs(1));
        assert!(matches!(proxy.analyze(&artifact).await, Err(AnalysisError::Io(_))));
    }
}
