//! HTTP client to the kernel
//!
//! Fire-and-forget: one POST per heartbeat or event, bounded by a request
//! timeout. No retry and no buffering; a failed send is simply reported back
//! to the caller.

use crate::discovery::HostIdentity;
use crate::events::SyntheticEvent;
use crate::metrics::LoadSample;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("kernel answered HTTP {0}")]
    Status(u16),
}

/// Body of `POST /infrastructure/register`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub hostname: String,
    pub ip_address: String,
    pub region: String,
    pub status: &'static str,
    pub load: f32,
    pub memory: f32,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
}

impl Heartbeat {
    pub fn new(identity: &HostIdentity, ip_address: String, region: &str, sample: LoadSample) -> Self {
        Self {
            hostname: identity.hostname.clone(),
            ip_address,
            region: region.to_string(),
            status: "online",
            load: sample.cpu,
            memory: sample.memory,
            platform: identity.platform.clone(),
            distro: identity.distro.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Reporter {
    client: reqwest::Client,
    base: String,
}

impl Reporter {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), ReportError> {
        self.post("/infrastructure/register", heartbeat).await
    }

    pub async fn send_event(&self, event: &SyntheticEvent) -> Result<(), ReportError> {
        self.post("/logs/ingest", event).await
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), ReportError> {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ReportError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn identity() -> HostIdentity {
        HostIdentity {
            hostname: "edge-01".into(),
            platform: "linux".into(),
            distro: None,
        }
    }

    /// One-shot HTTP responder; yields the raw request it received.
    async fn one_shot(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let reply = format!("{status_line}\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}");
            stream.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + length
    }

    #[test]
    fn heartbeat_uses_kernel_field_names() {
        let hb = Heartbeat::new(&identity(), "10.0.0.7".into(), "Remote-Office", LoadSample { cpu: 42.0, memory: 61.0 });
        let json = serde_json::to_value(&hb).unwrap();
        assert_eq!(json["hostname"], "edge-01");
        assert_eq!(json["ipAddress"], "10.0.0.7");
        assert_eq!(json["status"], "online");
        assert_eq!(json["load"], 42.0);
        assert!(json.get("distro").is_none());
    }

    #[tokio::test]
    async fn heartbeat_posts_to_register_route() {
        let (base, server) = one_shot("HTTP/1.1 201 Created").await;
        let reporter = Reporter::new(&format!("{base}/"), Duration::from_secs(2)).unwrap();
        let hb = Heartbeat::new(&identity(), "10.0.0.7".into(), "Remote-Office", LoadSample { cpu: 1.0, memory: 2.0 });

        reporter.send_heartbeat(&hb).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /infrastructure/register "));
        assert!(request.contains("\"ipAddress\":\"10.0.0.7\""));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (base, _server) = one_shot("HTTP/1.1 500 Internal Server Error").await;
        let reporter = Reporter::new(&base, Duration::from_secs(2)).unwrap();
        let event = crate::events::roll(&mut rand::rng(), 1.0, "edge-01").unwrap();
        assert!(matches!(reporter.send_event(&event).await, Err(ReportError::Status(500))));
    }

    #[tokio::test]
    async fn unreachable_kernel_is_a_transport_error() {
        let reporter = Reporter::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let hb = Heartbeat::new(&identity(), "10.0.0.7".into(), "Remote-Office", LoadSample { cpu: 0.0, memory: 0.0 });
        assert!(matches!(reporter.send_heartbeat(&hb).await, Err(ReportError::Transport(_))));
    }
}
