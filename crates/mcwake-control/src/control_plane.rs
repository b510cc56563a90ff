use anyhow::Context;
use async_trait::async_trait;
use mcwake_lifecycle::{ControlCommand, ControlPlaneResult};
use serde::Serialize;

use crate::config::ControlPlaneConfig;
use crate::decode;
use crate::error::{LifecycleError, Result};
use crate::sigv4::{self, Credentials, SigningRequest};

const MAX_ERROR_BODY_BYTES: usize = 512;

/// Remote start/stop/status operation. Implementations are stateless and
/// safe to call concurrently; failures are never retried here.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn invoke(&self, command: ControlCommand) -> Result<ControlPlaneResult>;
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    #[serde(rename = "requestType")]
    request_type: &'static str,
    #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
    instance_id: Option<&'a str>,
}

fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Invokes the control-plane function over HTTPS, signing with SigV4 when
/// credentials are available.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    http: reqwest::Client,
    url: reqwest::Url,
    region: String,
    instance_id: Option<String>,
    credentials: Option<Credentials>,
}

impl HttpControlPlane {
    pub fn new(config: &ControlPlaneConfig, credentials: Option<Credentials>) -> anyhow::Result<Self> {
        let raw = config.invoke_url();
        let url = reqwest::Url::parse(&raw).with_context(|| format!("parse control plane url {raw}"))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("build control plane http client")?;

        Ok(Self {
            http,
            url,
            region: config.region.clone(),
            instance_id: config.instance_id.clone(),
            credentials,
        })
    }

    fn signing_host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn invoke(&self, command: ControlCommand) -> Result<ControlPlaneResult> {
        let payload = serde_json::to_vec(&InvokeRequest {
            request_type: command.request_type(),
            instance_id: self.instance_id.as_deref(),
        })
        .map_err(|e| LifecycleError::control_plane(format!("encode request: {e}")))?;

        let mut req = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(creds) = &self.credentials {
            let host = self.signing_host();
            let signed = sigv4::sign(
                creds,
                &SigningRequest {
                    method: "POST",
                    host: &host,
                    path: self.url.path(),
                    body: &payload,
                    region: &self.region,
                    service: "lambda",
                },
                chrono::Utc::now(),
            );
            for (name, value) in signed {
                req = req.header(name, value);
            }
        }

        let resp = req
            .body(payload)
            .send()
            .await
            .map_err(|e| LifecycleError::control_plane(format!("invoke {}: {e}", command.request_type())))?;

        let status = resp.status();
        let function_error = resp
            .headers()
            .get("x-amz-function-error")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| LifecycleError::control_plane(format!("read response: {e}")))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(LifecycleError::control_plane(format!(
                "invoke {} returned {status}: {}",
                command.request_type(),
                truncate_utf8(&text, MAX_ERROR_BODY_BYTES)
            )));
        }

        if let Some(kind) = function_error {
            tracing::warn!(command = command.request_type(), %kind, "control plane function reported an error");
        }

        let result = decode::decode(&bytes)?;
        tracing::debug!(
            command = command.request_type(),
            status = %result.status,
            ip = result.ip_address.as_deref().unwrap_or(""),
            "control plane invoked"
        );
        Ok(result)
    }
}
