//! Control-plane response envelope.
//!
//! The function returns `{"statusCode": 200, "body": "<json string>"}` where
//! `body` is itself JSON text, so decoding takes two passes.

use mcwake_lifecycle::{ControlPlaneResult, LifecycleStatus};
use serde::Deserialize;

use crate::error::{LifecycleError, Result};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "statusCode", default)]
    status_code: Option<i64>,
    body: String,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "ipAddress", default)]
    ip_address: Option<String>,
}

pub fn decode(raw: &[u8]) -> Result<ControlPlaneResult> {
    let envelope: Envelope = serde_json::from_slice(raw)
        .map_err(|e| LifecycleError::malformed(format!("envelope: {e}")))?;

    let body: Body = serde_json::from_str(&envelope.body)
        .map_err(|e| LifecycleError::malformed(format!("body: {e}")))?;

    let message = body
        .message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| LifecycleError::malformed("body has no status message"))?;

    let status = LifecycleStatus::from_message(&message);
    let ip_address = match status {
        LifecycleStatus::Running => body
            .ip_address
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty()),
        _ => None,
    };

    Ok(ControlPlaneResult {
        status,
        ip_address,
        status_code: envelope.status_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn envelope(body: &str) -> Vec<u8> {
        serde_json::json!({ "statusCode": 200, "body": body })
            .to_string()
            .into_bytes()
    }

    #[test]
    fn decodes_running_with_ip() {
        let raw = envelope(r#"{"message":"running","ipAddress":"10.0.0.5"}"#);
        let r = decode(&raw).unwrap();
        assert_eq!(r.status, LifecycleStatus::Running);
        assert_eq!(r.running_ip(), Some("10.0.0.5"));
        assert_eq!(r.status_code, Some(200));
    }

    #[test]
    fn ip_is_dropped_unless_running() {
        let raw = envelope(r#"{"message":"pending","ipAddress":"10.0.0.5"}"#);
        let r = decode(&raw).unwrap();
        assert_eq!(r.status, LifecycleStatus::Pending);
        assert_eq!(r.ip_address, None);
    }

    #[test]
    fn unknown_instance_state_passes_through() {
        let raw = envelope(r#"{"message":"shutting-down"}"#);
        let r = decode(&raw).unwrap();
        assert_eq!(r.status, LifecycleStatus::Unknown("shutting-down".to_string()));
    }

    #[test]
    fn status_code_is_optional() {
        let raw = br#"{"body":"{\"message\":\"stopped\"}"}"#;
        let r = decode(raw).unwrap();
        assert_eq!(r.status, LifecycleStatus::Stopped);
        assert_eq!(r.status_code, None);
    }

    #[test]
    fn malformed_outer_envelope() {
        let cases: [&[u8]; 5] = [
            b"not json",
            b"",
            b"{}",
            b"[1,2]",
            br#"{"body":{"message":"running"}}"#,
        ];
        for raw in cases {
            let err = decode(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedResponse, "{raw:?}");
        }
    }

    #[test]
    fn malformed_inner_body() {
        for body in ["", "running", "{\"message\":", "[]"] {
            let err = decode(&envelope(body)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedResponse, "{body:?}");
        }
    }

    #[test]
    fn body_without_message_is_malformed() {
        let err = decode(&envelope(r#"{"ipAddress":"10.0.0.5"}"#)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn lambda_error_payload_is_malformed() {
        let raw = br#"{"errorMessage":"Task timed out","errorType":"Runtime.Timeout"}"#;
        assert_eq!(decode(raw).unwrap_err().kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn arbitrary_bytes_never_panic() {
        let alphabet = b"{}\":,[]bodymessage0123 \\";
        let mut seed = 0x2545_f491_u32;
        for len in 0..64 {
            let mut buf = Vec::with_capacity(len);
            for _ in 0..len {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                buf.push(alphabet[seed as usize % alphabet.len()]);
            }
            let _ = decode(&buf);
        }
    }
}
