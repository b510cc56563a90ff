use std::{net::SocketAddr, time::Duration};

use anyhow::Context;

const DEFAULT_FUNCTION_NAME: &str = "mc_operations";
const DEFAULT_REGION: &str = "ap-southeast-2";
pub const DEFAULT_GAME_PORT: u16 = 25565;

fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_trimmed(name).and_then(|v| v.parse::<u64>().ok())
}

fn env_millis(name: &str, default_ms: u64, min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(
        env_u64(name)
            .map(|v| v.clamp(min_ms, max_ms))
            .unwrap_or(default_ms),
    )
}

/// Bounded convergence polling shared by Start and Stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_polls: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_polls: 21,
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogPolicy {
    /// Quiet period before the first occupancy sample.
    pub grace: Duration,
    pub poll_interval: Duration,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    pub port: u16,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_GAME_PORT,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneConfig {
    pub function_name: String,
    pub region: String,
    /// Overrides the derived Lambda invoke URL.
    pub endpoint: Option<String>,
    pub instance_id: Option<String>,
    pub timeout: Duration,
}

impl ControlPlaneConfig {
    pub fn invoke_url(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        format!(
            "https://lambda.{}.amazonaws.com/2015-03-31/functions/{}/invocations",
            self.region,
            crate::sigv4::uri_encode(&self.function_name)
        )
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            function_name: DEFAULT_FUNCTION_NAME.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            instance_id: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub control_plane: ControlPlaneConfig,
    pub poll: PollPolicy,
    pub watchdog: WatchdogPolicy,
    pub probe: ProbeConfig,
    pub listen_addr: SocketAddr,
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let control_plane = ControlPlaneConfig {
            function_name: env_trimmed("MCWAKE_FUNCTION_NAME")
                .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string()),
            region: env_trimmed("MCWAKE_AWS_REGION")
                .or_else(|| env_trimmed("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: env_trimmed("MCWAKE_CONTROL_PLANE_URL"),
            instance_id: env_trimmed("MCWAKE_INSTANCE_ID"),
            timeout: env_millis("MCWAKE_CONTROL_TIMEOUT_MS", 30_000, 1000, 10 * 60_000),
        };

        let poll = PollPolicy {
            max_polls: env_u64("MCWAKE_MAX_POLLS")
                .map(|v| v.clamp(1, 1000) as u32)
                .unwrap_or(21),
            interval: env_millis("MCWAKE_POLL_INTERVAL_MS", 10_000, 100, 10 * 60_000),
        };

        let watchdog = WatchdogPolicy {
            grace: env_millis("MCWAKE_IDLE_GRACE_MS", 5 * 60_000, 1000, 24 * 60 * 60_000),
            poll_interval: env_millis("MCWAKE_IDLE_POLL_MS", 10 * 60_000, 1000, 24 * 60 * 60_000),
        };

        let port = match env_trimmed("MCWAKE_GAME_PORT") {
            None => DEFAULT_GAME_PORT,
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .with_context(|| format!("MCWAKE_GAME_PORT must be in 1..65535 (got {raw})"))?,
        };
        let probe = ProbeConfig {
            port,
            timeout: env_millis("MCWAKE_PROBE_TIMEOUT_MS", 5000, 250, 60_000),
        };

        let listen_raw =
            env_trimmed("MCWAKE_LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:8087".to_string());
        let listen_addr: SocketAddr = listen_raw
            .parse()
            .with_context(|| format!("parse MCWAKE_LISTEN_ADDR ({listen_raw})"))?;

        Ok(Self {
            control_plane,
            poll,
            watchdog,
            probe,
            listen_addr,
            webhook_url: env_trimmed("MCWAKE_WEBHOOK_URL"),
        })
    }
}
