use std::fmt;

/// Identifies one Start/Stop/Status invocation across log lines and progress updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Instance state as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Pending,
    Running,
    Stopping,
    Stopped,
    /// Any instance state name the controller has no transition for.
    Unknown(String),
}

impl LifecycleStatus {
    pub fn from_message(message: &str) -> Self {
        match message.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            _ => Self::Unknown(message.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    QueryStatus,
}

impl ControlCommand {
    /// Value of `requestType` on the wire.
    pub fn request_type(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::QueryStatus => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ControlPlaneResult {
    pub status: LifecycleStatus,
    pub ip_address: Option<String>,
    pub status_code: Option<i64>,
}

impl ControlPlaneResult {
    /// The instance address, only when the instance is running and reported one.
    pub fn running_ip(&self) -> Option<&str> {
        match self.status {
            LifecycleStatus::Running => self.ip_address.as_deref().filter(|ip| !ip.is_empty()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct OccupancySample {
    pub reachable: bool,
    pub player_count: u32,
    pub max_players: u32,
    pub players: Vec<String>,
    pub motd: String,
    pub version_name: String,
    pub protocol_version: i64,
}

impl OccupancySample {
    pub fn is_empty(&self) -> bool {
        self.player_count == 0 && self.players.is_empty()
    }
}

/// Persistent controller phase. `Querying` is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    #[default]
    Idle,
    Starting,
    Started,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Deferred,
    Progress,
    Converged,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProgressUpdate {
    pub operation: OperationId,
    pub phase: ProgressPhase,
    pub text: String,
}

impl ProgressUpdate {
    pub fn new(operation: &OperationId, phase: ProgressPhase, text: impl Into<String>) -> Self {
        Self {
            operation: operation.clone(),
            phase,
            text: text.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, ProgressPhase::Converged | ProgressPhase::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_is_non_empty() {
        let id = OperationId::new();
        assert!(!id.0.is_empty());
    }

    #[test]
    fn status_from_message_is_case_insensitive() {
        assert_eq!(LifecycleStatus::from_message("Running"), LifecycleStatus::Running);
        assert_eq!(LifecycleStatus::from_message(" stopped "), LifecycleStatus::Stopped);
    }

    #[test]
    fn unknown_status_keeps_instance_state_name() {
        let s = LifecycleStatus::from_message("shutting-down");
        assert_eq!(s, LifecycleStatus::Unknown("shutting-down".to_string()));
        assert_eq!(s.to_string(), "shutting-down");
    }

    #[test]
    fn running_ip_requires_running_status() {
        let mut r = ControlPlaneResult {
            status: LifecycleStatus::Pending,
            ip_address: Some("10.0.0.5".to_string()),
            status_code: Some(200),
        };
        assert_eq!(r.running_ip(), None);

        r.status = LifecycleStatus::Running;
        assert_eq!(r.running_ip(), Some("10.0.0.5"));

        r.ip_address = Some(String::new());
        assert_eq!(r.running_ip(), None);
    }

    #[test]
    fn sample_with_online_count_but_hidden_names_is_not_empty() {
        let s = OccupancySample {
            reachable: true,
            player_count: 2,
            ..Default::default()
        };
        assert!(!s.is_empty());
        assert!(OccupancySample::default().is_empty());
    }

    #[test]
    fn progress_phase_serializes_lowercase() {
        let u = ProgressUpdate::new(&OperationId::new(), ProgressPhase::Converged, "ok");
        let v = serde_json::to_value(&u).unwrap();
        assert_eq!(v["phase"], "converged");
        assert!(u.is_terminal());
    }
}
