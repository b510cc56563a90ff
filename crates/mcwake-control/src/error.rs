use std::result::Result as StdResult;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ControlPlaneUnavailable,
    MalformedResponse,
    Unreachable,
    StartTimeout,
    StopTimeout,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("control plane unavailable: {message}")]
    ControlPlaneUnavailable { message: String },

    #[error("malformed control plane response: {message}")]
    MalformedResponse { message: String },

    #[error("game server {addr} unreachable: {message}")]
    Unreachable { addr: String, message: String },

    #[error("instance did not converge to running after {polls} checks")]
    StartTimeout { polls: u32 },

    #[error("instance did not converge to stopped after {polls} checks")]
    StopTimeout { polls: u32 },

    #[error("operation cancelled")]
    Cancelled,
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ControlPlaneUnavailable { .. } => ErrorKind::ControlPlaneUnavailable,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Unreachable { .. } => ErrorKind::Unreachable,
            Self::StartTimeout { .. } => ErrorKind::StartTimeout,
            Self::StopTimeout { .. } => ErrorKind::StopTimeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn control_plane(message: impl Into<String>) -> Self {
        Self::ControlPlaneUnavailable {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub(crate) fn unreachable(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            addr: addr.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = StdResult<T, LifecycleError>;
