use std::sync::{Arc, Mutex, MutexGuard};

use mcwake_lifecycle::ControllerPhase;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleSnapshot {
    pub current_ip: Option<String>,
    pub reachable: bool,
    pub manual_shutdown_requested: bool,
    pub phase: ControllerPhase,
}

/// Process-wide view of the host, shared by handle.
///
/// Every access is a short read-modify-write under one lock; nothing awaits
/// while holding it. Readers may observe slightly stale values, the control
/// plane stays authoritative.
#[derive(Debug, Clone, Default)]
pub struct SharedLifecycleState {
    inner: Arc<Mutex<LifecycleSnapshot>>,
}

impl SharedLifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.lock().clone()
    }

    /// The address of a host confirmed live by the last converged Start.
    pub fn live_ip(&self) -> Option<String> {
        let s = self.lock();
        if s.reachable {
            s.current_ip.clone().filter(|ip| !ip.is_empty())
        } else {
            None
        }
    }

    pub fn cached_ip(&self) -> Option<String> {
        self.lock().current_ip.clone().filter(|ip| !ip.is_empty())
    }

    pub fn manual_shutdown_requested(&self) -> bool {
        self.lock().manual_shutdown_requested
    }

    /// Like [`Self::live_ip`], but also takes the host back into the started
    /// phase, dropping any shutdown request left by a stop that never converged.
    pub(crate) fn resume_live(&self) -> Option<String> {
        let mut s = self.lock();
        let ip = s.current_ip.clone().filter(|ip| s.reachable && !ip.is_empty())?;
        s.manual_shutdown_requested = false;
        s.phase = ControllerPhase::Started;
        Some(ip)
    }

    pub(crate) fn begin_start(&self) {
        let mut s = self.lock();
        s.phase = ControllerPhase::Starting;
        s.manual_shutdown_requested = false;
    }

    pub(crate) fn converge_started(&self, ip: &str) {
        let mut s = self.lock();
        s.current_ip = Some(ip.to_string());
        s.reachable = true;
        s.phase = ControllerPhase::Started;
    }

    pub(crate) fn start_failed(&self) {
        let mut s = self.lock();
        s.current_ip = None;
        s.reachable = false;
        s.phase = ControllerPhase::Idle;
    }

    /// Marks a Stop as in flight; returns whether one was already requested.
    pub(crate) fn request_shutdown(&self) -> bool {
        let mut s = self.lock();
        let already = s.manual_shutdown_requested;
        s.manual_shutdown_requested = true;
        s.phase = ControllerPhase::Stopping;
        already
    }

    pub(crate) fn converge_stopped(&self) {
        let mut s = self.lock();
        s.current_ip = None;
        s.reachable = false;
        s.phase = ControllerPhase::Idle;
    }

    pub(crate) fn mark_unreachable(&self, ip: &str) {
        let mut s = self.lock();
        if s.current_ip.as_deref() == Some(ip) {
            s.reachable = false;
        }
    }
}
