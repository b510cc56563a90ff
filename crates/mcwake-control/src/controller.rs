use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use mcwake_lifecycle::{
    ControlCommand, ControlPlaneResult, LifecycleStatus, OccupancySample, OperationId,
    ProgressPhase, ProgressUpdate,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{PollPolicy, ProbeConfig, WatchdogPolicy};
use crate::control_plane::ControlPlane;
use crate::error::{ErrorKind, LifecycleError, Result};
use crate::probe::GameProbe;
use crate::progress::ProgressSink;
use crate::state::SharedLifecycleState;
use crate::watchdog::{self, ActiveWatchdog, WatchdogExit, WatchdogSession};

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerSettings {
    pub poll: PollPolicy,
    pub watchdog: WatchdogPolicy,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// Short-circuited on a host already confirmed live; nothing was sent.
    AlreadyRunning { ip: String },
    Started { ip: String },
}

impl StartOutcome {
    pub fn ip(&self) -> &str {
        match self {
            Self::AlreadyRunning { ip } | Self::Started { ip } => ip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GameReachability {
    Online(OccupancySample),
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: LifecycleStatus,
    pub ip: Option<String>,
    pub game: Option<GameReachability>,
}

impl StatusReport {
    pub fn render(&self) -> String {
        match &self.game {
            Some(GameReachability::Online(s)) => format!(
                "Minecraft Server {}, protocol version {}\ndescription: {}\n{}/{} players online\nplayers: {}\n",
                s.version_name,
                s.protocol_version,
                s.motd,
                s.player_count,
                s.max_players,
                s.players.join(", ")
            ),
            Some(GameReachability::Unreachable) => {
                "Server is on but Minecraft is not yet reachable.".to_string()
            }
            None => match self.status {
                LifecycleStatus::Stopped => "Server is off.".to_string(),
                ref other => format!("Server is {other}."),
            },
        }
    }
}

/// Drives start/stop/status against the control plane and owns the idle watchdog.
#[derive(Clone)]
pub struct LifecycleController {
    control_plane: Arc<dyn ControlPlane>,
    probe: Arc<dyn GameProbe>,
    state: SharedLifecycleState,
    settings: ControllerSettings,
    start_gate: Arc<tokio::sync::Mutex<()>>,
    watchdog: Arc<Mutex<Option<ActiveWatchdog>>>,
    next_session: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl LifecycleController {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        probe: Arc<dyn GameProbe>,
        state: SharedLifecycleState,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            control_plane,
            probe,
            state,
            settings,
            start_gate: Arc::new(tokio::sync::Mutex::new(())),
            watchdog: Arc::new(Mutex::new(None)),
            next_session: Arc::new(AtomicU64::new(1)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> &SharedLifecycleState {
        &self.state
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn pause(&self, d: Duration) -> Result<()> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(LifecycleError::Cancelled),
            _ = tokio::time::sleep(d) => Ok(()),
        }
    }

    pub(crate) async fn probe_host(&self, ip: &str) -> Result<OccupancySample> {
        self.probe
            .ping(ip, self.settings.probe.port, self.settings.probe.timeout)
            .await
    }

    /// Boots the host and waits until the game server answers, then arms the
    /// idle watchdog. Concurrent calls are serialized.
    pub async fn start(&self, op: &OperationId, sink: Arc<dyn ProgressSink>) -> Result<StartOutcome> {
        let _gate = self.start_gate.lock().await;

        if let Some(ip) = self.state.resume_live() {
            tracing::info!(op_id = %op, %ip, "start short-circuited, host already live");
            // A stop that timed out or failed left the host unguarded.
            if self.watchdog_target().is_none() {
                self.arm_watchdog(ip.clone(), sink.clone());
            }
            sink.emit(ProgressUpdate::new(
                op,
                ProgressPhase::Converged,
                format!("Minecraft server already started. IP: {ip}"),
            ))
            .await;
            return Ok(StartOutcome::AlreadyRunning { ip });
        }

        sink.emit(ProgressUpdate::new(op, ProgressPhase::Deferred, "Starting Minecraft..."))
            .await;

        let initial = match self.control_plane.invoke(ControlCommand::Start).await {
            Err(e) if e.kind() == ErrorKind::ControlPlaneUnavailable => {
                tracing::error!(op_id = %op, error = %e, "start command failed");
                sink.emit(ProgressUpdate::new(
                    op,
                    ProgressPhase::Failed,
                    format!("Failed to start Minecraft: {e}"),
                ))
                .await;
                return Err(e);
            }
            other => other,
        };

        self.state.begin_start();
        tracing::info!(op_id = %op, "start issued, waiting for instance and game server");

        let mut last_label = String::new();
        let mut observed = Some(initial);
        let policy = self.settings.poll;

        for attempt in 0..=policy.max_polls {
            if attempt > 0 {
                if let Err(e) = self.pause(policy.interval).await {
                    return self.fail_start(op, &sink, e).await;
                }
                observed = Some(self.control_plane.invoke(ControlCommand::Start).await);
            }

            let Some(result) = observed.take() else {
                continue;
            };
            let label = match result {
                Ok(result) => match self.check_started(op, attempt, &result).await {
                    Some(ip) => return Ok(self.converge_started(op, sink, ip).await),
                    None => describe_start_poll(&result),
                },
                Err(e) => {
                    // A bad poll is not fatal, the next one may succeed.
                    tracing::warn!(op_id = %op, attempt, error = %e, "start poll failed");
                    continue;
                }
            };

            if label != last_label {
                sink.emit(ProgressUpdate::new(
                    op,
                    ProgressPhase::Progress,
                    format!("{label} (check {attempt}/{})", policy.max_polls),
                ))
                .await;
                last_label = label;
            }
        }

        self.fail_start(
            op,
            &sink,
            LifecycleError::StartTimeout {
                polls: policy.max_polls,
            },
        )
        .await
    }

    /// Running at the infrastructure level is not enough; the game process
    /// must also answer.
    async fn check_started(
        &self,
        op: &OperationId,
        attempt: u32,
        result: &ControlPlaneResult,
    ) -> Option<String> {
        let ip = result.running_ip()?;
        match self.probe_host(ip).await {
            Ok(_) => Some(ip.to_string()),
            Err(e) => {
                tracing::debug!(op_id = %op, attempt, %ip, error = %e, "instance running, game server not answering yet");
                None
            }
        }
    }

    async fn converge_started(
        &self,
        op: &OperationId,
        sink: Arc<dyn ProgressSink>,
        ip: String,
    ) -> StartOutcome {
        self.state.converge_started(&ip);
        tracing::info!(op_id = %op, %ip, "start converged");
        // Armed before the emit so a stop racing the notification can cancel it.
        self.arm_watchdog(ip.clone(), sink.clone());
        sink.emit(ProgressUpdate::new(
            op,
            ProgressPhase::Converged,
            format!("Started Minecraft, IP: {ip}"),
        ))
        .await;
        StartOutcome::Started { ip }
    }

    async fn fail_start(
        &self,
        op: &OperationId,
        sink: &Arc<dyn ProgressSink>,
        err: LifecycleError,
    ) -> Result<StartOutcome> {
        self.state.start_failed();
        let text = match &err {
            LifecycleError::StartTimeout { polls } => {
                format!("Failed to start Minecraft after {polls} checks.")
            }
            LifecycleError::Cancelled => "Start of Minecraft was cancelled.".to_string(),
            other => format!("Failed to start Minecraft: {other}"),
        };
        tracing::warn!(op_id = %op, error = %err, "start did not converge");
        sink.emit(ProgressUpdate::new(op, ProgressPhase::Failed, text))
            .await;
        Err(err)
    }

    /// Manual stop: supersedes any active watchdog, then waits for the
    /// instance to report stopped. Safe to run concurrently with another stop.
    pub async fn stop(&self, op: &OperationId, sink: Arc<dyn ProgressSink>) -> Result<()> {
        self.state.request_shutdown();
        self.cancel_watchdog();
        self.run_stop(op, sink).await
    }

    /// Watchdog checkpoint: stops only when no manual stop got there first.
    pub(crate) async fn stop_unless_superseded(
        &self,
        op: &OperationId,
        sink: Arc<dyn ProgressSink>,
    ) -> Option<Result<()>> {
        if self.state.request_shutdown() {
            return None;
        }
        Some(self.run_stop(op, sink).await)
    }

    async fn run_stop(&self, op: &OperationId, sink: Arc<dyn ProgressSink>) -> Result<()> {
        sink.emit(ProgressUpdate::new(op, ProgressPhase::Deferred, "Stopping Minecraft..."))
            .await;

        let initial = match self.control_plane.invoke(ControlCommand::Stop).await {
            Err(e) if e.kind() == ErrorKind::ControlPlaneUnavailable => {
                tracing::error!(op_id = %op, error = %e, "stop command failed");
                sink.emit(ProgressUpdate::new(
                    op,
                    ProgressPhase::Failed,
                    format!("Failed to stop Minecraft: {e}"),
                ))
                .await;
                return Err(e);
            }
            other => other,
        };
        tracing::info!(op_id = %op, "stop issued, waiting for instance to stop");

        let policy = self.settings.poll;
        let mut observed = Some(initial);
        let mut last_status: Option<LifecycleStatus> = None;

        for attempt in 0..=policy.max_polls {
            if attempt > 0 {
                if let Err(e) = self.pause(policy.interval).await {
                    return self.fail_stop(op, &sink, e).await;
                }
                observed = Some(self.control_plane.invoke(ControlCommand::Stop).await);
            }

            match observed.take() {
                Some(Ok(result)) if result.status == LifecycleStatus::Stopped => {
                    self.state.converge_stopped();
                    // Whatever was guarding the host is stale now.
                    self.cancel_watchdog();
                    tracing::info!(op_id = %op, attempt, "stop converged");
                    sink.emit(ProgressUpdate::new(op, ProgressPhase::Converged, "Stopped Minecraft"))
                        .await;
                    return Ok(());
                }
                Some(Ok(result)) => {
                    if last_status.as_ref() != Some(&result.status) {
                        sink.emit(ProgressUpdate::new(
                            op,
                            ProgressPhase::Progress,
                            format!("Instance {} (check {attempt}/{})", result.status, policy.max_polls),
                        ))
                        .await;
                        last_status = Some(result.status);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(op_id = %op, attempt, error = %e, "stop poll failed");
                }
                None => {}
            }
        }

        self.fail_stop(
            op,
            &sink,
            LifecycleError::StopTimeout {
                polls: policy.max_polls,
            },
        )
        .await
    }

    /// State stays as last observed; callers should query before retrying.
    async fn fail_stop(
        &self,
        op: &OperationId,
        sink: &Arc<dyn ProgressSink>,
        err: LifecycleError,
    ) -> Result<()> {
        let text = match &err {
            LifecycleError::StopTimeout { polls } => {
                format!("Failed to stop Minecraft after {polls} checks.")
            }
            LifecycleError::Cancelled => "Stop of Minecraft was cancelled.".to_string(),
            other => format!("Failed to stop Minecraft: {other}"),
        };
        tracing::warn!(op_id = %op, error = %err, "stop did not converge");
        sink.emit(ProgressUpdate::new(op, ProgressPhase::Failed, text))
            .await;
        Err(err)
    }

    /// One control-plane query, plus a probe when an address is known.
    pub async fn query_status(&self, op: &OperationId) -> Result<StatusReport> {
        let result = self.control_plane.invoke(ControlCommand::QueryStatus).await?;

        let ip = self
            .state
            .cached_ip()
            .or_else(|| result.running_ip().map(|ip| ip.to_string()));

        let game = match &ip {
            None => None,
            Some(ip) => Some(match self.probe_host(ip).await {
                Ok(sample) => GameReachability::Online(sample),
                Err(e) => {
                    tracing::debug!(op_id = %op, %ip, error = %e, "status probe failed");
                    GameReachability::Unreachable
                }
            }),
        };

        tracing::debug!(op_id = %op, status = %result.status, ip = ip.as_deref().unwrap_or(""), "status queried");
        Ok(StatusReport {
            status: result.status,
            ip,
            game,
        })
    }

    /// Starts a watchdog session unless a stop has been requested.
    ///
    /// The shutdown flag is read while holding the slot lock. A stop sets the
    /// flag before it empties the slot, so it either sees this session and
    /// cancels it or this call sees the flag and arms nothing.
    fn arm_watchdog(&self, ip: String, sink: Arc<dyn ProgressSink>) {
        let mut slot = self.watchdog.lock().unwrap_or_else(|e| e.into_inner());
        if self.state.manual_shutdown_requested() {
            tracing::info!(%ip, "stop requested, idle watchdog not armed");
            return;
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let session = WatchdogSession::new(id, ip.clone(), cancel.clone());
        let task = tokio::spawn(watchdog::run(
            self.clone(),
            session,
            sink,
            self.settings.watchdog,
        ));
        if let Some(prev) = slot.replace(ActiveWatchdog::new(id, ip, cancel, task)) {
            tracing::debug!(session = prev.id(), "replacing previous idle watchdog");
            prev.cancel();
        }
    }

    fn cancel_watchdog(&self) {
        let prev = self
            .watchdog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(prev) = prev {
            tracing::info!(session = prev.id(), ip = prev.ip(), "cancelling idle watchdog");
            prev.cancel();
        }
    }

    pub(crate) fn clear_watchdog(&self, id: u64) {
        let mut slot = self.watchdog.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|w| w.id() == id) {
            slot.take();
        }
    }

    /// Address the active watchdog is guarding, if any.
    pub fn watchdog_target(&self) -> Option<String> {
        self.watchdog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|w| w.ip().to_string())
    }

    /// Waits for the active watchdog task to finish.
    pub async fn join_watchdog(&self) -> Option<WatchdogExit> {
        let task = self
            .watchdog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
            .and_then(|w| w.take_task())?;
        task.await.ok()
    }

    /// Cooperative termination for process shutdown.
    pub async fn shutdown(&self) -> Option<WatchdogExit> {
        self.shutdown.cancel();
        self.join_watchdog().await
    }
}

fn describe_start_poll(result: &ControlPlaneResult) -> String {
    match result.running_ip() {
        Some(ip) => format!("Instance running at {ip}, waiting for Minecraft"),
        None => format!("Instance {}", result.status),
    }
}
