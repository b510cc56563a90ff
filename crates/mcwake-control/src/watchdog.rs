//! Idle watchdog: stops a started host once nobody has been on it for two
//! consecutive samples.

use std::{sync::Arc, time::Duration};

use mcwake_lifecycle::{OperationId, ProgressPhase, ProgressUpdate};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WatchdogPolicy;
use crate::controller::LifecycleController;
use crate::progress::ProgressSink;

const EMPTY_SAMPLES_BEFORE_STOP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogExit {
    /// Cancelled by a manual stop, a newer session or process shutdown.
    Cancelled,
    /// A manual stop had already been requested at the checkpoint.
    Superseded,
    /// The host stopped answering after it had been confirmed live.
    Unreachable,
    Stopped,
    StopFailed,
}

#[derive(Debug)]
pub struct WatchdogSession {
    pub id: u64,
    pub target_ip: String,
    pub consecutive_empty_samples: u32,
    cancel: CancellationToken,
}

impl WatchdogSession {
    pub fn new(id: u64, target_ip: String, cancel: CancellationToken) -> Self {
        Self {
            id,
            target_ip,
            consecutive_empty_samples: 0,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn sleep(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }
}

/// Handle kept by the controller for the one running session.
#[derive(Debug)]
pub(crate) struct ActiveWatchdog {
    id: u64,
    ip: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<WatchdogExit>>,
}

impl ActiveWatchdog {
    pub(crate) fn new(
        id: u64,
        ip: String,
        cancel: CancellationToken,
        task: JoinHandle<WatchdogExit>,
    ) -> Self {
        Self {
            id,
            ip,
            cancel,
            task: Some(task),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn ip(&self) -> &str {
        &self.ip
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn take_task(&mut self) -> Option<JoinHandle<WatchdogExit>> {
        self.task.take()
    }
}

fn describe(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let m = secs / 60;
        if m == 1 { "1 minute".to_string() } else { format!("{m} minutes") }
    } else if secs == 1 {
        "1 second".to_string()
    } else {
        format!("{secs} seconds")
    }
}

pub(crate) async fn run(
    controller: LifecycleController,
    mut session: WatchdogSession,
    sink: Arc<dyn ProgressSink>,
    policy: WatchdogPolicy,
) -> WatchdogExit {
    tracing::info!(
        session = session.id,
        ip = %session.target_ip,
        grace_secs = policy.grace.as_secs(),
        poll_secs = policy.poll_interval.as_secs(),
        "idle watchdog armed"
    );
    let exit = watch(&controller, &mut session, &sink, policy).await;
    controller.clear_watchdog(session.id);
    tracing::info!(session = session.id, ip = %session.target_ip, ?exit, "idle watchdog finished");
    exit
}

async fn watch(
    controller: &LifecycleController,
    session: &mut WatchdogSession,
    sink: &Arc<dyn ProgressSink>,
    policy: WatchdogPolicy,
) -> WatchdogExit {
    // Let the server settle before the first sample.
    if !session.sleep(policy.grace).await {
        return WatchdogExit::Cancelled;
    }

    loop {
        let sample = tokio::select! {
            _ = session.cancel.cancelled() => return WatchdogExit::Cancelled,
            r = controller.probe_host(&session.target_ip) => r,
        };

        match sample {
            Err(e) => {
                // A stop that landed while the probe was in flight explains the silence.
                if session.is_cancelled() {
                    return WatchdogExit::Cancelled;
                }
                if controller.state().manual_shutdown_requested() {
                    tracing::info!(session = session.id, "host down after manual stop, watchdog exits");
                    return WatchdogExit::Superseded;
                }
                tracing::warn!(session = session.id, ip = %session.target_ip, error = %e, "game server not reachable during idle check");
                controller.state().mark_unreachable(&session.target_ip);
                sink.emit(ProgressUpdate::new(
                    &OperationId::new(),
                    ProgressPhase::Failed,
                    format!(
                        "Minecraft server at {} not reachable during idle check, it must be down. Needs attention.",
                        session.target_ip
                    ),
                ))
                .await;
                return WatchdogExit::Unreachable;
            }
            Ok(s) if s.is_empty() => {
                session.consecutive_empty_samples += 1;
                tracing::debug!(session = session.id, empty = session.consecutive_empty_samples, "server empty");
            }
            Ok(s) => {
                if session.consecutive_empty_samples > 0 {
                    tracing::debug!(session = session.id, online = s.player_count, "players returned, idle countdown reset");
                }
                session.consecutive_empty_samples = 0;
            }
        }

        if session.consecutive_empty_samples >= EMPTY_SAMPLES_BEFORE_STOP {
            if session.is_cancelled() {
                return WatchdogExit::Cancelled;
            }
            return trigger_stop(controller, session, sink, policy).await;
        }

        if !session.sleep(policy.poll_interval).await {
            return WatchdogExit::Cancelled;
        }
    }
}

async fn trigger_stop(
    controller: &LifecycleController,
    session: &WatchdogSession,
    sink: &Arc<dyn ProgressSink>,
    policy: WatchdogPolicy,
) -> WatchdogExit {
    let op = OperationId::new();
    let quiet = describe(policy.poll_interval);

    // The superseded check and the shutdown flag flip happen under one lock.
    let Some(result) = controller
        .stop_unless_superseded(&op, sink.clone())
        .await
    else {
        tracing::info!(session = session.id, "already shut down manually, watchdog exits");
        return WatchdogExit::Superseded;
    };

    match result {
        Ok(()) => {
            tracing::info!(op_id = %op, ip = %session.target_ip, "idle host stopped");
            sink.emit(ProgressUpdate::new(
                &op,
                ProgressPhase::Converged,
                format!("Server left unattended for over {quiet}, shut down."),
            ))
            .await;
            WatchdogExit::Stopped
        }
        Err(e) => {
            tracing::error!(op_id = %op, ip = %session.target_ip, error = %e, "idle auto shutdown failed");
            sink.emit(ProgressUpdate::new(
                &op,
                ProgressPhase::Failed,
                format!("Server left unattended for over {quiet} BUT unable to auto shutdown. Needs attention."),
            ))
            .await;
            WatchdogExit::StopFailed
        }
    }
}
