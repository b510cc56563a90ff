//! Scripted control plane and probe used by the lifecycle tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mcwake_lifecycle::{ControlCommand, ControlPlaneResult, LifecycleStatus, OccupancySample};

use crate::control_plane::ControlPlane;
use crate::error::{LifecycleError, Result};
use crate::probe::GameProbe;

#[derive(Debug, Clone)]
pub enum Reply {
    Status(&'static str),
    Running(&'static str),
    Unavailable,
    Malformed,
}

impl Reply {
    fn build(&self) -> Result<ControlPlaneResult> {
        match self {
            Reply::Status(message) => Ok(ControlPlaneResult {
                status: LifecycleStatus::from_message(message),
                ip_address: None,
                status_code: Some(200),
            }),
            Reply::Running(ip) => Ok(ControlPlaneResult {
                status: LifecycleStatus::Running,
                ip_address: Some(ip.to_string()),
                status_code: Some(200),
            }),
            Reply::Unavailable => Err(LifecycleError::control_plane("connection reset")),
            Reply::Malformed => Err(LifecycleError::malformed("body: expected value")),
        }
    }
}

/// Pops replies in order; the last reply of each script repeats forever.
fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut q = queue.lock().unwrap();
    if q.len() > 1 { q.pop_front() } else { q.front().cloned() }
}

pub struct ScriptedControlPlane {
    start: Mutex<VecDeque<Reply>>,
    stop: Mutex<VecDeque<Reply>>,
    status: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<ControlCommand>>,
}

impl ScriptedControlPlane {
    pub fn new(start: Vec<Reply>, stop: Vec<Reply>) -> Self {
        Self {
            start: Mutex::new(start.into()),
            stop: Mutex::new(stop.into()),
            status: Mutex::new(VecDeque::from([Reply::Status("stopped")])),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_status(self, status: Vec<Reply>) -> Self {
        *self.status.lock().unwrap() = status.into();
        self
    }

    pub fn calls(&self, command: ControlCommand) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == command)
            .count()
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn invoke(&self, command: ControlCommand) -> Result<ControlPlaneResult> {
        self.calls.lock().unwrap().push(command);
        let queue = match command {
            ControlCommand::Start => &self.start,
            ControlCommand::Stop => &self.stop,
            ControlCommand::QueryStatus => &self.status,
        };
        match next(queue) {
            Some(reply) => reply.build(),
            None => Err(LifecycleError::control_plane("no scripted reply")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Sample {
    Players(&'static [&'static str]),
    Empty,
    Down,
}

pub struct ScriptedProbe {
    samples: Mutex<VecDeque<Sample>>,
    pings: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: Mutex::new(samples.into()),
            pings: AtomicUsize::new(0),
        }
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GameProbe for ScriptedProbe {
    async fn ping(&self, ip: &str, port: u16, _timeout: Duration) -> Result<OccupancySample> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match next(&self.samples).unwrap_or(Sample::Down) {
            Sample::Players(names) => Ok(OccupancySample {
                reachable: true,
                player_count: names.len() as u32,
                max_players: 20,
                players: names.iter().map(|n| n.to_string()).collect(),
                motd: "A Minecraft Server".to_string(),
                version_name: "1.20.4".to_string(),
                protocol_version: 765,
            }),
            Sample::Empty => Ok(OccupancySample {
                reachable: true,
                max_players: 20,
                motd: "A Minecraft Server".to_string(),
                version_name: "1.20.4".to_string(),
                protocol_version: 765,
                ..Default::default()
            }),
            Sample::Down => Err(LifecycleError::unreachable(
                format!("{ip}:{port}"),
                "connect: connection refused",
            )),
        }
    }
}
