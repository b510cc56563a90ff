//! Game server reachability and occupancy via the Minecraft server list ping.

use std::time::Duration;

use async_trait::async_trait;
use mcwake_lifecycle::OccupancySample;
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::error::{LifecycleError, Result};

/// Any protocol number is accepted for a status exchange.
const HANDSHAKE_PROTOCOL_VERSION: i32 = -1;
const NEXT_STATE_STATUS: i32 = 1;
const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

#[async_trait]
pub trait GameProbe: Send + Sync {
    async fn ping(&self, ip: &str, port: u16, timeout: Duration) -> Result<OccupancySample>;
}

/// Speaks the status handshake over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerListPing;

#[async_trait]
impl GameProbe for ServerListPing {
    async fn ping(&self, ip: &str, port: u16, timeout: Duration) -> Result<OccupancySample> {
        let addr = format!("{ip}:{port}");
        let sample = match tokio::time::timeout(timeout, exchange(ip, port)).await {
            Ok(Ok(sample)) => sample,
            Ok(Err(message)) => return Err(LifecycleError::unreachable(addr, message)),
            Err(_) => {
                return Err(LifecycleError::unreachable(
                    addr,
                    format!("no status response within {}ms", timeout.as_millis()),
                ));
            }
        };
        tracing::debug!(%addr, online = sample.player_count, "game server answered status ping");
        Ok(sample)
    }
}

async fn exchange(host: &str, port: u16) -> std::result::Result<OccupancySample, String> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| format!("connect: {e}"))?;

    let mut handshake = Vec::with_capacity(host.len() + 16);
    write_varint(&mut handshake, 0x00);
    write_varint(&mut handshake, HANDSHAKE_PROTOCOL_VERSION);
    write_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, NEXT_STATE_STATUS);

    let mut out = Vec::with_capacity(handshake.len() + 8);
    write_varint(&mut out, handshake.len() as i32);
    out.extend_from_slice(&handshake);
    // Status request: length 1, packet id 0.
    out.extend_from_slice(&[0x01, 0x00]);

    stream
        .write_all(&out)
        .await
        .map_err(|e| format!("send handshake: {e}"))?;
    stream.flush().await.map_err(|e| format!("send handshake: {e}"))?;

    let len = read_varint(&mut stream).await?;
    let len = usize::try_from(len).map_err(|_| format!("negative packet length {len}"))?;
    if len == 0 || len > MAX_RESPONSE_BYTES {
        return Err(format!("status packet length {len} out of range"));
    }
    let mut packet = vec![0u8; len];
    stream
        .read_exact(&mut packet)
        .await
        .map_err(|e| format!("read status: {e}"))?;

    let mut cursor = packet.as_slice();
    let packet_id = read_varint(&mut cursor).await?;
    if packet_id != 0x00 {
        return Err(format!("unexpected packet id {packet_id:#x}"));
    }
    let json_len = read_varint(&mut cursor).await?;
    let json_len =
        usize::try_from(json_len).map_err(|_| format!("negative string length {json_len}"))?;
    if json_len > cursor.len() {
        return Err("status string exceeds packet".to_string());
    }
    parse_status(&cursor[..json_len])
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut v = value as u32;
    loop {
        if v & !0x7F == 0 {
            buf.push(v as u8);
            return;
        }
        buf.push(((v & 0x7F) | 0x80) as u8);
        v >>= 7;
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

pub(crate) async fn read_varint<R: AsyncRead + Unpin>(r: &mut R) -> std::result::Result<i32, String> {
    let mut value: u32 = 0;
    for i in 0..5 {
        let b = r.read_u8().await.map_err(|e| format!("read varint: {e}"))?;
        value |= u32::from(b & 0x7F) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err("varint too long".to_string())
}

#[derive(Debug, Default, Deserialize)]
struct StatusVersion {
    #[serde(default)]
    name: String,
    #[serde(default)]
    protocol: i64,
}

#[derive(Debug, Default, Deserialize)]
struct StatusPlayer {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusPlayers {
    #[serde(default)]
    max: u32,
    #[serde(default)]
    online: u32,
    #[serde(default)]
    sample: Vec<StatusPlayer>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    version: StatusVersion,
    #[serde(default)]
    players: StatusPlayers,
    #[serde(default)]
    description: serde_json::Value,
}

fn parse_status(raw: &[u8]) -> std::result::Result<OccupancySample, String> {
    let status: StatusResponse =
        serde_json::from_slice(raw).map_err(|e| format!("parse status json: {e}"))?;

    let mut motd = String::new();
    flatten_description(&status.description, &mut motd);

    Ok(OccupancySample {
        reachable: true,
        player_count: status.players.online,
        max_players: status.players.max,
        players: status
            .players
            .sample
            .into_iter()
            .map(|p| p.name)
            .filter(|n| !n.is_empty())
            .collect(),
        motd: naturalize_motd(&motd),
        version_name: status.version.name,
        protocol_version: status.version.protocol,
    })
}

/// Chat components nest text under `extra`.
fn flatten_description(v: &serde_json::Value, out: &mut String) {
    match v {
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_description(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("text") {
                flatten_description(text, out);
            }
            if let Some(extra) = map.get("extra") {
                flatten_description(extra, out);
            }
        }
        _ => {}
    }
}

fn is_format_code(c: char) -> bool {
    matches!(c, '0'..='9' | 'a'..='f' | 'A'..='F' | 'k'..='o' | 'K'..='O' | 'r' | 'R')
}

/// Strips `§x` formatting codes, turns newlines into spaces and trims.
pub fn naturalize_motd(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => out.push(' '),
            '\u{00a7}' if chars.peek().is_some_and(|n| is_format_code(*n)) => {
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out.trim().to_string()
}
