//! Out-of-band telemetry channel.
//!
//! Dual-channel devices push one result datagram over UDP, independently of
//! their driver's exit. The listener must be bound before the driver spawns
//! so a message racing the process startup is never lost.
//!
//! Payload format: control characters (NUL/CR/LF) stripped, entries
//! separated by TAB, each entry a `key=value` pair. Values that parse as
//! numbers are stored numerically; a key matching the pass pattern is
//! renamed to the canonical `result` key and its value coerced to a boolean
//! (`1` means pass).

use serde_json::{Map, Number, Value};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::{ErrorCode, RunError};
use crate::report::RESULT_KEY;

/// Telemetry datagrams are short key=value records; anything bigger than
/// this is truncated by the receive buffer.
const MAX_DATAGRAM: usize = 8192;

/// A bound, not yet listening, telemetry endpoint.
#[derive(Debug)]
pub struct TelemetryListener {
    socket: UdpSocket,
}

impl TelemetryListener {
    /// Bind the receive endpoint. Must happen before the driver spawns.
    pub async fn bind(host: &str, port: u16) -> Result<Self, RunError> {
        let socket = UdpSocket::bind((host, port)).await.map_err(|err| {
            RunError::new(
                ErrorCode::UdpBind,
                format!("Failed to bind UDP {host}:{port}: {err}"),
            )
        })?;
        Ok(Self { socket })
    }

    /// The bound local port (relevant when configured as 0).
    pub fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|addr| addr.port())
    }

    /// Start listening: receive one datagram, parse it, and deliver the
    /// result map. The send is a oneshot, so the channel fires at most once;
    /// a message arriving after the receiver was dropped is discarded. The
    /// task itself is left to linger undetached once the step settles.
    pub fn listen(self) -> oneshot::Receiver<Map<String, Value>> {
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            match self.socket.recv(&mut buf).await {
                Ok(len) => {
                    info!("Received step results.");
                    let payload = String::from_utf8_lossy(&buf[..len]);
                    let _ = tx.send(parse_telemetry(&payload));
                }
                Err(err) => warn!("UDP error: {err}"),
            }
        });

        rx
    }
}

/// Parse a raw telemetry payload into a result map.
pub fn parse_telemetry(raw: &str) -> Map<String, Value> {
    let mut values = Map::new();
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\u{0}' | '\r' | '\n'))
        .collect();

    for entry in cleaned.trim().split('\t') {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }

        let number = parse_number(value);

        if key.contains("pass") || key.contains("result") {
            let key = key.replacen("pass", RESULT_KEY, 1);
            let passed = matches!(&number, Some(n) if n.as_f64() == Some(1.0));
            values.insert(key, Value::Bool(passed));
        } else {
            let value = match number {
                Some(number) => Value::Number(number),
                None => Value::String(value.to_string()),
            };
            values.insert(key.to_string(), value);
        }
    }

    values
}

/// Numeric coercion: integers stay integral so they serialize without a
/// trailing fraction.
fn parse_number(value: &str) -> Option<Number> {
    if let Ok(int) = value.parse::<i64>() {
        return Some(Number::from(int));
    }
    value.parse::<f64>().ok().and_then(Number::from_f64)
}
