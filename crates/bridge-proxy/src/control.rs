use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::decoder::{Direction, RawFrame};
use crate::orchestrator::{BridgeHandle, Mode};

pub const CONTROL_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ControlRequest {
    /// One captured frame from the capture side.
    Frame {
        seq: u64,
        direction: Direction,
        body_hex: String,
    },
    SetMode {
        mode: Mode,
    },
    Status {},
    Events {
        #[serde(default)]
        since: u64,
    },
}

fn parse_control_line(line: &str) -> anyhow::Result<ControlRequest> {
    let mut v: serde_json::Value =
        serde_json::from_str(line).with_context(|| "invalid json control request")?;

    let version = v.get("version").and_then(|v| v.as_u64());
    if let Some(version) = version
        && version != u64::from(CONTROL_PROTOCOL_VERSION)
    {
        anyhow::bail!(
            "unsupported control protocol version: {} (expected {})",
            version,
            CONTROL_PROTOCOL_VERSION
        );
    }
    if let serde_json::Value::Object(obj) = &mut v {
        obj.remove("version");
    }

    serde_json::from_value(v).with_context(|| "invalid json control request")
}

fn error_line(err: &anyhow::Error) -> String {
    serde_json::json!({ "ok": false, "error": format!("{err:#}") }).to_string()
}

async fn handle_control_json(req: ControlRequest, bridge: &BridgeHandle) -> anyhow::Result<String> {
    match req {
        ControlRequest::Frame {
            seq,
            direction,
            body_hex,
        } => {
            let bytes = hex::decode(body_hex.trim()).context("invalid body_hex")?;
            bridge
                .submit(RawFrame {
                    seq,
                    direction,
                    bytes,
                })
                .await?;
            Ok(serde_json::json!({ "ok": true, "op": "frame", "seq": seq }).to_string())
        }
        ControlRequest::SetMode { mode } => {
            let previous = bridge.set_mode(mode).await?;
            Ok(
                serde_json::json!({ "ok": true, "op": "set_mode", "mode": mode, "previous": previous })
                    .to_string(),
            )
        }
        ControlRequest::Status {} => {
            let status = bridge.status().await?;
            Ok(serde_json::json!({ "ok": true, "op": "status", "status": status }).to_string())
        }
        ControlRequest::Events { since } => {
            let events = bridge.events_since(since).await?;
            Ok(serde_json::json!({ "ok": true, "op": "events", "events": events }).to_string())
        }
    }
}

async fn serve_connection(socket: TcpStream, bridge: BridgeHandle) -> anyhow::Result<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut notices = bridge.subscribe_notices();

    loop {
        let out = tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("control read")? else {
                    break;
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let reply = match parse_control_line(trimmed) {
                    Ok(req) => handle_control_json(req, &bridge).await,
                    Err(err) => Err(err),
                };
                reply.unwrap_or_else(|err| {
                    warn!("control.request.failed error={err:#} line={trimmed}");
                    error_line(&err)
                })
            }
            notice = notices.recv() => match notice {
                Ok(notice) => serde_json::to_string(&notice).context("encode notice")?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("control.notices.lagged skipped={n}");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        write
            .write_all(format!("{out}\n").as_bytes())
            .await
            .context("control write")?;
    }
    Ok(())
}

/// Accepts capture and operator connections until the listener fails.
pub async fn serve_control(listener: TcpListener, bridge: BridgeHandle) -> anyhow::Result<()> {
    info!("control.listening addr={}", listener.local_addr()?);
    loop {
        let (socket, addr) = listener.accept().await.context("control accept")?;
        info!("control.accepted client={addr}");
        let bridge = bridge.clone();
        tokio::spawn(async move {
            match serve_connection(socket, bridge).await {
                Ok(()) => debug!("control.closed client={addr}"),
                Err(err) => warn!("control.closed client={addr} error={err:#}"),
            }
        });
    }
}
