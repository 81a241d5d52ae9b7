use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::{TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::protocol::SequencedEvent;

/// Transport to a decision agent. `events` is the whole match log so far; `request` is the
/// control line that asks for a reply. Returns the raw reply line.
pub trait AgentClient: Send + Sync {
    fn exchange<'a>(
        &'a self,
        epoch: u64,
        events: &'a [SequencedEvent],
        request: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

fn encode_events(events: &[SequencedEvent], out: &mut String) -> anyhow::Result<()> {
    for event in events {
        out.push_str(&serde_json::to_string(event).context("encode event")?);
        out.push('\n');
    }
    Ok(())
}

struct LineConn {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    epoch: u64,
    /// Highest event seq already written for `epoch`.
    sent: u64,
    /// Requests written whose reply has not been read yet.
    outstanding: usize,
    /// A write was interrupted; the stream may hold a partial line.
    dirty: bool,
}

/// Persistent newline-delimited JSON connection. Events are streamed incrementally and replies
/// are matched to requests in FIFO order, so a reply to an abandoned request is read and
/// dropped before the current one.
pub struct LineAgent {
    addr: String,
    conn: Mutex<Option<LineConn>>,
}

impl LineAgent {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    async fn connect(&self) -> anyhow::Result<LineConn> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("connect agent {}", self.addr))?;
        info!("agent.connected addr={}", self.addr);
        let (read, write) = stream.into_split();
        Ok(LineConn {
            lines: BufReader::new(read).lines(),
            writer: write,
            epoch: 0,
            sent: 0,
            outstanding: 0,
            dirty: false,
        })
    }

    async fn exchange_on(
        conn: &mut LineConn,
        epoch: u64,
        events: &[SequencedEvent],
        request: &str,
    ) -> anyhow::Result<String> {
        if conn.epoch != epoch {
            conn.epoch = epoch;
            conn.sent = 0;
        }
        let fresh: Vec<SequencedEvent> = events
            .iter()
            .filter(|e| e.seq > conn.sent)
            .cloned()
            .collect();
        let mut payload = String::new();
        encode_events(&fresh, &mut payload)?;
        payload.push_str(request.trim_end());
        payload.push('\n');

        conn.dirty = true;
        conn.writer
            .write_all(payload.as_bytes())
            .await
            .context("agent write")?;
        conn.writer.flush().await.context("agent flush")?;
        conn.dirty = false;
        if let Some(last) = fresh.last() {
            conn.sent = last.seq;
        }
        conn.outstanding += 1;

        loop {
            let line = conn
                .lines
                .next_line()
                .await
                .context("agent read")?
                .ok_or_else(|| anyhow::anyhow!("agent connection closed"))?;
            if line.trim().is_empty() {
                continue;
            }
            conn.outstanding -= 1;
            if conn.outstanding == 0 {
                return Ok(line);
            }
            debug!("agent.reply.discarded pending={} line={line}", conn.outstanding);
        }
    }
}

impl AgentClient for LineAgent {
    fn exchange<'a>(
        &'a self,
        epoch: u64,
        events: &'a [SequencedEvent],
        request: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.conn.lock().await;
            if guard.as_ref().is_some_and(|c| c.dirty) {
                *guard = None;
            }
            if guard.is_none() {
                *guard = Some(self.connect().await?);
            }
            let Some(conn) = guard.as_mut() else {
                anyhow::bail!("agent connection unavailable");
            };
            let res = Self::exchange_on(conn, epoch, events, request).await;
            if res.is_err() {
                // Reconnect and resend the full log next time.
                *guard = None;
            }
            res
        })
    }
}

/// Stateless transport: every request POSTs the full event log plus the request line.
pub struct HttpAgent {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAgent {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl AgentClient for HttpAgent {
    fn exchange<'a>(
        &'a self,
        _epoch: u64,
        events: &'a [SequencedEvent],
        request: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut body = String::new();
            encode_events(events, &mut body)?;
            body.push_str(request.trim_end());
            body.push('\n');

            let text = self
                .client
                .post(&self.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body)
                .send()
                .await
                .context("agent request failed")?
                .error_for_status()
                .context("agent non-2xx response")?
                .text()
                .await
                .context("agent response read failed")?;
            text.lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("agent returned an empty body"))
        })
    }
}
