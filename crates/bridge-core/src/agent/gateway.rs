use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::decision::{DecisionPoint, EventStamp};
use super::transport::AgentClient;
use super::wire::{parse_reply, request_line};
use super::ActionIntent;
use crate::error::AgentError;
use crate::protocol::SequencedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTransport {
    Tcp,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub transport: AgentTransport,
    /// `host:port` for tcp, full URL for http.
    pub addr: String,
    pub timeout_ms: u64,
    pub unavailable_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            transport: AgentTransport::Tcp,
            addr: "127.0.0.1:28680".to_string(),
            timeout_ms: 8_000,
            unavailable_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Queries the agent for one decision at a time. Every query races the transport, a timeout,
/// and the latest-event watch; the first one to finish decides the outcome.
#[derive(Clone)]
pub struct AgentGateway {
    client: Arc<dyn AgentClient>,
    cfg: AgentConfig,
    latest: watch::Receiver<EventStamp>,
}

/// Resolves once `latest` moves past `decision`. Never resolves if the sender is gone.
async fn superseded(latest: &mut watch::Receiver<EventStamp>, decision: &DecisionPoint) {
    loop {
        if !decision.is_current(*latest.borrow_and_update()) {
            return;
        }
        if latest.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl AgentGateway {
    pub fn new(
        client: Arc<dyn AgentClient>,
        cfg: AgentConfig,
        latest: watch::Receiver<EventStamp>,
    ) -> Self {
        Self {
            client,
            cfg,
            latest,
        }
    }

    pub async fn query(
        &self,
        log: &[SequencedEvent],
        decision: &DecisionPoint,
    ) -> Result<ActionIntent, AgentError> {
        let request = request_line(decision)
            .map_err(|e| AgentError::Unavailable(format!("encode request: {e}")))?;
        let timeout = self.cfg.timeout();
        let mut latest = self.latest.clone();
        let mut attempt = 0u32;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = superseded(&mut latest, decision) => Err(AgentError::Superseded),
                res = tokio::time::timeout(timeout, self.client.exchange(decision.epoch, log, &request)) => match res {
                    Err(_) => Err(AgentError::Timeout(timeout)),
                    Ok(Err(e)) => Err(AgentError::Unavailable(format!("{e:#}"))),
                    Ok(Ok(line)) => Ok(line),
                },
            };

            match outcome {
                Ok(line) => {
                    if !decision.is_current(*latest.borrow()) {
                        warn!(
                            "agent.reply.late epoch={} seq={} line={}",
                            decision.epoch,
                            decision.seq,
                            line.trim()
                        );
                        return Err(AgentError::Superseded);
                    }
                    let reply = parse_reply(&line, decision).map_err(|e| {
                        error!(
                            "agent.reply.invalid seq={} error={e} line={}",
                            decision.seq,
                            line.trim()
                        );
                        AgentError::InvalidReply(e.to_string())
                    })?;
                    debug!(
                        "agent.reply seq={} action={}",
                        decision.seq,
                        reply.action.kind().name()
                    );
                    return Ok(ActionIntent {
                        decision: decision.clone(),
                        action: reply.action,
                        evaluation: reply.evaluation,
                    });
                }
                Err(AgentError::Unavailable(reason)) if attempt < self.cfg.unavailable_retries => {
                    attempt += 1;
                    warn!(
                        "agent.unavailable attempt={attempt} max={} reason={reason}",
                        self.cfg.unavailable_retries
                    );
                    let backoff = Duration::from_millis(self.cfg.retry_backoff_ms);
                    tokio::select! {
                        biased;
                        _ = superseded(&mut latest, decision) => return Err(AgentError::Superseded),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => {
                    warn!("agent.query.failed seq={} error={err}", decision.seq);
                    return Err(err);
                }
            }
        }
    }
}
