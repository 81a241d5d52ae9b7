//! Wires the pipeline together.
//!
//! Tasks:
//! - pipeline: the only writer of match state (gate, decode, tracker, emitter).
//! - decisions: queries the agent whenever a decision point is published.
//! - player: executes intents in autoplay mode.
//!
//! They talk through channels only: frames and intents over `mpsc`, canonical events and
//! notices over `broadcast`, snapshot, decision and mode over `watch`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tile_bridge_core::agent::{
    ActionIntent, AgentAction, AgentClient, AgentGateway, DecisionPoint, Evaluation, EventStamp,
    decision_point,
};
use tile_bridge_core::error::{AgentError, DecodeError, DesyncError};
use tile_bridge_core::message::{Envelope, TypedMessage};
use tile_bridge_core::player::{InputDispatcher, Player, PlayerEvent};
use tile_bridge_core::protocol::{CanonicalEvent, Emitter, SequencedEvent, Transition};
use tile_bridge_core::state::{MatchState, Phase, SnapshotView, Tracker, TrackerConfig};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::decoder::{RawFrame, decode};
use crate::gate::FrameGate;

pub use tile_bridge_core::player::Mode;

/// Pushed to every control connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum BridgeNotice {
    MatchStarted {
        epoch: u64,
        seat_count: u8,
        self_seat: u8,
    },
    MatchEnded {
        epoch: u64,
        scores: Vec<i32>,
    },
    ResyncRequested {
        epoch: u64,
        reason: String,
    },
    Recommendation {
        epoch: u64,
        seq: u64,
        action: AgentAction,
        evaluation: Evaluation,
        executed: bool,
    },
    Alert {
        error: String,
    },
    Player(PlayerEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub epoch: u64,
    pub last_seq: u64,
    pub phase: Phase,
    pub mode: Mode,
    pub frozen: bool,
    pub awaiting_resync: bool,
    pub call_window_open: bool,
    pub autoplay_available: bool,
    pub player_idle: bool,
    pub frames: FrameCounters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounters {
    pub received: u64,
    pub duplicate: u64,
    pub unsupported: u64,
    pub malformed: u64,
    /// Dropped while waiting for a full state broadcast.
    pub ignored: u64,
}

/// A decision point together with the log the agent needs to answer it.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub point: DecisionPoint,
    pub log: Arc<[SequencedEvent]>,
}

enum Query {
    Events {
        since: u64,
        reply: oneshot::Sender<Vec<SequencedEvent>>,
    },
    Status {
        reply: oneshot::Sender<Status>,
    },
}

/// Everything that belongs to one match. Replaced wholesale when a new match starts.
struct MatchContext {
    epoch: u64,
    tracker: Tracker,
    emitter: Emitter,
    gate: FrameGate,
    call_deadline: Option<Instant>,
    awaiting_resync: bool,
}

impl MatchContext {
    fn new(epoch: u64, cfg: TrackerConfig, gate: FrameGate) -> Self {
        Self {
            epoch,
            tracker: Tracker::new(cfg),
            emitter: Emitter::new(),
            gate,
            call_deadline: None,
            awaiting_resync: false,
        }
    }

    fn stamp(&self) -> EventStamp {
        EventStamp {
            epoch: self.epoch,
            seq: self.emitter.last_seq(),
        }
    }
}

struct Pipeline {
    ctx: MatchContext,
    tracker_cfg: TrackerConfig,
    call_window_timeout: Duration,
    counters: FrameCounters,
    mode: watch::Receiver<Mode>,
    player_idle: Option<watch::Receiver<bool>>,
    events: broadcast::Sender<SequencedEvent>,
    notices: broadcast::Sender<BridgeNotice>,
    snapshot: watch::Sender<SnapshotView>,
    latest: watch::Sender<EventStamp>,
    decisions: watch::Sender<Option<DecisionRequest>>,
}

impl Pipeline {
    fn notify(&self, notice: BridgeNotice) {
        let _ = self.notices.send(notice);
    }

    fn on_frame(&mut self, frame: RawFrame) {
        self.counters.received += 1;
        let Some(origin) = self.ctx.gate.admit(frame.seq, &frame.bytes) else {
            self.counters.duplicate += 1;
            return;
        };
        match decode(&frame) {
            Ok(decoded) => {
                debug!(
                    "bridge.frame seq={} fragment={} name={}",
                    origin.capture_seq,
                    origin.fragment,
                    decoded.name.as_str()
                );
                self.on_message(Envelope {
                    origin,
                    message: decoded.message,
                });
            }
            Err(DecodeError::Unsupported(what)) => {
                self.counters.unsupported += 1;
                debug!("bridge.frame.unsupported seq={} what={what}", frame.seq);
            }
            Err(err) => {
                self.counters.malformed += 1;
                warn!("bridge.frame.malformed seq={} error={err}", frame.seq);
                self.request_resync(err.to_string());
            }
        }
    }

    fn on_message(&mut self, env: Envelope) {
        let starts_match = matches!(env.message, TypedMessage::MatchStart { .. });
        if starts_match && self.ctx.tracker.state().phase != Phase::AwaitingMatchStart {
            self.reset_context();
        } else if self.ctx.awaiting_resync
            && !starts_match
            && !matches!(env.message, TypedMessage::Resync(_))
        {
            // The state is missing whatever the bad frame carried.
            self.counters.ignored += 1;
            debug!(
                "bridge.frame.ignored seq={} name={} reason=awaiting_resync",
                env.origin.capture_seq,
                env.message.kind()
            );
            return;
        }
        match self.ctx.tracker.ingest(env) {
            Ok(transitions) => self.publish(transitions),
            Err(err) => self.on_desync(err),
        }
    }

    fn on_call_timeout(&mut self) {
        self.ctx.call_deadline = None;
        if !self.ctx.tracker.window_open() {
            return;
        }
        info!(
            "bridge.call_window.expired epoch={} seq={}",
            self.ctx.epoch,
            self.ctx.emitter.last_seq()
        );
        match self.ctx.tracker.expire_call_window() {
            Ok(transitions) => self.publish(transitions),
            Err(err) => self.on_desync(err),
        }
    }

    fn on_desync(&mut self, err: DesyncError) {
        match err {
            DesyncError::Recoverable { reason, buffered } => {
                debug!("bridge.desync.held buffered={buffered} reason={reason}");
            }
            DesyncError::Unrecoverable { reason } => self.request_resync(reason),
        }
    }

    fn request_resync(&mut self, reason: String) {
        self.ctx.call_deadline = None;
        self.decisions.send_replace(None);
        if self.ctx.awaiting_resync {
            return;
        }
        self.ctx.awaiting_resync = true;
        warn!("bridge.resync.requested epoch={} reason={reason}", self.ctx.epoch);
        self.notify(BridgeNotice::ResyncRequested {
            epoch: self.ctx.epoch,
            reason,
        });
    }

    /// Starts a fresh match context. The frame gate carries over so a retransmitted start frame
    /// cannot reset the new match again.
    fn reset_context(&mut self) {
        let gate = std::mem::take(&mut self.ctx.gate);
        let epoch = self.ctx.epoch + 1;
        info!("bridge.context.reset old_epoch={} epoch={epoch}", self.ctx.epoch);
        self.ctx = MatchContext::new(epoch, self.tracker_cfg.clone(), gate);
        self.decisions.send_replace(None);
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let stamp = self.ctx.stamp();
        self.snapshot.send_replace(SnapshotView {
            epoch: stamp.epoch,
            seq: stamp.seq,
            state: Arc::new(self.ctx.tracker.state().clone()),
        });
        self.latest.send_replace(stamp);
    }

    fn publish(&mut self, transitions: Vec<Transition>) {
        let emitted = self.ctx.emitter.emit(transitions);
        if emitted.is_empty() {
            return;
        }
        let mut ended = false;
        for event in emitted {
            match &event.event {
                CanonicalEvent::StartGame { id, seat_count, .. } => {
                    info!(
                        "bridge.match.start epoch={} seat_count={seat_count} self_seat={id}",
                        self.ctx.epoch
                    );
                    self.notify(BridgeNotice::MatchStarted {
                        epoch: self.ctx.epoch,
                        seat_count: *seat_count,
                        self_seat: *id,
                    });
                }
                CanonicalEvent::EndGame { scores } => {
                    info!("bridge.match.end epoch={} scores={scores:?}", self.ctx.epoch);
                    self.notify(BridgeNotice::MatchEnded {
                        epoch: self.ctx.epoch,
                        scores: scores.clone(),
                    });
                    ended = true;
                }
                CanonicalEvent::Resync { .. } => {
                    info!("bridge.resync.applied epoch={} seq={}", self.ctx.epoch, event.seq);
                    self.ctx.awaiting_resync = false;
                }
                _ => {}
            }
            let _ = self.events.send(event);
        }

        self.ctx.call_deadline = match (self.ctx.tracker.window_open(), self.ctx.call_deadline) {
            (true, Some(deadline)) => Some(deadline),
            (true, None) => Some(Instant::now() + self.call_window_timeout),
            (false, _) => None,
        };
        self.publish_snapshot();

        let decision = if ended || self.ctx.awaiting_resync {
            None
        } else {
            decision_point(self.ctx.tracker.state(), self.ctx.stamp()).map(|point| {
                debug!(
                    "bridge.decision epoch={} seq={} kind={:?}",
                    point.epoch, point.seq, point.kind
                );
                DecisionRequest {
                    point,
                    log: self.ctx.emitter.log().events().into(),
                }
            })
        };
        self.decisions.send_replace(decision);
    }

    fn on_query(&self, query: Query) {
        match query {
            Query::Events { since, reply } => {
                let _ = reply.send(self.ctx.emitter.log().since(since).to_vec());
            }
            Query::Status { reply } => {
                let _ = reply.send(Status {
                    epoch: self.ctx.epoch,
                    last_seq: self.ctx.emitter.last_seq(),
                    phase: self.ctx.tracker.state().phase,
                    mode: *self.mode.borrow(),
                    frozen: self.ctx.tracker.is_frozen(),
                    awaiting_resync: self.ctx.awaiting_resync,
                    call_window_open: self.ctx.tracker.window_open(),
                    autoplay_available: self.player_idle.is_some(),
                    player_idle: self.player_idle.as_ref().is_none_or(|idle| *idle.borrow()),
                    frames: self.counters,
                });
            }
        }
    }

    async fn run(
        mut self,
        mut frames: mpsc::Receiver<RawFrame>,
        mut queries: mpsc::Receiver<Query>,
    ) -> anyhow::Result<()> {
        info!("bridge.pipeline.started epoch={}", self.ctx.epoch);
        loop {
            let deadline = self.ctx.call_deadline;
            let call_timer = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                frame = frames.recv() => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => break,
                },
                Some(query) = queries.recv() => self.on_query(query),
                _ = call_timer => self.on_call_timeout(),
            }
        }
        info!("bridge.pipeline.end epoch={}", self.ctx.epoch);
        Ok(())
    }
}

async fn run_decisions(
    gateway: AgentGateway,
    mut decisions: watch::Receiver<Option<DecisionRequest>>,
    mode: watch::Receiver<Mode>,
    intents: Option<mpsc::Sender<ActionIntent>>,
    notices: broadcast::Sender<BridgeNotice>,
) -> anyhow::Result<()> {
    info!("bridge.decisions.started");
    while decisions.changed().await.is_ok() {
        let Some(request) = decisions.borrow_and_update().clone() else {
            continue;
        };
        let point = &request.point;
        match gateway.query(&request.log, point).await {
            Ok(intent) => {
                let executed = *mode.borrow() == Mode::Autoplay && intents.is_some();
                info!(
                    "bridge.recommendation epoch={} seq={} action={} executed={executed}",
                    point.epoch,
                    point.seq,
                    intent.action.kind().name()
                );
                let _ = notices.send(BridgeNotice::Recommendation {
                    epoch: point.epoch,
                    seq: point.seq,
                    action: intent.action.clone(),
                    evaluation: intent.evaluation.clone(),
                    executed,
                });
                if executed
                    && let Some(tx) = &intents
                    && tx.send(intent).await.is_err()
                {
                    anyhow::bail!("player intent channel closed");
                }
            }
            Err(AgentError::Superseded) => {
                debug!("bridge.decision.superseded seq={}", point.seq);
            }
            Err(err) => {
                error!("bridge.decision.failed seq={} error={err}", point.seq);
                let _ = notices.send(BridgeNotice::Alert {
                    error: format!("agent: {err}"),
                });
            }
        }
    }
    info!("bridge.decisions.end");
    Ok(())
}

async fn forward_player_events(
    mut player_events: broadcast::Receiver<PlayerEvent>,
    notices: broadcast::Sender<BridgeNotice>,
) {
    loop {
        match player_events.recv().await {
            Ok(event) => {
                let _ = notices.send(BridgeNotice::Player(event));
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("bridge.player_events.lagged skipped={n}");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Cheap handle used by the control server and tests.
#[derive(Clone)]
pub struct BridgeHandle {
    frames: mpsc::Sender<RawFrame>,
    queries: mpsc::Sender<Query>,
    mode: Arc<watch::Sender<Mode>>,
    player_idle: Option<watch::Receiver<bool>>,
    events: broadcast::Sender<SequencedEvent>,
    notices: broadcast::Sender<BridgeNotice>,
    snapshot: watch::Receiver<SnapshotView>,
    decisions: watch::Receiver<Option<DecisionRequest>>,
}

impl BridgeHandle {
    pub async fn submit(&self, frame: RawFrame) -> anyhow::Result<()> {
        self.frames
            .send(frame)
            .await
            .map_err(|_| anyhow::anyhow!("frame queue closed"))
    }

    pub async fn events_since(&self, since: u64) -> anyhow::Result<Vec<SequencedEvent>> {
        let (reply, rx) = oneshot::channel();
        self.queries
            .send(Query::Events { since, reply })
            .await
            .map_err(|_| anyhow::anyhow!("pipeline stopped"))?;
        rx.await.map_err(|_| anyhow::anyhow!("events reply dropped"))
    }

    pub async fn status(&self) -> anyhow::Result<Status> {
        let (reply, rx) = oneshot::channel();
        self.queries
            .send(Query::Status { reply })
            .await
            .map_err(|_| anyhow::anyhow!("pipeline stopped"))?;
        rx.await.map_err(|_| anyhow::anyhow!("status reply dropped"))
    }

    pub fn mode(&self) -> Mode {
        *self.mode.borrow()
    }

    /// Switches mode. Leaving autoplay stops new intents at once, then waits until the player
    /// has finished whatever it was executing.
    pub async fn set_mode(&self, mode: Mode) -> anyhow::Result<Mode> {
        if mode == Mode::Autoplay && self.player_idle.is_none() {
            anyhow::bail!("autoplay_unavailable: no input driver configured");
        }
        let previous = self.mode.send_replace(mode);
        info!("bridge.mode previous={previous:?} mode={mode:?}");
        if mode == Mode::Observe
            && let Some(idle) = &self.player_idle
        {
            let mut idle = idle.clone();
            idle.wait_for(|idle| *idle)
                .await
                .map_err(|_| anyhow::anyhow!("player stopped"))?;
        }
        Ok(previous)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<BridgeNotice> {
        self.notices.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SequencedEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> watch::Receiver<SnapshotView> {
        self.snapshot.clone()
    }

    pub fn decisions(&self) -> watch::Receiver<Option<DecisionRequest>> {
        self.decisions.clone()
    }

    /// Current snapshot, cloned.
    pub fn state(&self) -> Arc<MatchState> {
        self.snapshot.borrow().state.clone()
    }
}

/// Running bridge tasks. Dropping it detaches them; [`Bridge::join`] waits for the first to end.
pub struct Bridge {
    handle: BridgeHandle,
    pipeline: JoinHandle<anyhow::Result<()>>,
    decisions: Option<JoinHandle<anyhow::Result<()>>>,
    player: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Spawns the pipeline, and the decision and player tasks when an agent and an input driver
    /// are available.
    pub fn spawn(
        cfg: &Config,
        agent: Option<Arc<dyn AgentClient>>,
        input: Option<Arc<dyn InputDispatcher>>,
    ) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(cfg.bridge.frame_queue.max(1));
        let (queries_tx, queries_rx) = mpsc::channel(32);
        let (events_tx, _) = broadcast::channel(cfg.bridge.event_buffer.max(1));
        let (notices_tx, _) = broadcast::channel(cfg.bridge.event_buffer.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(SnapshotView {
            epoch: 1,
            ..SnapshotView::default()
        });
        let (latest_tx, latest_rx) = watch::channel(EventStamp { epoch: 1, seq: 0 });
        let (decisions_tx, decisions_rx) = watch::channel(None);
        let initial_mode = if input.is_some() { cfg.bridge.mode } else { Mode::Observe };
        if initial_mode != cfg.bridge.mode {
            warn!("bridge.mode.downgraded reason=no_input_driver mode={initial_mode:?}");
        }
        let (mode_tx, mode_rx) = watch::channel(initial_mode);

        let (player, intents_tx, player_idle) = match input {
            Some(dispatcher) => {
                let (player_events_tx, player_events_rx) = broadcast::channel(64);
                let (intents_tx, intents_rx) = mpsc::channel(4);
                let player = Player::new(
                    cfg.autoplay.clone(),
                    dispatcher,
                    mode_rx.clone(),
                    snapshot_rx.clone(),
                    events_tx.subscribe(),
                    player_events_tx,
                );
                let idle = player.idle();
                tokio::spawn(forward_player_events(player_events_rx, notices_tx.clone()));
                let task = tokio::spawn(player.run(intents_rx));
                (Some(task), Some(intents_tx), Some(idle))
            }
            None => (None, None, None),
        };

        let decisions = agent.map(|client| {
            let gateway = AgentGateway::new(client, cfg.agent.clone(), latest_rx);
            tokio::spawn(run_decisions(
                gateway,
                decisions_rx.clone(),
                mode_rx.clone(),
                intents_tx,
                notices_tx.clone(),
            ))
        });

        let pipeline = Pipeline {
            ctx: MatchContext::new(1, cfg.tracker.clone(), FrameGate::new()),
            tracker_cfg: cfg.tracker.clone(),
            call_window_timeout: cfg.bridge.call_window_timeout(),
            counters: FrameCounters::default(),
            mode: mode_rx,
            player_idle: player_idle.clone(),
            events: events_tx.clone(),
            notices: notices_tx.clone(),
            snapshot: snapshot_tx,
            latest: latest_tx,
            decisions: decisions_tx,
        };
        let pipeline = tokio::spawn(pipeline.run(frames_rx, queries_rx));

        Self {
            handle: BridgeHandle {
                frames: frames_tx,
                queries: queries_tx,
                mode: Arc::new(mode_tx),
                player_idle,
                events: events_tx,
                notices: notices_tx,
                snapshot: snapshot_rx,
                decisions: decisions_rx,
            },
            pipeline,
            decisions,
            player,
        }
    }

    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Resolves when any bridge task stops, logging which one.
    pub async fn join(self) -> anyhow::Result<()> {
        let Bridge {
            pipeline,
            decisions,
            player,
            ..
        } = self;
        let decisions = async move {
            match decisions {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        };
        let player = async move {
            match player {
                Some(task) => task.await.map(Ok),
                None => std::future::pending().await,
            }
        };
        let (lane, result) = tokio::select! {
            res = pipeline => ("pipeline", res),
            res = decisions => ("decisions", res),
            res = player => ("player", res),
        };
        match result {
            Ok(Ok(())) => {
                info!("bridge.task.end lane={lane} result=ok");
                Ok(())
            }
            Ok(Err(err)) => {
                error!("bridge.task.end lane={lane} error={err:#}");
                Err(err)
            }
            Err(err) => {
                error!("bridge.task.end lane={lane} join_error={err}");
                Err(err.into())
            }
        }
    }
}
