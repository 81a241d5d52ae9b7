use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::executor::{Executor, Outcome, RetryPolicy};
use super::input::{Control, InputDispatcher, Point, UiAction};
use super::layout::{ScreenMapper, grid_point};
use super::plan::{PlanStep, Planner, TimingConfig};
use crate::agent::{ActionIntent, EventStamp, decision_point};
use crate::error::ActionError;
use crate::protocol::SequencedEvent;
use crate::state::SnapshotView;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub timing: TimingConfig,
    pub retry: RetryPolicy,
    pub tick_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            retry: RetryPolicy::default(),
            tick_ms: 50,
        }
    }
}

/// Whether recommendations are clicked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Recommendations are published, never executed.
    #[default]
    Observe,
    Autoplay,
}

/// What the player reports back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "player", rename_all = "snake_case")]
pub enum PlayerEvent {
    Started {
        seq: u64,
        action: &'static str,
        attempt: u32,
    },
    Confirmed {
        seq: u64,
        action: &'static str,
        attempts: u32,
    },
    Reverted {
        seq: u64,
        action: &'static str,
        reason: String,
    },
    /// Needs operator attention.
    Alert {
        seq: u64,
        action: &'static str,
        error: String,
    },
    Rejected {
        seq: u64,
        error: String,
    },
}

impl PlayerEvent {
    fn from_outcome(outcome: &Outcome) -> Self {
        let intent = outcome.intent();
        let seq = intent.decision.seq;
        let action = intent.action.kind().name();
        match outcome {
            Outcome::Confirmed { attempts, .. } => PlayerEvent::Confirmed {
                seq,
                action,
                attempts: *attempts,
            },
            Outcome::Reverted { reason, .. } => PlayerEvent::Reverted {
                seq,
                action,
                reason: reason.clone(),
            },
            Outcome::Abandoned { error, .. } => PlayerEvent::Alert {
                seq,
                action,
                error: error.to_string(),
            },
        }
    }
}

/// Whether the decision `intent` answers is still open in `view`. Events that do not close it
/// (a dora reveal, another seat's riichi acceptance) keep it open.
fn still_open(intent: &ActionIntent, view: &SnapshotView) -> bool {
    let stamp = EventStamp {
        epoch: view.epoch,
        seq: view.seq,
    };
    view.epoch == intent.decision.epoch
        && decision_point(&view.state, stamp).is_some_and(|d| {
            d.seat == intent.decision.seat
                && d.kind == intent.decision.kind
                && d.allows(intent.action.kind())
        })
}

enum Sent {
    All,
    /// Stopped before a click because a newer event closed the decision.
    DecisionClosed,
    /// Stopped before a click because the bridge left autoplay.
    Observing,
}

const OBSERVING: &str = "switched to observe mode";

/// Executes intents one at a time against an [`InputDispatcher`].
pub struct Player {
    dispatcher: Arc<dyn InputDispatcher>,
    mode: watch::Receiver<Mode>,
    executor: Executor,
    planner: Planner,
    tick: Duration,
    snapshot: watch::Receiver<SnapshotView>,
    events: broadcast::Receiver<SequencedEvent>,
    notices: broadcast::Sender<PlayerEvent>,
    idle: watch::Sender<bool>,
}

impl Player {
    pub fn new(
        cfg: PlayerConfig,
        dispatcher: Arc<dyn InputDispatcher>,
        mode: watch::Receiver<Mode>,
        snapshot: watch::Receiver<SnapshotView>,
        events: broadcast::Receiver<SequencedEvent>,
        notices: broadcast::Sender<PlayerEvent>,
    ) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            dispatcher,
            mode,
            executor: Executor::new(cfg.retry),
            planner: Planner::new(cfg.timing),
            tick: Duration::from_millis(cfg.tick_ms.max(1)),
            snapshot,
            events,
            notices,
            idle,
        }
    }

    /// `true` while nothing is executing, verifying or queued.
    pub fn idle(&self) -> watch::Receiver<bool> {
        self.idle.subscribe()
    }

    fn publish(&self, event: PlayerEvent) {
        let _ = self.notices.send(event);
    }

    fn finish(&self, outcome: Outcome) {
        match &outcome {
            Outcome::Confirmed { intent, attempts } => info!(
                "player.confirmed seq={} action={} attempts={attempts}",
                intent.decision.seq,
                intent.action.kind().name()
            ),
            Outcome::Reverted { intent, reason } => info!(
                "player.reverted seq={} action={} reason={reason}",
                intent.decision.seq,
                intent.action.kind().name()
            ),
            Outcome::Abandoned { intent, error } => error!(
                "player.abandoned seq={} action={} error={error}",
                intent.decision.seq,
                intent.action.kind().name()
            ),
        }
        self.publish(PlayerEvent::from_outcome(&outcome));
    }

    fn autoplay(&self) -> bool {
        *self.mode.borrow() == Mode::Autoplay
    }

    fn offer(&mut self, intent: ActionIntent) {
        let seq = intent.decision.seq;
        if !self.autoplay() {
            info!("player.intent.dropped seq={seq} reason=observe");
            self.publish(PlayerEvent::Rejected {
                seq,
                error: OBSERVING.to_string(),
            });
            return;
        }
        match self.executor.offer(intent) {
            Ok(Some(replaced)) => debug!(
                "player.intent.replaced old_seq={} new_seq={seq}",
                replaced.decision.seq
            ),
            Ok(None) => debug!("player.intent.queued seq={seq}"),
            Err(err) => {
                warn!("player.intent.rejected seq={seq} error={err}");
                self.publish(PlayerEvent::Rejected {
                    seq,
                    error: err.to_string(),
                });
            }
        }
    }

    fn observe(&mut self, event: &SequencedEvent) {
        if let Some(outcome) = self.executor.observe(&event.event) {
            self.finish(outcome);
        }
    }

    /// Folds in events that arrived while the loop was busy, so a retry never starts on a
    /// decision that is already answered.
    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.observe(&event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("player.events.lagged skipped={n}");
                }
                Err(_) => break,
            }
        }
    }

    /// Starts every sequence that is due: a queued intent or a retry whose backoff elapsed.
    async fn start_due(&mut self) {
        loop {
            self.drain_events();
            if !self.autoplay() {
                for outcome in self.executor.withdraw(OBSERVING) {
                    self.finish(outcome);
                }
                return;
            }
            let Some((intent, attempt)) = self.executor.next_to_execute(Instant::now()) else {
                return;
            };
            self.idle.send_replace(false);
            self.publish(PlayerEvent::Started {
                seq: intent.decision.seq,
                action: intent.action.kind().name(),
                attempt,
            });
            let cancelled = match self.execute(&intent, attempt).await {
                Ok(Sent::All) => {
                    self.executor.dispatched(Instant::now());
                    None
                }
                Ok(Sent::DecisionClosed) => self.executor.cancel("decision point closed"),
                Ok(Sent::Observing) => self.executor.cancel(OBSERVING),
                Err(err) => self.executor.fail(err),
            };
            if let Some(outcome) = cancelled {
                self.finish(outcome);
            }
        }
    }

    /// Runs until the intent channel closes.
    pub async fn run(mut self, mut intents: mpsc::Receiver<ActionIntent>) {
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut mode_open = true;
        info!("player.started");

        loop {
            tokio::select! {
                intent = intents.recv() => {
                    let Some(intent) = intent else { break };
                    self.offer(intent);
                }
                event = self.events.recv() => match event {
                    Ok(event) => self.observe(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("player.events.lagged skipped={n}");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = self.mode.changed(), if mode_open => {
                    if changed.is_err() {
                        mode_open = false;
                    } else {
                        debug!("player.mode mode={:?}", *self.mode.borrow());
                    }
                }
                _ = tick.tick() => {
                    if let Some(outcome) = self.executor.tick(Instant::now()) {
                        self.finish(outcome);
                    }
                }
            }

            self.start_due().await;
            let now_idle = self.executor.is_idle();
            self.idle.send_if_modified(|idle| {
                let changed = *idle != now_idle;
                *idle = now_idle;
                changed
            });
        }
        info!("player.stopped");
    }

    async fn execute(&mut self, intent: &ActionIntent, attempt: u32) -> Result<Sent, ActionError> {
        let view = self.snapshot.borrow().clone();
        if !still_open(intent, &view) {
            return Ok(Sent::DecisionClosed);
        }
        let steps = self.planner.plan(intent, &view.state)?;
        let viewport = self
            .dispatcher
            .viewport()
            .await
            .map_err(|e| ActionError::Abandoned(format!("viewport: {e:#}")))?;
        let mapper = ScreenMapper::new(viewport);
        info!(
            "player.execute seq={} action={} attempt={attempt} steps={}",
            intent.decision.seq,
            intent.action.kind().name(),
            steps.len()
        );

        for step in steps {
            match step {
                PlanStep::Wait(d) => self.send(UiAction::Wait(d)).await?,
                PlanStep::Click { control, hold } => {
                    if !self.autoplay() {
                        return Ok(Sent::Observing);
                    }
                    if !still_open(intent, &self.snapshot.borrow()) {
                        return Ok(Sent::DecisionClosed);
                    }
                    let at = self.resolve(control, &mapper).await?;
                    debug!("player.click control={control:?} x={:.1} y={:.1}", at.x, at.y);
                    self.click(at, hold).await?;
                }
            }
        }
        Ok(Sent::All)
    }

    /// Presses and releases at `at`. Once the press went out, a failure still tries to release
    /// so the pointer is never left down.
    async fn click(&self, at: Point, hold: Duration) -> Result<(), ActionError> {
        self.send(UiAction::PointerDown(at)).await?;
        let released = match self.send(UiAction::Wait(hold)).await {
            Ok(()) => self.send(UiAction::PointerUp(at)).await,
            Err(err) => Err(err),
        };
        if let Err(err) = released {
            if let Err(e) = self.dispatcher.dispatch(UiAction::PointerUp(at)).await {
                warn!("player.release.failed x={:.1} y={:.1} error={e:#}", at.x, at.y);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn resolve(&self, control: Control, mapper: &ScreenMapper) -> Result<Point, ActionError> {
        match self.dispatcher.locate(control).await {
            Ok(Some(p)) => return Ok(p),
            Ok(None) => {}
            Err(e) => debug!("player.locate.failed control={control:?} error={e:#}"),
        }
        grid_point(control)
            .and_then(|g| mapper.to_pixels(g))
            .ok_or_else(|| {
                ActionError::PreconditionFailed(format!("{control:?} is not resolvable"))
            })
    }

    async fn send(&self, action: UiAction) -> Result<(), ActionError> {
        self.dispatcher
            .dispatch(action)
            .await
            .map_err(|e| ActionError::Abandoned(format!("input driver: {e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::agent::{ActionKind, AgentAction, DecisionKind, DecisionPoint, Evaluation};
    use crate::player::executor::ExecutorState;
    use crate::player::input::Viewport;
    use crate::protocol::CanonicalEvent;
    use crate::state::{HandKnowledge, MatchState, Phase, RiichiStatus, SeatState, TurnStep};
    use crate::tile::parse_tiles;

    #[derive(Default)]
    struct FakeDispatcher {
        actions: Mutex<Vec<UiAction>>,
        fail_next_release: AtomicBool,
    }

    impl FakeDispatcher {
        fn downs(&self) -> usize {
            self.actions
                .lock()
                .unwrap()
                .iter()
                .filter(|a| matches!(a, UiAction::PointerDown(_)))
                .count()
        }

        fn ups(&self) -> usize {
            self.actions
                .lock()
                .unwrap()
                .iter()
                .filter(|a| matches!(a, UiAction::PointerUp(_)))
                .count()
        }
    }

    impl InputDispatcher for FakeDispatcher {
        fn viewport<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Viewport>> + Send + 'a>> {
            Box::pin(async {
                Ok(Viewport {
                    width: 1600.0,
                    height: 900.0,
                })
            })
        }

        fn dispatch<'a>(
            &'a self,
            action: UiAction,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
            Box::pin(async move {
                if let UiAction::Wait(d) = action {
                    tokio::time::sleep(d).await;
                }
                if matches!(action, UiAction::PointerUp(_))
                    && self.fail_next_release.swap(false, Ordering::SeqCst)
                {
                    anyhow::bail!("driver dropped the release");
                }
                self.actions.lock().unwrap().push(action);
                Ok(())
            })
        }
    }

    fn state() -> MatchState {
        let hidden = SeatState {
            hand: HandKnowledge::Hidden { count: 13 },
            drawn: None,
            melds: vec![],
            river: vec![],
            riichi: RiichiStatus::Off,
            nuki: vec![],
        };
        let own = SeatState {
            hand: HandKnowledge::Known(
                parse_tiles("1m 2m 3m 4p 5p 6p 7s 8s 9s E E W N 3s").unwrap(),
            ),
            drawn: Some("3s".parse().unwrap()),
            ..hidden.clone()
        };
        MatchState {
            phase: Phase::InTurnPlay(TurnStep::Discard),
            seats: vec![own, hidden.clone(), hidden.clone(), hidden],
            scores: vec![25000; 4],
            wall_remaining: 69,
            ..MatchState::default()
        }
    }

    fn intent() -> ActionIntent {
        ActionIntent {
            decision: DecisionPoint {
                epoch: 1,
                seq: 4,
                seat: 0,
                kind: DecisionKind::Turn,
                allowed: vec![ActionKind::Dahai],
            },
            action: AgentAction::Discard {
                tile: "N".parse().unwrap(),
                tsumogiri: false,
            },
            evaluation: Evaluation::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn misclick_is_retried_and_confirmed() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        let (_snap_tx, snap_rx) = watch::channel(SnapshotView {
            epoch: 1,
            seq: 4,
            state: Arc::new(state()),
        });
        let (ev_tx, ev_rx) = broadcast::channel(16);
        let (notice_tx, mut notices) = broadcast::channel(16);
        let cfg = PlayerConfig {
            timing: quick_timing(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_backoff_ms: 100,
                max_backoff_ms: 1_000,
                verify_timeout_ms: 1_000,
            },
            tick_ms: 20,
        };
        let (_mode_tx, mode_rx) = watch::channel(Mode::Autoplay);
        let player = Player::new(cfg, dispatcher.clone(), mode_rx, snap_rx, ev_rx, notice_tx);
        let mut idle = player.idle();
        let (intent_tx, intent_rx) = mpsc::channel(4);
        let task = tokio::spawn(player.run(intent_rx));

        intent_tx.send(intent()).await.unwrap();

        // First sequence goes unanswered, so a second one is sent.
        loop {
            match notices.recv().await.unwrap() {
                PlayerEvent::Started { attempt: 2, .. } => break,
                PlayerEvent::Started { attempt: 1, .. } => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        // Let the second click land, then the server echoes the discard.
        tokio::time::sleep(Duration::from_millis(200)).await;
        ev_tx
            .send(SequencedEvent {
                seq: 5,
                event: CanonicalEvent::Dahai {
                    actor: 0,
                    pai: "N".parse().unwrap(),
                    tsumogiri: false,
                },
            })
            .unwrap();

        let confirmed = notices.recv().await.unwrap();
        assert!(matches!(
            confirmed,
            PlayerEvent::Confirmed { attempts: 2, .. }
        ));
        assert_eq!(dispatcher.downs(), 2);
        idle.wait_for(|i| *i).await.unwrap();

        drop(intent_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_decision_is_never_clicked() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        let mut moved_on = state();
        moved_on.phase = Phase::InTurnPlay(TurnStep::Draw { rinshan: false });
        moved_on.turn = 1;
        let (_snap_tx, snap_rx) = watch::channel(SnapshotView {
            epoch: 1,
            seq: 6,
            state: Arc::new(moved_on),
        });
        let (_ev_tx, ev_rx) = broadcast::channel(16);
        let (notice_tx, mut notices) = broadcast::channel(16);
        let (_mode_tx, mode_rx) = watch::channel(Mode::Autoplay);
        let player = Player::new(
            PlayerConfig::default(),
            dispatcher.clone(),
            mode_rx,
            snap_rx,
            ev_rx,
            notice_tx,
        );
        let (intent_tx, intent_rx) = mpsc::channel(4);
        let task = tokio::spawn(player.run(intent_rx));
        intent_tx.send(intent()).await.unwrap();

        assert!(matches!(notices.recv().await.unwrap(), PlayerEvent::Started { .. }));
        assert!(matches!(notices.recv().await.unwrap(), PlayerEvent::Reverted { .. }));
        assert_eq!(dispatcher.downs(), 0);

        drop(intent_tx);
        task.await.unwrap();
    }

    fn open_view() -> watch::Receiver<SnapshotView> {
        let (_, rx) = watch::channel(SnapshotView {
            epoch: 1,
            seq: 4,
            state: Arc::new(state()),
        });
        rx
    }

    fn quick_timing() -> TimingConfig {
        TimingConfig {
            discard_min_ms: 10,
            discard_max_ms: 20,
            first_discard_min_ms: 0,
            dealer_first_discard_extra_ms: 0,
            tile_click_ms: 10,
            seed: Some(1),
            ..TimingConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_autoplay_stops_before_the_next_click() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        let (_ev_tx, ev_rx) = broadcast::channel(16);
        let (notice_tx, mut notices) = broadcast::channel(16);
        let (mode_tx, mode_rx) = watch::channel(Mode::Autoplay);
        let player = Player::new(
            PlayerConfig::default(),
            dispatcher.clone(),
            mode_rx,
            open_view(),
            ev_rx,
            notice_tx,
        );
        let mut idle = player.idle();
        let (intent_tx, intent_rx) = mpsc::channel(4);
        let task = tokio::spawn(player.run(intent_rx));

        intent_tx.send(intent()).await.unwrap();
        assert!(matches!(notices.recv().await.unwrap(), PlayerEvent::Started { .. }));
        // Still in the pre-discard wait.
        mode_tx.send_replace(Mode::Observe);
        match notices.recv().await.unwrap() {
            PlayerEvent::Reverted { reason, .. } => assert_eq!(reason, OBSERVING),
            other => panic!("unexpected {other:?}"),
        }
        idle.wait_for(|i| *i).await.unwrap();

        // Intents that reach the player after the switch are refused outright.
        intent_tx.send(intent()).await.unwrap();
        assert!(matches!(notices.recv().await.unwrap(), PlayerEvent::Rejected { .. }));
        assert_eq!(dispatcher.downs(), 0);

        drop(intent_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_release_still_lifts_the_pointer() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        dispatcher.fail_next_release.store(true, Ordering::SeqCst);
        let (_ev_tx, ev_rx) = broadcast::channel(16);
        let (notice_tx, mut notices) = broadcast::channel(16);
        let (_mode_tx, mode_rx) = watch::channel(Mode::Autoplay);
        let cfg = PlayerConfig {
            timing: quick_timing(),
            ..PlayerConfig::default()
        };
        let player = Player::new(cfg, dispatcher.clone(), mode_rx, open_view(), ev_rx, notice_tx);
        let (intent_tx, intent_rx) = mpsc::channel(4);
        let task = tokio::spawn(player.run(intent_rx));

        intent_tx.send(intent()).await.unwrap();
        assert!(matches!(notices.recv().await.unwrap(), PlayerEvent::Started { .. }));
        assert!(matches!(notices.recv().await.unwrap(), PlayerEvent::Alert { .. }));
        assert_eq!(dispatcher.downs(), 1);
        assert_eq!(dispatcher.ups(), 1);
        assert!(matches!(
            dispatcher.actions.lock().unwrap().last(),
            Some(UiAction::PointerUp(_))
        ));

        drop(intent_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn echo_received_during_backoff_confirms_without_a_retry() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        let (ev_tx, ev_rx) = broadcast::channel(16);
        let (notice_tx, mut notices) = broadcast::channel(16);
        let (_mode_tx, mode_rx) = watch::channel(Mode::Autoplay);
        let mut player = Player::new(
            PlayerConfig::default(),
            dispatcher.clone(),
            mode_rx,
            open_view(),
            ev_rx,
            notice_tx,
        );
        player.executor.state = ExecutorState::Backoff {
            intent: intent(),
            attempt: 1,
            next_attempt_at: Instant::now(),
            last_reason: "no matching event before the verify timeout".to_string(),
        };
        // The late first click landed; its echo is queued but not yet read.
        ev_tx
            .send(SequencedEvent {
                seq: 5,
                event: CanonicalEvent::Dahai {
                    actor: 0,
                    pai: "N".parse().unwrap(),
                    tsumogiri: false,
                },
            })
            .unwrap();

        player.start_due().await;
        assert!(matches!(
            notices.recv().await.unwrap(),
            PlayerEvent::Confirmed { attempts: 1, .. }
        ));
        assert!(player.executor.is_idle());
        assert_eq!(dispatcher.downs(), 0);
    }
}
