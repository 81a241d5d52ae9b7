use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::agent::{ActionIntent, AgentAction, DecisionKind};
use crate::error::ActionError;
use crate::protocol::CanonicalEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Click sequences sent per intent, first attempt included.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub verify_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 300,
            max_backoff_ms: 2_000,
            verify_timeout_ms: 2_500,
        }
    }
}

impl RetryPolicy {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        // attempt=1 -> base; attempt=2 -> base * 2; ...
        let pow = attempt.saturating_sub(1).min(10);
        let factor = 1u64.checked_shl(pow).unwrap_or(u64::MAX);
        let backoff_ms = self.base_backoff_ms.saturating_mul(factor);
        Duration::from_millis(backoff_ms.min(self.max_backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorState {
    Idle,
    Executing {
        intent: ActionIntent,
        attempt: u32,
    },
    Verifying {
        intent: ActionIntent,
        attempt: u32,
        deadline: Instant,
    },
    Backoff {
        intent: ActionIntent,
        attempt: u32,
        next_attempt_at: Instant,
        last_reason: String,
    },
}

/// What one canonical event says about an intent in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Confirmed,
    Refuted(String),
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Confirmed {
        intent: ActionIntent,
        attempts: u32,
    },
    /// Something else took over the decision point.
    Reverted {
        intent: ActionIntent,
        reason: String,
    },
    Abandoned {
        intent: ActionIntent,
        error: ActionError,
    },
}

impl Outcome {
    pub fn intent(&self) -> &ActionIntent {
        match self {
            Outcome::Confirmed { intent, .. }
            | Outcome::Reverted { intent, .. }
            | Outcome::Abandoned { intent, .. } => intent,
        }
    }
}

fn claim_of(event: &CanonicalEvent) -> Option<(u8, &'static str)> {
    match event {
        CanonicalEvent::Chi { actor, .. }
        | CanonicalEvent::Pon { actor, .. }
        | CanonicalEvent::Daiminkan { actor, .. }
        | CanonicalEvent::Hora { actor, .. } => Some((*actor, event.type_name())),
        _ => None,
    }
}

/// Matches `event` against the effect `intent` expects.
pub fn verify(intent: &ActionIntent, event: &CanonicalEvent) -> Verification {
    let seat = intent.decision.seat;
    let refuted = |what: &str| Verification::Refuted(format!("{what} took over the decision"));
    if let CanonicalEvent::Resync { .. } = event {
        return Verification::Refuted("state was resynced".to_string());
    }

    let own = event.actor() == Some(seat);
    let matched = match (&intent.action, event) {
        (
            AgentAction::Discard { tile, .. } | AgentAction::Riichi { tile },
            CanonicalEvent::Dahai { pai, .. },
        ) => own && pai == tile,
        (AgentAction::Chi { .. }, CanonicalEvent::Chi { .. })
        | (AgentAction::Pon { .. }, CanonicalEvent::Pon { .. })
        | (AgentAction::Daiminkan { .. }, CanonicalEvent::Daiminkan { .. })
        | (AgentAction::Ankan { .. }, CanonicalEvent::Ankan { .. })
        | (AgentAction::Kakan { .. }, CanonicalEvent::Kakan { .. })
        | (AgentAction::Nukidora, CanonicalEvent::Nukidora { .. })
        | (AgentAction::Hora, CanonicalEvent::Hora { .. }) => own,
        (AgentAction::Ryukyoku, CanonicalEvent::Ryukyoku { .. }) => true,
        _ => false,
    };
    if matched {
        return Verification::Confirmed;
    }

    match intent.decision.kind {
        DecisionKind::Call => {
            let passing = intent.action == AgentAction::Pass;
            match event {
                CanonicalEvent::CallWindowClosed | CanonicalEvent::Tsumo { .. } if passing => {
                    Verification::Confirmed
                }
                _ if passing && claim_of(event).is_some_and(|(actor, _)| actor != seat) => {
                    Verification::Confirmed
                }
                CanonicalEvent::CallWindowClosed | CanonicalEvent::Tsumo { .. } => {
                    refuted("an all-pass")
                }
                _ => match claim_of(event) {
                    Some((_, name)) => refuted(name),
                    None if event.ends_hand() => refuted(event.type_name()),
                    None => Verification::Pending,
                },
            }
        }
        DecisionKind::Turn => {
            if own && !matches!(event, CanonicalEvent::Reach { .. }) {
                return refuted(event.type_name());
            }
            if event.ends_hand() {
                return refuted(event.type_name());
            }
            Verification::Pending
        }
    }
}

/// Serializes intents: at most one executing or verifying, at most one waiting behind it.
#[derive(Debug, Clone)]
pub struct Executor {
    pub state: ExecutorState,
    pub retry: RetryPolicy,
    pending: Option<ActionIntent>,
}

impl Executor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            state: ExecutorState::Idle,
            retry,
            pending: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ExecutorState::Idle) && self.pending.is_none()
    }

    pub fn in_flight(&self) -> Option<&ActionIntent> {
        match &self.state {
            ExecutorState::Idle => None,
            ExecutorState::Executing { intent, .. }
            | ExecutorState::Verifying { intent, .. }
            | ExecutorState::Backoff { intent, .. } => Some(intent),
        }
    }

    /// Queues `intent`, replacing any intent still waiting. Returns the replaced one.
    pub fn offer(&mut self, intent: ActionIntent) -> Result<Option<ActionIntent>, ActionError> {
        if self
            .in_flight()
            .is_some_and(|cur| cur.decision.stamp() == intent.decision.stamp())
        {
            return Err(ActionError::Busy);
        }
        Ok(self.pending.replace(intent))
    }

    /// Next click sequence to send, with its 1-based attempt number.
    pub fn next_to_execute(&mut self, now: Instant) -> Option<(ActionIntent, u32)> {
        match &self.state {
            ExecutorState::Idle => {
                let intent = self.pending.take()?;
                self.state = ExecutorState::Executing {
                    intent: intent.clone(),
                    attempt: 1,
                };
                Some((intent, 1))
            }
            ExecutorState::Backoff {
                intent,
                attempt,
                next_attempt_at,
                ..
            } if now >= *next_attempt_at => {
                let intent = intent.clone();
                let attempt = attempt + 1;
                self.state = ExecutorState::Executing {
                    intent: intent.clone(),
                    attempt,
                };
                Some((intent, attempt))
            }
            _ => None,
        }
    }

    /// The current sequence was fully sent.
    pub fn dispatched(&mut self, now: Instant) {
        let ExecutorState::Executing { intent, attempt } = &self.state else {
            return;
        };
        self.state = ExecutorState::Verifying {
            intent: intent.clone(),
            attempt: *attempt,
            deadline: now + self.retry.verify_timeout(),
        };
    }

    /// The current sequence could not be planned or sent.
    pub fn fail(&mut self, error: ActionError) -> Option<Outcome> {
        let ExecutorState::Executing { intent, .. } = &self.state else {
            return None;
        };
        let intent = intent.clone();
        self.state = ExecutorState::Idle;
        Some(Outcome::Abandoned { intent, error })
    }

    /// Drops the in-flight intent because its decision point closed.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Option<Outcome> {
        let intent = self.in_flight()?.clone();
        self.state = ExecutorState::Idle;
        Some(Outcome::Reverted {
            intent,
            reason: reason.into(),
        })
    }

    /// Drops everything that has not been clicked yet: the queued intent and an intent waiting
    /// to retry. A sequence already sent keeps verifying.
    pub fn withdraw(&mut self, reason: &str) -> Vec<Outcome> {
        let mut dropped = Vec::new();
        if let Some(intent) = self.pending.take() {
            dropped.push(Outcome::Reverted {
                intent,
                reason: reason.to_string(),
            });
        }
        if let ExecutorState::Backoff { intent, .. } = &self.state {
            dropped.push(Outcome::Reverted {
                intent: intent.clone(),
                reason: reason.to_string(),
            });
            self.state = ExecutorState::Idle;
        }
        dropped
    }

    /// Evidence from the event stream. A late click may still land while backing off, so both
    /// states listen.
    pub fn observe(&mut self, event: &CanonicalEvent) -> Option<Outcome> {
        let (intent, attempt) = match &self.state {
            ExecutorState::Verifying {
                intent, attempt, ..
            }
            | ExecutorState::Backoff {
                intent, attempt, ..
            } => (intent, *attempt),
            _ => return None,
        };
        let outcome = match verify(intent, event) {
            Verification::Pending => return None,
            Verification::Confirmed => Outcome::Confirmed {
                intent: intent.clone(),
                attempts: attempt,
            },
            Verification::Refuted(reason) => Outcome::Reverted {
                intent: intent.clone(),
                reason,
            },
        };
        self.state = ExecutorState::Idle;
        Some(outcome)
    }

    /// Handles verification timeouts.
    pub fn tick(&mut self, now: Instant) -> Option<Outcome> {
        let ExecutorState::Verifying {
            intent,
            attempt,
            deadline,
        } = &self.state
        else {
            return None;
        };
        if now < *deadline {
            return None;
        }
        let intent = intent.clone();
        let attempt = *attempt;
        let reason = "no matching event before the verify timeout".to_string();

        if attempt < self.retry.max_attempts {
            let delay = self.retry.backoff_for_attempt(attempt);
            self.state = ExecutorState::Backoff {
                intent,
                attempt,
                next_attempt_at: now + delay,
                last_reason: reason,
            };
            return None;
        }
        self.state = ExecutorState::Idle;
        Some(Outcome::Abandoned {
            intent,
            error: ActionError::VerificationFailed {
                attempts: attempt,
                reason,
            },
        })
    }

    /// Earliest instant at which `tick` or `next_to_execute` can make progress on its own.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            ExecutorState::Verifying { deadline, .. } => Some(*deadline),
            ExecutorState::Backoff {
                next_attempt_at, ..
            } => Some(*next_attempt_at),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ActionKind, DecisionPoint, Evaluation};
    use crate::tile::Tile;

    fn t(s: &str) -> Tile {
        s.parse().unwrap()
    }

    fn discard(seq: u64, tile: &str) -> ActionIntent {
        ActionIntent {
            decision: DecisionPoint {
                epoch: 1,
                seq,
                seat: 0,
                kind: DecisionKind::Turn,
                allowed: vec![ActionKind::Dahai],
            },
            action: AgentAction::Discard {
                tile: t(tile),
                tsumogiri: false,
            },
            evaluation: Evaluation::default(),
        }
    }

    fn pass(seq: u64) -> ActionIntent {
        ActionIntent {
            decision: DecisionPoint {
                epoch: 1,
                seq,
                seat: 0,
                kind: DecisionKind::Call,
                allowed: vec![ActionKind::None, ActionKind::Pon],
            },
            action: AgentAction::Pass,
            evaluation: Evaluation::default(),
        }
    }

    fn dahai(actor: u8, tile: &str) -> CanonicalEvent {
        CanonicalEvent::Dahai {
            actor,
            pai: t(tile),
            tsumogiri: false,
        }
    }

    fn executor() -> Executor {
        Executor::new(RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
            verify_timeout_ms: 500,
        })
    }

    #[test]
    fn misclick_is_retried_once_then_confirmed() {
        let mut ex = executor();
        let now = Instant::now();
        ex.offer(discard(5, "E")).unwrap();

        let (_, attempt) = ex.next_to_execute(now).expect("first attempt");
        assert_eq!(attempt, 1);
        ex.dispatched(now);

        // The click missed: nothing comes back before the verify timeout.
        assert!(ex.tick(now + Duration::from_millis(499)).is_none());
        assert!(ex.tick(now + Duration::from_millis(500)).is_none());
        assert!(matches!(ex.state, ExecutorState::Backoff { attempt: 1, .. }));
        assert!(ex.next_to_execute(now + Duration::from_millis(550)).is_none());

        let later = now + Duration::from_millis(600);
        let (_, attempt) = ex.next_to_execute(later).expect("retry");
        assert_eq!(attempt, 2);
        ex.dispatched(later);

        let outcome = ex.observe(&dahai(0, "E")).expect("confirmed");
        assert!(matches!(outcome, Outcome::Confirmed { attempts: 2, .. }));
        assert!(ex.is_idle());
    }

    #[test]
    fn attempts_never_exceed_the_policy() {
        let mut ex = executor();
        let mut now = Instant::now();
        ex.offer(discard(5, "E")).unwrap();

        let mut sent = 0;
        let outcome = loop {
            if ex.next_to_execute(now).is_some() {
                sent += 1;
                ex.dispatched(now);
            }
            now += Duration::from_millis(100);
            if let Some(outcome) = ex.tick(now) {
                break outcome;
            }
        };
        assert_eq!(sent, 3);
        assert!(matches!(
            outcome,
            Outcome::Abandoned {
                error: ActionError::VerificationFailed { attempts: 3, .. },
                ..
            }
        ));
        assert!(ex.is_idle());
    }

    #[test]
    fn same_decision_is_rejected_while_in_flight() {
        let mut ex = executor();
        let now = Instant::now();
        ex.offer(discard(5, "E")).unwrap();
        ex.next_to_execute(now).unwrap();
        assert_eq!(ex.offer(discard(5, "W")), Err(ActionError::Busy));

        // A newer decision is queued behind it, replacing an older queued one.
        assert_eq!(ex.offer(discard(6, "W")), Ok(None));
        let replaced = ex.offer(discard(7, "N")).unwrap().expect("replaced");
        assert_eq!(replaced.decision.seq, 6);
    }

    #[test]
    fn withdraw_drops_queued_and_backing_off_intents() {
        let mut ex = executor();
        let now = Instant::now();
        ex.offer(discard(5, "E")).unwrap();
        ex.next_to_execute(now).unwrap();
        ex.dispatched(now);
        ex.tick(now + Duration::from_millis(500));
        assert!(matches!(ex.state, ExecutorState::Backoff { .. }));
        ex.offer(discard(6, "W")).unwrap();

        let dropped = ex.withdraw("observe mode");
        assert_eq!(dropped.len(), 2);
        assert!(dropped.iter().all(|o| matches!(o, Outcome::Reverted { .. })));
        assert!(ex.is_idle());
        assert!(ex.next_to_execute(now + Duration::from_secs(5)).is_none());

        // Clicks already sent are still verified.
        ex.offer(discard(7, "N")).unwrap();
        ex.next_to_execute(now).unwrap();
        ex.dispatched(now);
        assert!(ex.withdraw("observe mode").is_empty());
        assert!(matches!(ex.state, ExecutorState::Verifying { .. }));
    }

    #[test]
    fn other_outcome_reverts_the_intent() {
        let mut ex = executor();
        let now = Instant::now();
        ex.offer(discard(5, "E")).unwrap();
        ex.next_to_execute(now).unwrap();
        ex.dispatched(now);
        let outcome = ex.observe(&dahai(0, "W")).expect("reverted");
        assert!(matches!(outcome, Outcome::Reverted { .. }));
    }

    #[test]
    fn pass_is_confirmed_by_another_seat_claiming() {
        let intent = pass(9);
        let pon = CanonicalEvent::Pon {
            actor: 2,
            target: 1,
            pai: t("E"),
            consumed: vec![t("E"), t("E")],
        };
        assert_eq!(verify(&intent, &pon), Verification::Confirmed);
        assert_eq!(verify(&intent, &CanonicalEvent::CallWindowClosed), Verification::Confirmed);
        assert_eq!(
            verify(&intent, &CanonicalEvent::ReachAccepted { actor: 1 }),
            Verification::Pending
        );
    }

    #[test]
    fn unrelated_events_leave_a_discard_pending() {
        let intent = discard(5, "E");
        assert_eq!(
            verify(&intent, &CanonicalEvent::Dora { dora_marker: t("3s") }),
            Verification::Pending
        );
        assert_eq!(
            verify(&intent, &CanonicalEvent::Reach { actor: 0 }),
            Verification::Pending
        );
        assert!(matches!(
            verify(
                &intent,
                &CanonicalEvent::Ryukyoku {
                    reason: crate::message::DrawReason::Exhaustive,
                    tenpai: vec![]
                }
            ),
            Verification::Refuted(_)
        ));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_for_attempt(1), Duration::from_millis(300));
        assert_eq!(p.backoff_for_attempt(2), Duration::from_millis(600));
        assert_eq!(p.backoff_for_attempt(5), Duration::from_millis(2_000));
    }
}
