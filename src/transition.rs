//! Next-episode transition state machine

use crate::models::EpisodePayload;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
    Idle,
    /// Episode loaded and the one after it is known
    Armed,
    CountdownActive,
    Committed,
    Cancelled,
}

/// Cancellable countdown driven by explicit ticks
#[derive(Debug, Clone)]
pub struct CountdownTimer {
    length: Duration,
    deadline: Option<Instant>,
    /// Time left while suspended
    suspended: Option<Duration>,
}

impl CountdownTimer {
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            deadline: None,
            suspended: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.deadline = Some(now + self.length);
        self.suspended = None;
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.suspended = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn suspend(&mut self, now: Instant) {
        if let Some(deadline) = self.deadline.take() {
            self.suspended = Some(deadline.saturating_duration_since(now));
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(left) = self.suspended.take() {
            self.deadline = Some(now + left);
        }
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match (self.deadline, self.suspended) {
            (Some(deadline), _) => Some(deadline.saturating_duration_since(now)),
            (None, left) => left,
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionEvent {
    CountdownStarted { seconds: u64 },
    /// Load this episode now
    Commit(EpisodePayload),
}

pub struct TransitionMachine {
    state: TransitionState,
    successor: Option<EpisodePayload>,
    /// CountdownActive was entered for this episode
    countdown_fired: bool,
    paused: bool,
    threshold: f64,
    timer: CountdownTimer,
}

impl TransitionMachine {
    pub fn new(threshold_secs: u64, countdown: Duration) -> Self {
        Self {
            state: TransitionState::Idle,
            successor: None,
            countdown_fired: false,
            paused: false,
            threshold: threshold_secs as f64,
            timer: CountdownTimer::new(countdown),
        }
    }

    pub fn state(&self) -> TransitionState {
        self.state
    }

    pub fn successor(&self) -> Option<&EpisodePayload> {
        self.successor.as_ref()
    }

    /// Back to Idle for whatever loads next
    pub fn reset(&mut self) {
        self.timer.cancel();
        self.state = TransitionState::Idle;
        self.successor = None;
        self.countdown_fired = false;
        self.paused = false;
    }

    /// A new episode loaded, with its successor if already known
    pub fn load_episode(&mut self, successor: Option<EpisodePayload>) {
        self.reset();
        if let Some(next) = successor {
            self.arm(next);
        }
    }

    /// Successor found after the episode loaded
    pub fn arm(&mut self, successor: EpisodePayload) {
        if self.state != TransitionState::Idle {
            return;
        }
        debug!(
            season = successor.season,
            episode = successor.episode_num,
            "[NEXT] Armed"
        );
        self.successor = Some(successor);
        self.state = TransitionState::Armed;
    }

    pub fn set_paused(&mut self, paused: bool, now: Instant) {
        self.paused = paused;
        if self.state == TransitionState::CountdownActive {
            if paused {
                self.timer.suspend(now);
            } else {
                self.timer.resume(now);
            }
        }
    }

    pub fn on_time_update(
        &mut self,
        current: f64,
        duration: Option<f64>,
        now: Instant,
    ) -> Option<TransitionEvent> {
        if self.state != TransitionState::Armed || self.countdown_fired || self.paused {
            return None;
        }
        let duration = duration.filter(|d| d.is_finite() && *d > 0.0)?;
        if duration - current <= self.threshold {
            return Some(self.start_countdown(now));
        }
        None
    }

    pub fn on_ended(&mut self, now: Instant) -> Option<TransitionEvent> {
        match self.state {
            TransitionState::Armed if !self.countdown_fired => Some(self.start_countdown(now)),
            TransitionState::CountdownActive => self.commit(),
            _ => None,
        }
    }

    /// Drive the countdown
    pub fn tick(&mut self, now: Instant) -> Option<TransitionEvent> {
        if self.state == TransitionState::CountdownActive && self.timer.expired(now) {
            info!("[NEXT] Countdown elapsed");
            return self.commit();
        }
        None
    }

    /// User asked for the next episode
    pub fn confirm(&mut self) -> Option<TransitionEvent> {
        match self.state {
            TransitionState::Armed | TransitionState::CountdownActive => self.commit(),
            _ => None,
        }
    }

    /// User dismissed the countdown
    pub fn cancel(&mut self) {
        if matches!(
            self.state,
            TransitionState::Armed | TransitionState::CountdownActive
        ) {
            debug!("[NEXT] Cancelled");
            self.timer.cancel();
            self.state = TransitionState::Cancelled;
        }
    }

    /// Whole seconds left on the countdown, rounded up
    pub fn countdown_remaining(&self, now: Instant) -> Option<u64> {
        if self.state != TransitionState::CountdownActive {
            return None;
        }
        self.timer.remaining(now).map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }

    fn start_countdown(&mut self, now: Instant) -> TransitionEvent {
        self.countdown_fired = true;
        self.state = TransitionState::CountdownActive;
        self.timer.start(now);
        let seconds = self.timer.remaining(now).map(|d| d.as_secs()).unwrap_or(0);
        info!(seconds, "[NEXT] Countdown started");
        TransitionEvent::CountdownStarted { seconds }
    }

    fn commit(&mut self) -> Option<TransitionEvent> {
        let next = self.successor.take()?;
        self.timer.cancel();
        self.state = TransitionState::Committed;
        info!(season = next.season, episode = next.episode_num, "[NEXT] Committed");
        Some(TransitionEvent::Commit(next))
    }
}
