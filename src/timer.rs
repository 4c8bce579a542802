//! Deadline bookkeeping for the connection's timers.
//!
//! Nothing here sleeps. The driver asks for the earliest deadline, waits on it,
//! and hands the expired timers back to the connection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Timers a connection can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Waiting for the switch's HELLO.
    Hello,
    /// Waiting for the FEATURES_REPLY.
    FeaturesReply,
    /// Periodic cookie table aging.
    CookieAging,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    deadline: Instant,
    interval: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct TimerSet {
    timers: HashMap<TimerKind, Timer>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer, replacing any armed timer of the same kind.
    pub fn arm(&mut self, kind: TimerKind, after: Duration, now: Instant) {
        self.timers.insert(
            kind,
            Timer {
                deadline: now + after,
                interval: None,
            },
        );
    }

    /// Arm a timer that re-arms itself every `interval` once it fires.
    pub fn arm_periodic(&mut self, kind: TimerKind, interval: Duration, now: Instant) {
        self.timers.insert(
            kind,
            Timer {
                deadline: now + interval,
                interval: Some(interval),
            },
        );
    }

    /// Returns whether a timer was armed.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.timers.remove(&kind).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.timers.contains_key(&kind)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.deadline).min()
    }

    /// Collect the timers due at `now`, earliest first. One-shot timers are
    /// disarmed; periodic ones are re-armed from `now`.
    pub fn expired(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(kind, t)| (t.deadline, *kind))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, kind) in &due {
            match self.timers.get(kind).and_then(|t| t.interval) {
                Some(interval) => {
                    if let Some(timer) = self.timers.get_mut(kind) {
                        timer.deadline = now + interval;
                    }
                }
                None => {
                    self.timers.remove(kind);
                }
            }
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}
