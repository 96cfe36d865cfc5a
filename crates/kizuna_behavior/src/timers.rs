//! Timer Manager
//!
//! One cancellable deferred task per category. Scheduling a category that
//! already has a live timer cancels the old one; the replaced timer can never
//! fire afterwards because its generation is gone.
//!
//! Timers are deadlines on the machine's clock rather than spawned tasks, so
//! the owner decides when to fire them (`pop_due`) and a driver can sleep
//! exactly until `next_deadline`.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    SearchTimeout,
    AlertAutoEnd,
    ErrorRecovery,
    RetryBackoff,
}

impl TimerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerKind::SearchTimeout => "search_timeout",
            TimerKind::AlertAutoEnd => "alert_auto_end",
            TimerKind::ErrorRecovery => "error_recovery",
            TimerKind::RetryBackoff => "retry_backoff",
        }
    }
}

/// Identifies one scheduled firing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerHandle {
    pub kind: TimerKind,
    pub due: f64,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    due: f64,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct TimerManager {
    slots: BTreeMap<TimerKind, Slot>,
    next_generation: u64,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire `delay` seconds after `now`, replacing any live timer
    /// of the same kind.
    pub fn schedule(&mut self, kind: TimerKind, now: f64, delay: f64) -> TimerHandle {
        self.next_generation += 1;
        let due = now + delay.max(0.0);
        let slot = Slot {
            due,
            generation: self.next_generation,
        };
        if let Some(old) = self.slots.insert(kind, slot) {
            tracing::debug!(
                "Cancelled {} timer (generation {}) in favour of a new one",
                kind.as_str(),
                old.generation
            );
        }
        TimerHandle {
            kind,
            due,
            generation: slot.generation,
        }
    }

    /// Cancel the live timer of `kind`. Returns whether one was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let cancelled = self.slots.remove(&kind).is_some();
        if cancelled {
            tracing::debug!("{} timer cancelled", kind.as_str());
        }
        cancelled
    }

    pub fn cancel_all(&mut self) {
        self.slots.clear();
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Earliest deadline among live timers.
    pub fn next_deadline(&self) -> Option<f64> {
        self.slots.values().map(|s| s.due).reduce(f64::min)
    }

    /// Remove and return the earliest timer due at `now`, if any.
    ///
    /// Callers fire one timer at a time so that a firing which cancels or
    /// replaces another timer takes effect before the next one is considered.
    pub fn pop_due(&mut self, now: f64) -> Option<TimerHandle> {
        let (kind, slot) = self
            .slots
            .iter()
            .filter(|(_, s)| s.due <= now)
            .min_by(|a, b| a.1.due.total_cmp(&b.1.due))
            .map(|(k, s)| (*k, *s))?;
        self.slots.remove(&kind);
        Some(TimerHandle {
            kind,
            due: slot.due,
            generation: slot.generation,
        })
    }
}
