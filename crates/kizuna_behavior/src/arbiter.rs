//! Interrupt Arbiter
//!
//! Decides whether a requested mode change happens now or waits for the end
//! of the utterance in progress. There is a single pending slot: a newer
//! queued request overwrites an older one.

use kizuna_core::Mode;
use serde::Serialize;

/// Why a transition was requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterruptReason {
    Alert { event_id: String },
    Emergency,
    Search { query: Option<String> },
    NameRequest { alias: String },
    Greet { speaker_key: String },
    Starter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingInterrupt {
    pub target: Mode,
    pub reason: InterruptReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arbitration {
    /// Apply the transition now.
    Immediate,
    /// Wait for the next utterance boundary. Carries the request it replaced.
    Queued { replaced: Option<PendingInterrupt> },
}

#[derive(Debug, Default)]
pub struct InterruptArbiter {
    pending: Option<PendingInterrupt>,
}

impl InterruptArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immediate when `allow_mid_chunk` is set or nothing is being said;
    /// otherwise the request takes the pending slot.
    pub fn arbitrate(
        &mut self,
        current: Mode,
        target: Mode,
        reason: InterruptReason,
        allow_mid_chunk: bool,
    ) -> Arbitration {
        if allow_mid_chunk || !current.is_speaking() {
            return Arbitration::Immediate;
        }
        let replaced = self.pending.replace(PendingInterrupt { target, reason });
        if let Some(old) = &replaced {
            tracing::debug!(
                "Queued interrupt {} replaced by {}",
                old.target,
                target
            );
        }
        Arbitration::Queued { replaced }
    }

    pub fn pending(&self) -> Option<&PendingInterrupt> {
        self.pending.as_ref()
    }

    pub fn take(&mut self) -> Option<PendingInterrupt> {
        self.pending.take()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Drop the pending request if it targets `target`.
    pub fn discard_target(&mut self, target: Mode) -> bool {
        if self.pending.as_ref().is_some_and(|p| p.target == target) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}
