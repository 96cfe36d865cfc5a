//! Alert sequencing.
//!
//! Keeps the single current alert and applies updates in sequence order:
//! an update carrying a sequence number not above the stored one is stale
//! and dropped, so the record always reflects the newest update seen.

use kizuna_core::event::AlertPayload;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub event_id: String,
    pub region: String,
    pub kind: String,
    pub severity: i32,
    pub message: String,
    pub update_seq: u64,
    pub source: Option<String>,
    pub cleared: bool,
}

impl AlertRecord {
    fn from_payload(p: AlertPayload) -> Self {
        Self {
            event_id: p.event_id,
            region: p.region,
            kind: p.kind,
            severity: p.severity,
            message: p.message,
            update_seq: p.update_seq.unwrap_or(1),
            source: p.source,
            cleared: false,
        }
    }

    /// How hard the alert hits the affect state, 0.6 to 1.0.
    pub fn intensity(&self) -> f32 {
        if self.kind.eq_ignore_ascii_case("tsunami") || self.severity >= 9 {
            1.0
        } else if self.kind.eq_ignore_ascii_case("earthquake") {
            0.8
        } else {
            0.6
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// A fresh alert replaced whatever was stored.
    New,
    /// Newer update merged into the current alert.
    Updated,
    /// Sequence number not above the stored one; nothing changed.
    Stale,
    Cleared,
    /// Clear named a different alert, or there was nothing to clear.
    Ignored,
}

#[derive(Debug, Default)]
pub struct AlertSequencer {
    current: Option<AlertRecord>,
    last_was_update: bool,
}

impl AlertSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&AlertRecord> {
        self.current.as_ref()
    }

    pub fn last_was_update(&self) -> bool {
        self.last_was_update
    }

    /// An alert is stored and has not been cleared.
    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|a| !a.cleared)
    }

    pub fn apply_new(&mut self, payload: AlertPayload) -> AlertOutcome {
        let record = AlertRecord::from_payload(payload);
        tracing::info!(
            event_id = %record.event_id,
            kind = %record.kind,
            severity = record.severity,
            "New alert"
        );
        self.current = Some(record);
        self.last_was_update = false;
        AlertOutcome::New
    }

    /// Merge an update into the current alert. An update for a different
    /// (or no) stored alert is treated as a new alert.
    pub fn apply_update(&mut self, payload: AlertPayload) -> AlertOutcome {
        let Some(current) = self
            .current
            .as_mut()
            .filter(|c| c.event_id == payload.event_id)
        else {
            return self.apply_new(payload);
        };

        let seq = payload.update_seq.unwrap_or(current.update_seq);
        if seq <= current.update_seq {
            tracing::debug!(
                event_id = %current.event_id,
                "Dropping stale alert update (seq {} <= {})",
                seq,
                current.update_seq
            );
            return AlertOutcome::Stale;
        }

        current.update_seq = seq;
        current.severity = payload.severity;
        current.message = payload.message;
        if !payload.region.is_empty() {
            current.region = payload.region;
        }
        if !payload.kind.is_empty() {
            current.kind = payload.kind;
        }
        if payload.source.is_some() {
            current.source = payload.source;
        }
        current.cleared = false;
        self.last_was_update = true;
        tracing::info!(event_id = %current.event_id, seq, "Alert updated");
        AlertOutcome::Updated
    }

    /// Mark the current alert cleared. A clear naming a different event id
    /// is ignored.
    pub fn clear(&mut self, event_id: Option<&str>) -> AlertOutcome {
        match self.current.as_mut() {
            Some(c) if !c.cleared && event_id.map_or(true, |id| id == c.event_id) => {
                c.cleared = true;
                tracing::info!(event_id = %c.event_id, "Alert cleared");
                AlertOutcome::Cleared
            }
            _ => AlertOutcome::Ignored,
        }
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.last_was_update = false;
    }
}
