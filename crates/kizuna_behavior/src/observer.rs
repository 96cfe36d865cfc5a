//! Observers of the state machine.
//!
//! Collaborators (avatar animation, speech, logging) register an `Observer`
//! and are told about every mode change and every cue for them to act on.
//! A panicking observer is logged and skipped; it never takes the machine
//! or the other observers down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use kizuna_core::Mode;
use serde::Serialize;

/// Something a collaborator should act on. The matching pending item (greet
/// request, search request, ...) can be read from the machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cue", rename_all = "snake_case")]
pub enum Cue {
    AlertRaised { event_id: String },
    AlertUpdated { event_id: String, update_seq: u64 },
    AlertCleared { event_id: String },
    Emergency { message: String },
    SearchRequested { attempt: u32 },
    NameAsk { alias: String },
    NameConfirm { alias: String, candidate: String },
    NameRetry { alias: String },
    /// The name flow was closed without a name: unanswered or rejected too often.
    NameExpired { alias: String },
    NameSetRequested { alias: String, name: String },
    NameSaved { alias: String, name: String },
    ForgetRequested { name_or_alias: String },
    Greet { speaker_key: String },
    IdlePresence { text: String },
    Starter { text: String },
}

pub trait Observer: Send + Sync {
    fn on_mode_changed(&self, mode: Mode);

    fn on_cue(&self, _cue: &Cue) {}
}

impl<F> Observer for F
where
    F: Fn(Mode) + Send + Sync,
{
    fn on_mode_changed(&self, mode: Mode) {
        self(mode)
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    list: Vec<Arc<dyn Observer>>,
}

impl Observers {
    pub(crate) fn add(&mut self, observer: Arc<dyn Observer>) {
        self.list.push(observer);
    }

    pub(crate) fn mode_changed(&self, mode: Mode) {
        for (i, obs) in self.list.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| obs.on_mode_changed(mode))).is_err() {
                tracing::warn!(observer = i, %mode, "Observer panicked on mode change");
            }
        }
    }

    pub(crate) fn cue(&self, cue: &Cue) {
        for (i, obs) in self.list.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| obs.on_cue(cue))).is_err() {
                tracing::warn!(observer = i, ?cue, "Observer panicked on cue");
            }
        }
    }
}
