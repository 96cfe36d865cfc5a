//! Behaviour state machine.
//!
//! Single owner of the avatar's mode, affect state, pending interrupt and
//! timers. Every inbound event and every timer firing goes through the same
//! synchronous path on `&mut self`, so no two handlers ever interleave.
//! Collaborators read the published pending items (search request, greet,
//! name hand-off, ...) and are told about changes through `Observer`s.

use std::sync::Arc;

use kizuna_core::event::{
    AlertClearPayload, AlertPayload, EmergencyPayload, ForgetNamePayload, NameAnswerPayload,
    NameConfirmPayload, SearchPayload, SearchResultPayload, SpeakerUnknownPayload, SttFinalPayload,
};
use kizuna_core::{AffectState, Clock, Event, KizunaConfig, Mode, TickContext};
use serde::Serialize;
use serde_json::Value;

use crate::alert::{AlertOutcome, AlertRecord, AlertSequencer};
use crate::arbiter::{Arbitration, InterruptArbiter, InterruptReason, PendingInterrupt};
use crate::emergency::{EmergencyController, EmergencyDecision, NotificationSound};
use crate::greet::{GreetCandidate, GreetRequest, GreetScheduler};
use crate::name_learning::{ForgetRequest, NameLearning, NameRequestState, NameSaved, NameSetRequest, Rejection};
use crate::observer::{Cue, Observer, Observers};
use crate::presence::{IdlePresence, PresenceScheduler, Starter};
use crate::timers::{TimerHandle, TimerKind, TimerManager};

/// Guards against a zero-delay timer rescheduling itself forever.
const MAX_FIRINGS_PER_POLL: usize = 32;

/// One search attempt for the search collaborator to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub sources: Vec<String>,
    pub attempt: u32,
    pub ts: f64,
}

/// Read-only copy of everything a collaborator may want to look at.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub mode: Mode,
    pub previous_mode: Mode,
    pub affect: AffectState,
    pub pending_interrupt: Option<PendingInterrupt>,
    pub current_alert: Option<AlertRecord>,
    pub last_alert_was_update: bool,
    pub search_attempts: u32,
    pub search_request: Option<SearchRequest>,
    pub current_search_result: Option<SearchResultPayload>,
    pub active_speaker_id: Option<String>,
    pub active_speaker_alias: Option<String>,
    pub pending_greet: Option<GreetRequest>,
    pub pending_starter: Option<Starter>,
    pub pending_idle_presence: Option<IdlePresence>,
    pub name_request: Option<NameRequestState>,
    pub pending_name_set: Option<NameSetRequest>,
    pub pending_name_saved: Option<NameSaved>,
    pub pending_forget: Option<ForgetRequest>,
    pub emergency_active: bool,
    pub emergency_message: Option<String>,
}

pub struct BehaviorMachine {
    config: KizunaConfig,
    clock: Arc<dyn Clock>,

    mode: Mode,
    previous: Mode,
    mode_entered_at: f64,
    affect: AffectState,

    timers: TimerManager,
    arbiter: InterruptArbiter,
    alerts: AlertSequencer,
    emergency: EmergencyController,
    names: NameLearning,
    greet: GreetScheduler,
    presence: PresenceScheduler,
    observers: Observers,

    search_attempts: u32,
    last_search_at: Option<f64>,
    search_query: Option<String>,
    search_sources: Vec<String>,
    search_request: Option<SearchRequest>,
    search_result: Option<SearchResultPayload>,

    last_speaking_at: Option<f64>,
    active_speaker_id: Option<String>,
    active_speaker_alias: Option<String>,

    pending_greet: Option<GreetRequest>,
    pending_starter: Option<Starter>,
    pending_idle_presence: Option<IdlePresence>,
    pending_name_set: Option<NameSetRequest>,
    pending_name_saved: Option<NameSaved>,
    pending_forget: Option<ForgetRequest>,
    emergency_message: Option<String>,
    last_emergency: Option<EmergencyDecision>,
}

impl BehaviorMachine {
    pub fn new(config: KizunaConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            emergency: EmergencyController::new(config.emergency.clone(), clock.clone()),
            names: NameLearning::new(config.names.clone()),
            greet: GreetScheduler::new(config.greet.clone()),
            presence: PresenceScheduler::new(config.presence.clone()),
            config,
            clock,
            mode: Mode::Idle,
            previous: Mode::Idle,
            mode_entered_at: now,
            affect: AffectState::default(),
            timers: TimerManager::new(),
            arbiter: InterruptArbiter::new(),
            alerts: AlertSequencer::new(),
            observers: Observers::default(),
            search_attempts: 0,
            last_search_at: None,
            search_query: None,
            search_sources: Vec::new(),
            search_request: None,
            search_result: None,
            last_speaking_at: None,
            active_speaker_id: None,
            active_speaker_alias: None,
            pending_greet: None,
            pending_starter: None,
            pending_idle_presence: None,
            pending_name_set: None,
            pending_name_saved: None,
            pending_forget: None,
            emergency_message: None,
            last_emergency: None,
        }
    }

    /// Deterministic idle presence and starter phrasing.
    pub fn with_presence_seed(mut self, seed: u64) -> Self {
        self.presence = PresenceScheduler::with_seed(self.config.presence.clone(), seed);
        self
    }

    pub fn with_notification_sound(mut self, sound: Arc<dyn NotificationSound>) -> Self {
        self.emergency.set_notification_sound(sound);
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn Observer>) {
        self.observers.add(observer);
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn previous_mode(&self) -> Mode {
        self.previous
    }

    pub fn affect(&self) -> AffectState {
        self.affect
    }

    pub fn pending_interrupt(&self) -> Option<&PendingInterrupt> {
        self.arbiter.pending()
    }

    pub fn current_alert(&self) -> Option<&AlertRecord> {
        self.alerts.current()
    }

    pub fn last_alert_was_update(&self) -> bool {
        self.alerts.last_was_update()
    }

    pub fn search_attempts(&self) -> u32 {
        self.search_attempts
    }

    pub fn search_request(&self) -> Option<&SearchRequest> {
        self.search_request.as_ref()
    }

    pub fn take_search_request(&mut self) -> Option<SearchRequest> {
        self.search_request.take()
    }

    pub fn current_search_result(&self) -> Option<&SearchResultPayload> {
        self.search_result.as_ref()
    }

    pub fn active_speaker_id(&self) -> Option<&str> {
        self.active_speaker_id.as_deref()
    }

    pub fn active_speaker_alias(&self) -> Option<&str> {
        self.active_speaker_alias.as_deref()
    }

    pub fn pending_greet(&self) -> Option<&GreetRequest> {
        self.pending_greet.as_ref()
    }

    pub fn take_pending_greet(&mut self) -> Option<GreetRequest> {
        self.pending_greet.take()
    }

    pub fn pending_starter(&self) -> Option<&Starter> {
        self.pending_starter.as_ref()
    }

    pub fn take_pending_starter(&mut self) -> Option<Starter> {
        self.pending_starter.take()
    }

    pub fn pending_idle_presence(&self) -> Option<&IdlePresence> {
        self.pending_idle_presence.as_ref()
    }

    pub fn take_pending_idle_presence(&mut self) -> Option<IdlePresence> {
        self.pending_idle_presence.take()
    }

    pub fn name_request(&self) -> Option<&NameRequestState> {
        self.names.request()
    }

    pub fn pending_name_set(&self) -> Option<&NameSetRequest> {
        self.pending_name_set.as_ref()
    }

    pub fn pending_name_saved(&self) -> Option<&NameSaved> {
        self.pending_name_saved.as_ref()
    }

    pub fn take_pending_name_saved(&mut self) -> Option<NameSaved> {
        self.pending_name_saved.take()
    }

    pub fn pending_forget(&self) -> Option<&ForgetRequest> {
        self.pending_forget.as_ref()
    }

    pub fn take_pending_forget(&mut self) -> Option<ForgetRequest> {
        self.pending_forget.take()
    }

    /// Opinions and chatter should stay quiet while an emergency is active.
    pub fn is_opinion_suppressed(&self) -> bool {
        self.emergency.is_active()
    }

    pub fn emergency_message(&self) -> Option<&str> {
        self.emergency_message.as_deref()
    }

    pub fn last_emergency_decision(&self) -> Option<&EmergencyDecision> {
        self.last_emergency.as_ref()
    }

    pub fn is_timer_pending(&self, kind: TimerKind) -> bool {
        self.timers.is_pending(kind)
    }

    /// Clock time at which the next timer fires.
    pub fn next_deadline(&self) -> Option<f64> {
        self.timers.next_deadline()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            mode: self.mode,
            previous_mode: self.previous,
            affect: self.affect,
            pending_interrupt: self.arbiter.pending().cloned(),
            current_alert: self.alerts.current().cloned(),
            last_alert_was_update: self.alerts.last_was_update(),
            search_attempts: self.search_attempts,
            search_request: self.search_request.clone(),
            current_search_result: self.search_result.clone(),
            active_speaker_id: self.active_speaker_id.clone(),
            active_speaker_alias: self.active_speaker_alias.clone(),
            pending_greet: self.pending_greet.clone(),
            pending_starter: self.pending_starter.clone(),
            pending_idle_presence: self.pending_idle_presence.clone(),
            name_request: self.names.request().cloned(),
            pending_name_set: self.pending_name_set.clone(),
            pending_name_saved: self.pending_name_saved.clone(),
            pending_forget: self.pending_forget.clone(),
            emergency_active: self.emergency.is_active(),
            emergency_message: self.emergency_message.clone(),
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Parse and handle a named event. Unknown names and malformed payloads
    /// are logged and dropped.
    pub fn submit_named(&mut self, name: &str, payload: Value) {
        match Event::parse(name, payload) {
            Ok(event) => self.submit(event),
            Err(kizuna_core::Error::UnknownEvent(name)) => {
                tracing::debug!(event = %name, "Ignoring unknown event");
            }
            Err(e) => tracing::warn!("Dropping event: {}", e),
        }
    }

    pub fn submit(&mut self, event: Event) {
        if event.is_stt() && self.emergency.is_active() {
            tracing::debug!(event = event.name(), "Speech input suppressed during emergency");
            return;
        }
        tracing::debug!(event = event.name(), mode = %self.mode, "Handling event");

        match event {
            Event::AlertNew(p) => self.on_alert_new(p),
            Event::AlertUpdate(p) => self.on_alert_update(p),
            Event::AlertClear(p) => self.on_alert_clear(p),
            Event::StartSearch(p) => self.on_start_search(p),
            Event::CuriositySpike => self.request_search(None, Vec::new(), true),
            Event::TalkStart => self.on_talk_start(),
            Event::TalkEnd => self.on_talk_end(),
            Event::SttPartial(p) => {
                tracing::trace!(text = %p.text, "Partial transcript");
            }
            Event::SttFinal(p) => self.on_stt_final(p),
            Event::SearchResult(p) => self.on_search_result(p),
            Event::SearchFailed(p) => self.on_search_failed(p.error),
            Event::Error { source } => self.on_error(&source),
            Event::RecoverDone => self.enter_mode(Mode::Idle),
            Event::Tick { dt } => self.on_tick(dt),
            Event::SpeakerUnknownDetected(p) => self.on_speaker_unknown(p),
            Event::NameAnswer(p) => self.on_name_answer(p),
            Event::NameConfirmYes(p) => self.on_name_confirm_yes(p),
            Event::NameConfirmNo(_) => self.on_name_confirm_no(),
            Event::NameSaved(p) => self.on_name_saved(p),
            Event::ForgetName(p) => self.on_forget_name(p),
            Event::EmergencyTrigger(p) => self.on_emergency(p),
            Event::Reset => self.reset(),
        }
    }

    /// The utterance in progress reached a safe stopping point. Applies the
    /// queued interrupt, if any; returns whether the mode changed.
    pub fn notify_utterance_boundary(&mut self) -> bool {
        self.last_speaking_at = Some(self.clock.now());
        let Some(pending) = self.arbiter.pending() else {
            return false;
        };
        if self.mode == Mode::Alert && pending.target != Mode::Alert {
            tracing::debug!(queued = %pending.target, "Holding queued interrupt until the alert ends");
            return false;
        }
        let Some(pending) = self.arbiter.take() else {
            return false;
        };
        tracing::info!(to = %pending.target, "Applying queued interrupt at utterance boundary");
        self.apply_transition(pending.target);
        true
    }

    /// Fire every timer that is due. Returns how many fired.
    pub fn poll_timers(&mut self) -> usize {
        let mut fired = 0;
        while let Some(handle) = self.timers.pop_due(self.clock.now()) {
            self.fire_timer(handle);
            fired += 1;
            if fired >= MAX_FIRINGS_PER_POLL {
                tracing::warn!("Timer storm: stopped after {} firings", fired);
                break;
            }
        }
        fired
    }

    /// Back to a calm IDLE: affect reset, timers, queued interrupt, stored
    /// alert and any open name flow dropped.
    pub fn reset(&mut self) {
        tracing::info!("Resetting behaviour state");
        self.timers.cancel_all();
        self.arbiter.clear();
        self.emergency.reset();
        self.alerts.reset();
        self.names.clear();
        self.search_attempts = 0;
        self.search_query = None;
        self.search_sources.clear();
        self.search_request = None;
        self.emergency_message = None;
        self.affect.confidence = 0.9;
        self.affect.glitch = 0.0;
        self.affect.curiosity = 0.05;
        self.previous = Mode::Idle;
        self.enter_mode(Mode::Idle);
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn enter_mode(&mut self, mode: Mode) {
        let old = self.mode;
        let now = self.clock.now();
        self.on_exit(old, mode);
        self.mode = mode;
        self.mode_entered_at = now;

        if old != mode {
            tracing::info!(from = %old, to = %mode, "Mode change");
            self.observers.mode_changed(mode);
        }

        match mode {
            Mode::Alert => {
                self.timers
                    .schedule(TimerKind::AlertAutoEnd, now, self.config.timers.alert_hold_secs);
            }
            Mode::Search if old != Mode::Search => {
                self.search_attempts = 0;
                self.begin_search_attempt();
            }
            _ => {}
        }
    }

    fn on_exit(&mut self, old: Mode, new: Mode) {
        if old == new {
            return;
        }
        match old {
            Mode::Alert => {
                self.timers.cancel(TimerKind::AlertAutoEnd);
            }
            Mode::Search => {
                self.timers.cancel(TimerKind::SearchTimeout);
                self.timers.cancel(TimerKind::RetryBackoff);
                // The staged query stays for a restore into SEARCH
                self.search_request = None;
            }
            Mode::Error | Mode::Recover if !matches!(new, Mode::Error | Mode::Recover) => {
                self.timers.cancel(TimerKind::ErrorRecovery);
            }
            _ => {}
        }
    }

    /// Enter `target`, remembering where we came from.
    fn apply_transition(&mut self, target: Mode) {
        if self.mode != target {
            self.previous = self.mode;
        }
        self.enter_mode(target);
    }

    /// Returns whether the transition happened now (as opposed to queued).
    fn request_transition(&mut self, target: Mode, reason: InterruptReason, allow_mid_chunk: bool) -> bool {
        match self.arbiter.arbitrate(self.mode, target, reason, allow_mid_chunk) {
            Arbitration::Immediate => {
                self.apply_transition(target);
                true
            }
            Arbitration::Queued { .. } => {
                tracing::info!(to = %target, current = %self.mode, "Deferred until utterance boundary");
                false
            }
        }
    }

    fn restore_previous(&mut self) {
        let mut target = self.previous;
        if target == self.mode {
            target = Mode::Idle;
        }
        // Never fall back into an alert that is already over
        if target == Mode::Alert && !self.alerts.is_active() && !self.emergency.is_active() {
            target = Mode::Idle;
        }
        self.enter_mode(target);
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn fire_timer(&mut self, handle: TimerHandle) {
        tracing::debug!(timer = handle.kind.as_str(), "Timer fired");
        let now = self.clock.now();
        match handle.kind {
            TimerKind::SearchTimeout => {
                if self.mode != Mode::Search {
                    return;
                }
                tracing::warn!("Search timed out");
                self.search_attempts = 0;
                self.search_query = None;
                self.search_request = None;
                self.on_error("search_timeout");
                self.restore_previous();
            }
            TimerKind::AlertAutoEnd => {
                if self.mode == Mode::Alert {
                    self.restore_previous();
                }
            }
            TimerKind::ErrorRecovery => match self.mode {
                Mode::Error => {
                    if self.affect.confidence < self.config.affect.recover_confidence_floor {
                        self.enter_mode(Mode::Idle);
                    } else {
                        self.enter_mode(Mode::Recover);
                        self.timers.schedule(
                            TimerKind::ErrorRecovery,
                            now,
                            self.config.timers.recover_settle_secs,
                        );
                    }
                }
                Mode::Recover => self.enter_mode(Mode::Idle),
                _ => {}
            },
            TimerKind::RetryBackoff => {
                if self.mode == Mode::Search {
                    self.begin_search_attempt();
                }
            }
        }
    }

    // ========================================================================
    // Alerts and emergency
    // ========================================================================

    fn on_alert_new(&mut self, payload: AlertPayload) {
        let allow_mid = payload.allow_mid;
        self.alerts.apply_new(payload);
        self.raise_alert(allow_mid);
    }

    fn on_alert_update(&mut self, payload: AlertPayload) {
        let allow_mid = payload.allow_mid;
        match self.alerts.apply_update(payload) {
            AlertOutcome::New => self.raise_alert(allow_mid),
            AlertOutcome::Updated => {
                if let Some(alert) = self.alerts.current() {
                    let cue = Cue::AlertUpdated {
                        event_id: alert.event_id.clone(),
                        update_seq: alert.update_seq,
                    };
                    self.observers.cue(&cue);
                }
            }
            _ => {}
        }
    }

    fn raise_alert(&mut self, allow_mid: bool) {
        let Some(alert) = self.alerts.current() else {
            return;
        };
        let intensity = alert.intensity();
        let event_id = alert.event_id.clone();
        self.affect.nudge_glitch(0.3 * intensity);
        self.affect.nudge_arousal(0.3 * intensity);
        self.request_transition(
            Mode::Alert,
            InterruptReason::Alert {
                event_id: event_id.clone(),
            },
            allow_mid,
        );
        self.observers.cue(&Cue::AlertRaised { event_id });
    }

    fn on_alert_clear(&mut self, payload: AlertClearPayload) {
        if self.alerts.clear(payload.event_id.as_deref()) != AlertOutcome::Cleared {
            return;
        }
        self.arbiter.discard_target(Mode::Alert);
        if self.mode == Mode::Alert {
            self.restore_previous();
        }
        if let Some(alert) = self.alerts.current() {
            let cue = Cue::AlertCleared {
                event_id: alert.event_id.clone(),
            };
            self.observers.cue(&cue);
        }
    }

    fn on_emergency(&mut self, payload: EmergencyPayload) {
        let decision = self.emergency.maybe_trigger(&payload.message, &payload.reason);
        let should_alert = decision.should_alert;
        let message = decision.normalized_message.clone();
        self.last_emergency = Some(decision);
        if !should_alert {
            return;
        }
        self.arbiter.clear();
        self.request_transition(Mode::Alert, InterruptReason::Emergency, true);
        self.emergency_message = Some(message.clone());
        self.observers.cue(&Cue::Emergency { message });
    }

    // ========================================================================
    // Search
    // ========================================================================

    fn on_start_search(&mut self, payload: SearchPayload) {
        self.request_search(payload.query, payload.sources, true);
    }

    fn request_search(&mut self, query: Option<String>, sources: Vec<String>, honour_cooldown: bool) {
        let now = self.clock.now();
        if self.mode == Mode::Alert {
            tracing::info!("Search suppressed during alert");
            return;
        }
        if self.mode == Mode::Search {
            tracing::debug!("Search already running");
            return;
        }
        if honour_cooldown {
            if let Some(last) = self.last_search_at {
                if now - last < self.config.search.cooldown_secs {
                    tracing::info!("Search suppressed by cooldown ({:.0}s ago)", now - last);
                    return;
                }
            }
        }
        self.search_query = query;
        self.search_sources = sources;
        self.last_search_at = Some(now);
        let reason = InterruptReason::Search {
            query: self.search_query.clone(),
        };
        self.request_transition(Mode::Search, reason, false);
    }

    /// A search attempt is outstanding or a search is queued behind speech.
    fn search_pending(&self) -> bool {
        self.search_request.is_some()
            || self
                .arbiter
                .pending()
                .is_some_and(|p| p.target == Mode::Search)
    }

    fn begin_search_attempt(&mut self) {
        let now = self.clock.now();
        self.affect.nudge_arousal(0.15);
        self.affect.nudge_curiosity(-0.3);
        self.timers
            .schedule(TimerKind::SearchTimeout, now, self.config.timers.search_timeout_secs);
        let attempt = self.search_attempts + 1;
        self.search_request = Some(SearchRequest {
            query: self.search_query.clone(),
            sources: self.search_sources.clone(),
            attempt,
            ts: now,
        });
        tracing::info!(attempt, query = ?self.search_query, "Search attempt");
        self.observers.cue(&Cue::SearchRequested { attempt });
    }

    fn on_search_result(&mut self, result: SearchResultPayload) {
        if !result.ok {
            self.on_search_failed(result.error);
            return;
        }
        self.timers.cancel(TimerKind::RetryBackoff);
        self.timers.cancel(TimerKind::SearchTimeout);
        self.last_search_at = Some(self.clock.now());
        self.search_attempts = 0;
        self.search_query = None;
        self.search_request = None;
        self.affect.nudge_confidence(0.1);
        tracing::info!(items = result.items.len(), "Search succeeded");
        self.search_result = Some(result);
        if self.mode == Mode::Search {
            self.restore_previous();
        }
    }

    fn on_search_failed(&mut self, error: Option<String>) {
        let now = self.clock.now();
        self.last_search_at = Some(now);
        self.search_result = Some(SearchResultPayload {
            ok: false,
            error: error.clone(),
            ..Default::default()
        });
        if self.mode != Mode::Search {
            tracing::debug!(?error, "Search failure outside SEARCH ignored");
            return;
        }
        self.affect.nudge_confidence(-0.2);
        self.affect.nudge_glitch(0.3);
        self.timers.cancel(TimerKind::SearchTimeout);
        self.search_request = None;

        if self.search_attempts < self.config.timers.max_search_attempts {
            let backoff = 2f64
                .powi(self.search_attempts.min(30) as i32)
                .min(self.config.timers.max_backoff_secs);
            self.search_attempts += 1;
            self.timers.schedule(TimerKind::RetryBackoff, now, backoff);
            tracing::info!(attempt = self.search_attempts, backoff, ?error, "Search failed, retrying");
        } else {
            tracing::warn!(?error, "Search failed after {} attempts", self.search_attempts);
            self.search_attempts = 0;
            self.search_query = None;
            self.restore_previous();
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    fn on_error(&mut self, source: &str) {
        tracing::warn!(source, "Error event");
        self.enter_mode(Mode::Error);
        self.affect.nudge_confidence(-0.25);
        self.affect.nudge_glitch(0.4);
        self.timers.schedule(
            TimerKind::ErrorRecovery,
            self.clock.now(),
            self.config.timers.error_recover_secs,
        );
    }

    // ========================================================================
    // Speech and speakers
    // ========================================================================

    fn on_talk_start(&mut self) {
        self.last_speaking_at = Some(self.clock.now());
        self.affect.nudge_curiosity(-0.05);
        if self.mode.is_high_priority() {
            return;
        }
        self.enter_mode(Mode::Talk);
    }

    fn on_talk_end(&mut self) {
        if !self.notify_utterance_boundary() && self.mode.is_speaking() {
            self.enter_mode(Mode::Idle);
        }
    }

    fn on_stt_final(&mut self, p: SttFinalPayload) {
        let now = self.clock.now();
        self.expire_name_request(now);
        let confidence = p.speaker_confidence.unwrap_or(0.0);

        match p.speaker_id.as_deref() {
            Some(id) if confidence >= self.config.speaker.focus_threshold => {
                if self.active_speaker_id.as_deref() != Some(id) {
                    tracing::debug!(speaker = id, "Focusing on speaker");
                }
                self.active_speaker_id = Some(id.to_string());
                self.affect.nudge_social_pressure(0.2);
                self.affect.nudge_confidence(0.1);
            }
            _ => self.active_speaker_id = None,
        }

        if let Some(alias) = p.speaker_alias.as_deref().filter(|a| !a.is_empty()) {
            self.active_speaker_alias = Some(alias.to_string());
            self.names.observe(alias, confidence);

            if !self.names.is_open()
                && self
                    .names
                    .should_prompt(alias, confidence, p.has_profile, self.mode, now)
            {
                self.open_name_request(alias, confidence);
            }

            let candidate = GreetCandidate {
                alias,
                speaker_key: p.speaker_key.as_deref().unwrap_or(alias),
                confidence,
                has_profile: p.has_profile,
            };
            if self
                .greet
                .should_greet(&candidate, self.mode, self.names.is_open(), now)
            {
                let hour = p.hour.unwrap_or_else(|| self.clock.local_hour());
                let req = self.greet.schedule(&candidate, p.display_name.clone(), hour, now);
                let speaker_key = req.speaker_key.clone();
                self.pending_greet = Some(req);
                self.request_transition(
                    Mode::Greet,
                    InterruptReason::Greet {
                        speaker_key: speaker_key.clone(),
                    },
                    false,
                );
                self.observers.cue(&Cue::Greet { speaker_key });
            }
        }

        if !p.text.trim().is_empty() {
            self.last_speaking_at = Some(now);
            self.affect.nudge_curiosity(-0.05);
        }
    }

    // ========================================================================
    // Name learning
    // ========================================================================

    fn open_name_request(&mut self, alias: &str, confidence: f32) {
        let now = self.clock.now();
        self.names.open(alias, confidence, now);
        self.request_transition(
            Mode::Talk,
            InterruptReason::NameRequest {
                alias: alias.to_string(),
            },
            false,
        );
        self.observers.cue(&Cue::NameAsk {
            alias: alias.to_string(),
        });
    }

    fn on_speaker_unknown(&mut self, p: SpeakerUnknownPayload) {
        if self.mode.is_high_priority() {
            tracing::info!(mode = %self.mode, "Name request deferred: busy");
            return;
        }
        if self.names.is_open() {
            tracing::debug!("Name request already open");
            return;
        }
        let Some(alias) = p.alias.filter(|a| !a.is_empty()) else {
            return;
        };
        let confidence = p.confidence.unwrap_or(0.0);
        if !self
            .names
            .should_prompt(&alias, confidence, false, self.mode, self.clock.now())
        {
            tracing::debug!(alias = %alias, "Name request gated");
            return;
        }
        self.open_name_request(&alias, confidence);
    }

    fn on_name_answer(&mut self, p: NameAnswerPayload) {
        let Some(name) = p.name.as_deref() else {
            return;
        };
        let Some(req) = self.names.answer(p.alias.as_deref(), name, p.confidence) else {
            tracing::debug!("Name answer does not match an open request");
            return;
        };
        let cue = Cue::NameConfirm {
            alias: req.alias.clone(),
            candidate: req.name_candidate.clone().unwrap_or_default(),
        };
        self.observers.cue(&cue);
    }

    fn on_name_confirm_yes(&mut self, p: NameConfirmPayload) {
        let now = self.clock.now();
        let Some(set) = self
            .names
            .confirm_yes(p.alias.as_deref(), p.name.as_deref(), now)
        else {
            tracing::debug!("Nothing to confirm");
            return;
        };
        let cue = Cue::NameSetRequested {
            alias: set.alias.clone(),
            name: set.name.clone(),
        };
        self.pending_name_set = Some(set);
        self.observers.cue(&cue);
    }

    fn on_name_confirm_no(&mut self) {
        let cue = match self.names.confirm_no(self.clock.now()) {
            Some(Rejection::Retry { alias }) => Cue::NameRetry { alias },
            Some(Rejection::GaveUp { alias }) => {
                self.drop_queued_name_request();
                Cue::NameExpired { alias }
            }
            None => return,
        };
        self.observers.cue(&cue);
    }

    fn expire_name_request(&mut self, now: f64) {
        if let Some(req) = self.names.expire(now) {
            self.drop_queued_name_request();
            self.observers.cue(&Cue::NameExpired { alias: req.alias });
        }
    }

    fn drop_queued_name_request(&mut self) {
        if matches!(
            self.arbiter.pending().map(|p| &p.reason),
            Some(InterruptReason::NameRequest { .. })
        ) {
            self.arbiter.clear();
        }
    }

    fn on_name_saved(&mut self, p: NameConfirmPayload) {
        let pending = self.pending_name_set.take();
        let alias = p.alias.or_else(|| pending.as_ref().map(|s| s.alias.clone()));
        let name = p.name.or_else(|| pending.as_ref().map(|s| s.name.clone()));
        let (Some(alias), Some(name)) = (alias, name) else {
            tracing::debug!("name_saved without alias or name");
            return;
        };
        tracing::info!(alias = %alias, "Name saved");
        let cue = Cue::NameSaved {
            alias: alias.clone(),
            name: name.clone(),
        };
        self.pending_name_saved = Some(NameSaved {
            alias,
            name,
            ts: self.clock.now(),
        });
        self.observers.cue(&cue);
    }

    fn on_forget_name(&mut self, p: ForgetNamePayload) {
        let Some(target) = p.name_or_alias.filter(|t| !t.trim().is_empty()) else {
            return;
        };
        self.pending_forget = Some(ForgetRequest {
            name_or_alias: target.clone(),
            ts: self.clock.now(),
        });
        self.observers.cue(&Cue::ForgetRequested { name_or_alias: target });
    }

    // ========================================================================
    // Tick
    // ========================================================================

    fn on_tick(&mut self, dt: f32) {
        let now = self.clock.now();
        self.expire_name_request(now);
        let since_speaking = self.last_speaking_at.map(|t| (now - t).max(0.0));
        let ctx = TickContext {
            idle: self.mode == Mode::Idle,
            since_speaking,
        };
        self.config.affect.step(&mut self.affect, ctx, dt);

        if self.mode == Mode::Idle && self.affect.curiosity > self.config.search.curiosity_threshold {
            tracing::info!(curiosity = self.affect.curiosity, "Curiosity crossed threshold");
            self.request_search(None, Vec::new(), false);
        }

        let calm = self.mode == Mode::Idle && !self.alerts.is_active() && !self.search_pending();
        if calm && since_speaking.map_or(true, |quiet| quiet > 1.0) {
            if let Some(action) = self.presence.maybe_idle_presence(now) {
                let cue = Cue::IdlePresence {
                    text: action.text.clone(),
                };
                self.pending_idle_presence = Some(action);
                self.observers.cue(&cue);
            }
        }
        if calm {
            if let Some(starter) = self.presence.maybe_starter(now, &self.affect, since_speaking) {
                let cue = Cue::Starter {
                    text: starter.text.clone(),
                };
                self.pending_starter = Some(starter);
                self.affect.nudge_social_pressure(-0.2);
                self.request_transition(Mode::Talk, InterruptReason::Starter, false);
                self.observers.cue(&cue);
            }
        }

        if self.mode == Mode::Talk {
            let last_activity = self
                .last_speaking_at
                .map_or(self.mode_entered_at, |t| t.max(self.mode_entered_at));
            if now - last_activity > self.config.timers.talk_silence_timeout_secs {
                tracing::info!("Talk went silent, back to idle");
                self.enter_mode(Mode::Idle);
            }
        }
    }
}
