//! End-to-end behaviour scenarios driven with a simulated clock.

use std::sync::{Arc, Mutex};

use kizuna_behavior::{BehaviorMachine, Cue, GreetType, NameStage, Observer, TimerKind};
use kizuna_core::{Clock, Event, KizunaConfig, ManualClock, Mode};
use serde_json::json;

fn machine_with(config: KizunaConfig) -> (BehaviorMachine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let m = BehaviorMachine::new(config, clock.clone()).with_presence_seed(42);
    (m, clock)
}

fn machine() -> (BehaviorMachine, Arc<ManualClock>) {
    machine_with(KizunaConfig::default())
}

fn emergency_enabled() -> KizunaConfig {
    let mut cfg = KizunaConfig::default();
    cfg.emergency.enabled = true;
    cfg
}

#[derive(Default)]
struct Recorder {
    modes: Mutex<Vec<Mode>>,
    cues: Mutex<Vec<Cue>>,
}

impl Observer for Recorder {
    fn on_mode_changed(&self, mode: Mode) {
        self.modes.lock().unwrap().push(mode);
    }

    fn on_cue(&self, cue: &Cue) {
        self.cues.lock().unwrap().push(cue.clone());
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[test]
fn tsunami_during_talk_waits_for_utterance_boundary() {
    let (mut m, clock) = machine();
    m.submit(Event::TalkStart);
    assert_eq!(m.mode(), Mode::Talk);

    m.submit_named(
        "alert_new",
        json!({"event_id": "ts-1", "type": "tsunami", "severity": 9, "allow_mid_chunk": false}),
    );
    assert_eq!(m.mode(), Mode::Talk);
    assert_eq!(m.pending_interrupt().map(|p| p.target), Some(Mode::Alert));
    // Full intensity nudges are applied when the alert arrives
    assert!((m.affect().glitch - 0.3).abs() < 1e-5);

    assert!(m.notify_utterance_boundary());
    assert_eq!(m.mode(), Mode::Alert);
    assert_eq!(m.previous_mode(), Mode::Talk);

    clock.advance(4.0);
    m.poll_timers();
    assert_eq!(m.mode(), Mode::Talk);
}

#[test]
fn allow_mid_chunk_preempts_immediately() {
    let (mut m, _) = machine();
    m.submit(Event::TalkStart);
    m.submit_named("alert", json!({"event_id": "eq-1", "severity": 6, "allow_mid": true}));
    assert_eq!(m.mode(), Mode::Alert);
    assert_eq!(m.previous_mode(), Mode::Talk);
    assert!(m.pending_interrupt().is_none());
}

#[test]
fn alert_clear_restores_previous_mode() {
    let (mut m, clock) = machine();
    m.submit(Event::TalkStart);
    m.submit_named("alert_new", json!({"event_id": "eq-1", "severity": 5, "allow_mid": true}));
    m.submit_named("alert_clear", json!({"event_id": "eq-1"}));

    assert_eq!(m.mode(), Mode::Talk);
    assert!(m.current_alert().unwrap().cleared);
    assert!(!m.is_timer_pending(TimerKind::AlertAutoEnd));

    // The cancelled auto-end never fires
    clock.advance(10.0);
    assert_eq!(m.poll_timers(), 0);
    assert_eq!(m.mode(), Mode::Talk);
}

#[test]
fn alert_clear_drops_queued_alert() {
    let (mut m, _) = machine();
    m.submit(Event::TalkStart);
    m.submit_named("alert_new", json!({"event_id": "eq-1", "severity": 5}));
    m.submit_named("alert_clear", json!({}));
    assert!(m.pending_interrupt().is_none());
    assert!(!m.notify_utterance_boundary());
    assert_eq!(m.mode(), Mode::Talk);
}

#[test]
fn out_of_order_alert_updates_keep_newest() {
    let (mut m, _) = machine();
    m.submit_named("alert_new", json!({"event_id": "eq-1", "update_seq": 1, "severity": 5, "message": "first"}));
    m.submit_named("alert_update", json!({"event_id": "eq-1", "update_seq": 3, "severity": 7, "message": "third"}));
    m.submit_named("alert_update", json!({"event_id": "eq-1", "update_seq": 2, "severity": 6, "message": "second"}));

    let alert = m.current_alert().unwrap();
    assert_eq!(alert.update_seq, 3);
    assert_eq!(alert.severity, 7);
    assert_eq!(alert.message, "third");
    assert!(m.last_alert_was_update());
}

#[test]
fn new_alert_rearms_hold() {
    let (mut m, clock) = machine();
    m.submit_named("alert_new", json!({"event_id": "eq-1", "severity": 5}));
    clock.advance(3.0);
    // Different id: handled as a new alert
    m.submit_named("alert_update", json!({"event_id": "eq-2", "severity": 6, "update_seq": 1}));
    assert_eq!(m.current_alert().unwrap().event_id, "eq-2");

    clock.advance(2.0);
    m.poll_timers();
    assert_eq!(m.mode(), Mode::Alert);
    clock.advance(2.0);
    m.poll_timers();
    assert_eq!(m.mode(), Mode::Idle);
}

// ============================================================================
// Search
// ============================================================================

#[test]
fn search_retries_then_succeeds() {
    let (mut m, clock) = machine();
    m.submit_named("start_search", json!({"query": "地震 情報"}));
    assert_eq!(m.mode(), Mode::Search);
    let req = m.take_search_request().unwrap();
    assert_eq!(req.attempt, 1);
    assert_eq!(req.query.as_deref(), Some("地震 情報"));

    let mut expected_backoff = 1.0;
    for attempt in 1..=3 {
        m.submit_named("search_failed", json!({"error": "timeout"}));
        assert_eq!(m.mode(), Mode::Search);
        assert_eq!(m.search_attempts(), attempt);
        assert!(m.is_timer_pending(TimerKind::RetryBackoff));
        assert!(!m.is_timer_pending(TimerKind::SearchTimeout));
        let wait = m.next_deadline().unwrap() - clock.now();
        assert!((wait - expected_backoff).abs() < 1e-9);
        expected_backoff *= 2.0;
    }

    m.submit_named("search_result", json!({"ok": true, "items": [{"title": "気象庁"}]}));
    assert_eq!(m.mode(), Mode::Idle);
    assert_eq!(m.search_attempts(), 0);
    assert!(!m.is_timer_pending(TimerKind::RetryBackoff));
    assert_eq!(m.current_search_result().unwrap().items.len(), 1);
}

#[test]
fn retry_timer_starts_a_new_attempt() {
    let (mut m, clock) = machine();
    m.submit_named("start_search", json!({"query": "weather"}));
    m.submit_named("search_failed", json!({}));
    m.take_search_request();

    clock.advance(1.0);
    m.poll_timers();
    assert_eq!(m.mode(), Mode::Search);
    assert_eq!(m.search_request().unwrap().attempt, 2);
    assert!(m.is_timer_pending(TimerKind::SearchTimeout));
}

#[test]
fn search_gives_up_after_max_attempts() {
    let mut cfg = KizunaConfig::default();
    cfg.timers.max_search_attempts = 2;
    let (mut m, _) = machine_with(cfg);
    m.submit_named("start_search", json!({}));
    m.submit_named("search_failed", json!({}));
    m.submit_named("search_failed", json!({}));
    assert_eq!(m.mode(), Mode::Search);
    assert_eq!(m.search_attempts(), 2);

    m.submit_named("search_result", json!({"ok": false, "error": "offline"}));
    assert_eq!(m.mode(), Mode::Idle);
    assert_eq!(m.search_attempts(), 0);
    assert!(!m.is_timer_pending(TimerKind::RetryBackoff));
    assert!(!m.current_search_result().unwrap().ok);
}

#[test]
fn search_cooldown_and_alert_gate() {
    let (mut m, clock) = machine();
    m.submit_named("net_query", json!({"query": "a"}));
    m.submit_named("search_result", json!({}));
    assert_eq!(m.mode(), Mode::Idle);

    m.submit(Event::CuriositySpike);
    assert_eq!(m.mode(), Mode::Idle);

    clock.advance(61.0);
    m.submit_named("alert_new", json!({"event_id": "eq-1", "severity": 3}));
    m.submit_named("start_search", json!({"query": "b"}));
    assert_eq!(m.mode(), Mode::Alert);

    clock.advance(4.0);
    m.poll_timers();
    m.submit_named("start_search", json!({"query": "b"}));
    assert_eq!(m.mode(), Mode::Search);
}

#[test]
fn search_is_deferred_while_speaking() {
    let (mut m, _) = machine();
    m.submit(Event::TalkStart);
    m.submit_named("start_search", json!({"query": "news"}));
    assert_eq!(m.mode(), Mode::Talk);
    assert!(m.search_request().is_none());

    m.submit(Event::TalkEnd);
    assert_eq!(m.mode(), Mode::Search);
    assert_eq!(m.previous_mode(), Mode::Talk);
    assert!(m.search_request().is_some());
}

#[test]
fn search_timeout_errors_then_restores() {
    let (mut m, clock) = machine();
    m.submit_named("start_search", json!({}));
    clock.advance(30.0);
    m.poll_timers();

    assert_eq!(m.mode(), Mode::Idle);
    assert!((m.affect().confidence - 0.65).abs() < 1e-5);
    assert!(!m.is_timer_pending(TimerKind::ErrorRecovery));
    assert!(m.next_deadline().is_none());
}

#[test]
fn curiosity_starts_search_on_tick() {
    let (mut m, clock) = machine();
    clock.advance(60.0);
    m.submit(Event::Tick { dt: 60.0 });
    assert_eq!(m.mode(), Mode::Search);
    assert!(m.affect().curiosity < 0.6);
    assert_eq!(m.search_request().unwrap().query, None);
}

// ============================================================================
// Emergency
// ============================================================================

#[test]
fn emergency_preempts_and_suppresses_speech_input() {
    let (mut m, clock) = machine_with(emergency_enabled());
    m.submit(Event::TalkStart);
    m.submit_named("start_search", json!({"query": "x"}));
    assert!(m.pending_interrupt().is_some());

    m.submit_named("emergency_trigger", json!({"message": "  津波です。  すぐに 逃げて "}));
    assert_eq!(m.mode(), Mode::Alert);
    assert_eq!(m.previous_mode(), Mode::Talk);
    assert!(m.pending_interrupt().is_none());
    assert_eq!(m.emergency_message(), Some("津波です。 すぐに 逃げて"));
    assert!(m.is_opinion_suppressed());

    m.submit_named(
        "stt_final",
        json!({"text": "hello", "speaker_alias": "taro", "speaker_confidence": 0.9, "has_profile": true}),
    );
    assert!(m.active_speaker_alias().is_none());

    clock.advance(2.0);
    m.submit_named("emergency_trigger", json!({"message": "津波です。 すぐに 逃げて"}));
    let decision = m.last_emergency_decision().unwrap();
    assert!(!decision.should_alert);
    assert!(decision.suppressed_by_cooldown);

    clock.advance(9.0);
    assert!(!m.is_opinion_suppressed());
    m.submit_named(
        "stt_final",
        json!({"text": "hello", "speaker_alias": "taro", "speaker_confidence": 0.9, "has_profile": true}),
    );
    assert_eq!(m.active_speaker_alias(), Some("taro"));
}

#[test]
fn disabled_emergency_is_ignored() {
    let (mut m, _) = machine();
    m.submit_named("emergency_trigger", json!({"message": "alarm"}));
    assert_eq!(m.mode(), Mode::Idle);
    assert!(!m.last_emergency_decision().unwrap().should_alert);
    assert!(m.emergency_message().is_none());
}

// ============================================================================
// Speakers, greetings and names
// ============================================================================

#[test]
fn known_speaker_is_greeted_once() {
    let (mut m, _) = machine();
    let stt = json!({
        "text": "おはよう",
        "speaker_id": "spk-1",
        "speaker_confidence": 0.9,
        "speaker_alias": "taro",
        "speaker_key": "taro",
        "display_name": "Taro",
        "has_profile": true,
        "hour": 8
    });
    m.submit_named("stt_final", stt.clone());
    assert_eq!(m.mode(), Mode::Greet);
    assert_eq!(m.active_speaker_id(), Some("spk-1"));
    let greet = m.take_pending_greet().unwrap();
    assert_eq!(greet.greet_type, GreetType::Morning);
    assert_eq!(greet.display_name.as_deref(), Some("Taro"));

    m.submit_named("stt_final", stt);
    assert!(m.pending_greet().is_none());
}

#[test]
fn greet_type_follows_clock_hour() {
    let (mut m, clock) = machine();
    clock.set_hour(21);
    m.submit_named(
        "stt_final",
        json!({"speaker_alias": "hana", "speaker_confidence": 0.8, "has_profile": true}),
    );
    assert_eq!(m.pending_greet().unwrap().greet_type, GreetType::Night);
}

#[test]
fn name_learning_round_trip() {
    let (mut m, _) = machine();
    let recorder = Arc::new(Recorder::default());
    m.add_observer(recorder.clone());

    let stt = json!({"text": "こんにちは", "speaker_alias": "unknown_1", "speaker_confidence": 0.8});
    m.submit_named("stt_final", stt.clone());
    assert!(m.name_request().is_none());
    m.submit_named("stt_final", stt);
    assert_eq!(m.name_request().unwrap().stage, NameStage::Ask);
    assert_eq!(m.mode(), Mode::Talk);
    assert!(m.pending_greet().is_none());

    m.submit_named("name_answer", json!({"alias": "unknown_1", "name": "Hana"}));
    assert_eq!(m.name_request().unwrap().stage, NameStage::Confirm);
    m.submit_named("name_confirm_no", json!({}));
    assert_eq!(m.name_request().unwrap().stage, NameStage::Retry);
    m.submit_named("name_answer", json!({"alias": "unknown_1", "name": "Hanako"}));
    m.submit_named("name_confirm_yes", json!({}));

    assert!(m.name_request().is_none());
    let set = m.pending_name_set().unwrap();
    assert_eq!(set.alias, "unknown_1");
    assert_eq!(set.name, "Hanako");
    assert!(set.consent);

    m.submit_named("name_saved", json!({"alias": "unknown_1", "name": "Hanako"}));
    assert!(m.pending_name_set().is_none());
    assert_eq!(m.pending_name_saved().unwrap().name, "Hanako");

    let cues = recorder.cues.lock().unwrap();
    assert!(matches!(cues.first(), Some(Cue::NameAsk { alias }) if alias == "unknown_1"));
    assert!(cues.iter().any(|c| matches!(c, Cue::NameRetry { .. })));
    assert!(matches!(cues.last(), Some(Cue::NameSaved { .. })));
}

fn open_name_request(m: &mut BehaviorMachine, alias: &str) {
    let stt = json!({"text": "どうも", "speaker_alias": alias, "speaker_confidence": 0.8});
    m.submit_named("stt_final", stt.clone());
    m.submit_named("stt_final", stt);
    assert_eq!(m.name_request().map(|r| r.alias.as_str()), Some(alias));
}

fn greet_known_speaker(m: &mut BehaviorMachine) {
    m.submit_named(
        "stt_final",
        json!({"speaker_alias": "taro", "speaker_confidence": 0.9, "has_profile": true}),
    );
}

#[test]
fn unanswered_name_request_expires_and_frees_greeting() {
    let (mut m, clock) = machine();
    let recorder = Arc::new(Recorder::default());
    m.add_observer(recorder.clone());
    open_name_request(&mut m, "unknown_1");

    greet_known_speaker(&mut m);
    assert!(m.pending_greet().is_none());

    clock.advance(61.0);
    m.submit(Event::Tick { dt: 61.0 });
    assert!(m.name_request().is_none());
    assert!(matches!(
        recorder.cues.lock().unwrap().last(),
        Some(Cue::NameExpired { alias }) if alias == "unknown_1"
    ));

    greet_known_speaker(&mut m);
    assert!(m.pending_greet().is_some());
}

#[test]
fn stale_name_request_expires_on_next_speech() {
    let (mut m, clock) = machine();
    open_name_request(&mut m, "unknown_1");
    clock.advance(3_600.0);
    greet_known_speaker(&mut m);
    assert!(m.name_request().is_none());
    assert!(m.pending_greet().is_some());
}

#[test]
fn repeated_rejections_close_name_request() {
    let (mut m, _) = machine();
    let recorder = Arc::new(Recorder::default());
    m.add_observer(recorder.clone());
    open_name_request(&mut m, "unknown_1");

    for _ in 0..3 {
        m.submit_named("name_answer", json!({"name": "Hana"}));
        m.submit_named("name_confirm_no", json!({}));
    }
    assert!(m.name_request().is_none());
    let cues = recorder.cues.lock().unwrap();
    assert_eq!(cues.iter().filter(|c| matches!(c, Cue::NameRetry { .. })).count(), 2);
    assert!(matches!(cues.last(), Some(Cue::NameExpired { .. })));
}

#[test]
fn reset_closes_name_request_and_drops_alert() {
    let (mut m, clock) = machine();
    open_name_request(&mut m, "unknown_1");
    m.submit_named("alert_new", json!({"event_id": "eq-9", "severity": 4, "allow_mid_chunk": true}));
    assert!(m.current_alert().is_some());

    m.submit(Event::Reset);
    assert_eq!(m.mode(), Mode::Idle);
    assert!(m.name_request().is_none());
    assert!(m.current_alert().is_none());

    greet_known_speaker(&mut m);
    assert!(m.pending_greet().is_some());

    // The global ask cooldown survives reset
    let stt = json!({"speaker_alias": "unknown_2", "speaker_confidence": 0.9});
    m.submit_named("stt_final", stt.clone());
    m.submit_named("stt_final", stt.clone());
    assert!(m.name_request().is_none());
    clock.advance(121.0);
    m.submit_named("stt_final", stt);
    assert_eq!(m.name_request().map(|r| r.alias.as_str()), Some("unknown_2"));
}

#[test]
fn unknown_speaker_not_asked_during_alert() {
    let (mut m, _) = machine();
    m.submit_named("alert_new", json!({"event_id": "eq-1", "severity": 4}));
    for _ in 0..3 {
        m.submit_named("speaker_unknown_detected", json!({"alias": "unknown_2", "confidence": 0.9}));
        m.submit_named("stt_final", json!({"speaker_alias": "unknown_2", "speaker_confidence": 0.9}));
    }
    assert!(m.name_request().is_none());
    assert_eq!(m.mode(), Mode::Alert);
}

#[test]
fn forget_name_is_published() {
    let (mut m, _) = machine();
    m.submit_named("forget_name", json!({"name_or_alias": "Hanako"}));
    assert_eq!(m.take_pending_forget().unwrap().name_or_alias, "Hanako");
    m.submit_named("forget_name", json!({}));
    assert!(m.pending_forget().is_none());
}

// ============================================================================
// Presence
// ============================================================================

#[test]
fn overwritten_search_request_does_not_block_presence() {
    let (mut m, clock) = machine();
    m.submit(Event::TalkStart);
    m.submit_named("start_search", json!({"query": "weather"}));
    m.submit_named("alert_new", json!({"event_id": "eq-5", "severity": 3}));
    assert_eq!(m.pending_interrupt().map(|p| p.target), Some(Mode::Alert));

    assert!(m.notify_utterance_boundary());
    assert_eq!(m.mode(), Mode::Alert);
    clock.advance(5.0);
    m.poll_timers();
    assert_eq!(m.mode(), Mode::Talk);
    m.submit(Event::TalkEnd);
    assert_eq!(m.mode(), Mode::Idle);
    m.submit_named("alert_clear", json!({"event_id": "eq-5"}));
    assert!(m.search_request().is_none());

    clock.advance(2.0);
    m.submit(Event::Tick { dt: 2.0 });
    clock.advance(26.0);
    m.submit(Event::Tick { dt: 26.0 });
    assert!(m.pending_idle_presence().is_some());
}

#[test]
fn preempted_search_resumes_its_query_after_alert() {
    let (mut m, clock) = machine();
    m.submit_named("start_search", json!({"query": "news"}));
    m.submit_named("alert_new", json!({"event_id": "eq-6", "severity": 3}));
    assert_eq!(m.mode(), Mode::Alert);
    assert!(m.search_request().is_none());

    clock.advance(5.0);
    m.poll_timers();
    assert_eq!(m.mode(), Mode::Search);
    assert_eq!(m.search_request().unwrap().query.as_deref(), Some("news"));
}

#[test]
fn leaving_search_through_error_does_not_block_presence() {
    let (mut m, clock) = machine();
    m.submit_named("start_search", json!({"query": "news"}));
    assert_eq!(m.mode(), Mode::Search);
    assert!(m.search_request().is_some());

    m.submit_named("error", json!({"source": "tts"}));
    assert_eq!(m.mode(), Mode::Error);
    assert!(m.search_request().is_none());

    clock.advance(6.0);
    m.poll_timers();
    clock.advance(2.0);
    m.poll_timers();
    assert_eq!(m.mode(), Mode::Idle);
    clock.advance(1.0);
    m.submit(Event::Tick { dt: 1.0 });
    clock.advance(26.0);
    m.submit(Event::Tick { dt: 26.0 });
    assert!(m.pending_idle_presence().is_some());
}

#[test]
fn starter_opens_conversation_and_silence_ends_it() {
    let (mut m, clock) = machine();
    for _ in 0..3 {
        m.submit_named("stt_final", json!({"text": "うん", "speaker_id": "spk-9", "speaker_confidence": 0.95}));
    }
    assert!(m.affect().social_pressure > 0.5);

    clock.advance(3.0);
    m.submit(Event::Tick { dt: 3.0 });
    assert_eq!(m.mode(), Mode::Talk);
    assert!(m.take_pending_starter().is_some());

    clock.advance(31.0);
    m.submit(Event::Tick { dt: 31.0 });
    assert_eq!(m.mode(), Mode::Idle);
}

// ============================================================================
// Observers
// ============================================================================

#[test]
fn panicking_observer_does_not_break_transitions() {
    let (mut m, _) = machine();
    m.add_observer(Arc::new(|mode: Mode| {
        if mode == Mode::Alert {
            panic!("animation backend crashed");
        }
    }));
    let recorder = Arc::new(Recorder::default());
    m.add_observer(recorder.clone());

    m.submit_named("alert_new", json!({"event_id": "eq-1", "severity": 5}));
    assert_eq!(m.mode(), Mode::Alert);
    assert!(m.is_timer_pending(TimerKind::AlertAutoEnd));
    assert_eq!(*recorder.modes.lock().unwrap(), vec![Mode::Alert]);
}
