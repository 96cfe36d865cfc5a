//! Emergency Notification Controller
//!
//! Decides whether an emergency message should interrupt. Identical messages
//! inside the cooldown are suppressed; a message whose content differs always
//! gets through. While an emergency is active, speech recognition input is
//! ignored by the state machine.

use std::sync::Arc;

use kizuna_core::config::EmergencyConfig;
use kizuna_core::Clock;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Plays the short attention sound that precedes an emergency message.
pub trait NotificationSound: Send + Sync {
    fn play(&self, path: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyDecision {
    pub should_alert: bool,
    pub normalized_message: String,
    pub content_hash: String,
    pub reason: String,
    pub suppressed_by_cooldown: bool,
}

pub struct EmergencyController {
    config: EmergencyConfig,
    clock: Arc<dyn Clock>,
    sound: Option<Arc<dyn NotificationSound>>,
    last_trigger_at: Option<f64>,
    last_hash: Option<String>,
    active_until: Option<f64>,
}

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_message(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn content_hash(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

impl EmergencyController {
    pub fn new(config: EmergencyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            sound: None,
            last_trigger_at: None,
            last_hash: None,
            active_until: None,
        }
    }

    pub fn set_notification_sound(&mut self, sound: Arc<dyn NotificationSound>) {
        self.sound = Some(sound);
    }

    pub fn is_active(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        self.active_until
            .is_some_and(|until| self.clock.now() <= until)
    }

    pub fn maybe_trigger(&mut self, message: &str, reason: &str) -> EmergencyDecision {
        let normalized = normalize_message(message);
        let hash = content_hash(&normalized);
        let mut decision = EmergencyDecision {
            should_alert: false,
            normalized_message: normalized,
            content_hash: hash,
            reason: reason.to_string(),
            suppressed_by_cooldown: false,
        };

        if !self.config.enabled || decision.normalized_message.is_empty() {
            return decision;
        }

        let now = self.clock.now();
        let allowed = match (self.last_trigger_at, self.last_hash.as_deref()) {
            (Some(last), Some(prev_hash)) => {
                now - last >= self.config.cooldown_secs || prev_hash != decision.content_hash
            }
            _ => true,
        };

        if !allowed {
            tracing::info!(
                reason = %decision.reason,
                "Emergency suppressed: identical message inside cooldown"
            );
            decision.suppressed_by_cooldown = true;
            return decision;
        }

        self.last_trigger_at = Some(now);
        self.last_hash = Some(decision.content_hash.clone());
        self.active_until = Some(now + self.config.hold_secs());
        decision.should_alert = true;
        self.play_notification();

        tracing::warn!(
            reason = %decision.reason,
            hash = %&decision.content_hash[..12],
            "Emergency triggered"
        );
        decision
    }

    fn play_notification(&self) {
        if self.config.beep_wav_path.is_empty() {
            return;
        }
        if let Some(sound) = &self.sound {
            if let Err(e) = sound.play(&self.config.beep_wav_path) {
                tracing::warn!("Notification sound failed: {:#}", e);
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_trigger_at = None;
        self.last_hash = None;
        self.active_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kizuna_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn enabled(cooldown: f64) -> EmergencyConfig {
        EmergencyConfig {
            enabled: true,
            cooldown_secs: cooldown,
            active_hold_secs: None,
            beep_wav_path: String::new(),
        }
    }

    struct CountingSound(AtomicUsize);

    impl NotificationSound for CountingSound {
        fn play(&self, _path: &str) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("no audio device")
        }
    }

    #[test]
    fn test_normalize_message() {
        assert_eq!(normalize_message("  津波  警報\n発令 "), "津波 警報 発令");
        assert_eq!(normalize_message(" \t\n"), "");
    }

    #[test]
    fn test_disabled_never_alerts() {
        let clock = Arc::new(ManualClock::default());
        let mut c = EmergencyController::new(EmergencyConfig::default(), clock);
        let d = c.maybe_trigger("避難してください", "manual");
        assert!(!d.should_alert);
        assert!(!d.suppressed_by_cooldown);
        assert!(!c.is_active());
    }

    #[test]
    fn test_empty_message_never_alerts() {
        let clock = Arc::new(ManualClock::default());
        let mut c = EmergencyController::new(enabled(10.0), clock);
        let d = c.maybe_trigger("   ", "manual");
        assert!(!d.should_alert);
        assert!(!d.suppressed_by_cooldown);
    }

    #[test]
    fn test_cooldown_suppresses_identical_message() {
        let clock = Arc::new(ManualClock::default());
        let mut c = EmergencyController::new(enabled(10.0), clock.clone());

        assert!(c.maybe_trigger("避難してください", "manual").should_alert);
        clock.advance(2.0);
        // Whitespace differences normalize to the same content
        let d = c.maybe_trigger(" 避難してください ", "manual");
        assert!(!d.should_alert);
        assert!(d.suppressed_by_cooldown);

        clock.advance(8.0);
        assert!(c.maybe_trigger("避難してください", "manual").should_alert);
    }

    #[test]
    fn test_different_content_bypasses_cooldown() {
        let clock = Arc::new(ManualClock::default());
        let mut c = EmergencyController::new(enabled(10.0), clock.clone());
        assert!(c.maybe_trigger("message one", "manual").should_alert);
        clock.advance(1.0);
        assert!(c.maybe_trigger("message two", "manual").should_alert);
    }

    #[test]
    fn test_active_window() {
        let clock = Arc::new(ManualClock::default());
        let mut cfg = enabled(10.0);
        cfg.active_hold_secs = Some(3.0);
        let mut c = EmergencyController::new(cfg, clock.clone());
        c.maybe_trigger("alarm", "manual");
        assert!(c.is_active());
        clock.advance(3.0);
        assert!(c.is_active());
        clock.advance(0.5);
        assert!(!c.is_active());
    }

    #[test]
    fn test_sound_failure_is_ignored() {
        let clock = Arc::new(ManualClock::default());
        let mut cfg = enabled(10.0);
        cfg.beep_wav_path = "beep.wav".to_string();
        let sound = Arc::new(CountingSound(AtomicUsize::new(0)));
        let mut c = EmergencyController::new(cfg, clock);
        c.set_notification_sound(sound.clone());
        assert!(c.maybe_trigger("alarm", "manual").should_alert);
        assert_eq!(sound.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let clock = Arc::new(ManualClock::default());
        let mut c = EmergencyController::new(enabled(10.0), clock);
        c.maybe_trigger("alarm", "manual");
        c.reset();
        assert!(!c.is_active());
        assert!(c.maybe_trigger("alarm", "manual").should_alert);
    }
}
