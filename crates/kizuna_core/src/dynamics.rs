//! Affect dynamics: how the scalars drift between events.
//!
//! Linear rates per second, applied on every tick. Event-driven nudges
//! (alerts, failures, recognition) are applied by the state machine itself.

use crate::affect::AffectState;
use serde::{Deserialize, Serialize};

/// Conditions the tick needs from the state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickContext {
    /// Current mode is IDLE.
    pub idle: bool,
    /// Seconds since the last speaking activity, `None` if nobody spoke yet.
    pub since_speaking: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectDynamics {
    pub glitch_decay: f32,
    pub confidence_recovery: f32,
    pub arousal_decay: f32,
    /// Arousal never decays below this baseline.
    pub arousal_floor: f32,
    pub curiosity_growth: f32,
    pub curiosity_decay: f32,
    /// Curiosity only grows after this many quiet seconds.
    pub quiet_window_secs: f64,
    /// Below this confidence, error recovery skips RECOVER.
    pub recover_confidence_floor: f32,
}

impl Default for AffectDynamics {
    fn default() -> Self {
        Self {
            glitch_decay: 0.02,
            confidence_recovery: 0.005,
            arousal_decay: 0.01,
            arousal_floor: 0.05,
            curiosity_growth: 0.01,
            curiosity_decay: 0.005,
            quiet_window_secs: 5.0,
            recover_confidence_floor: 0.2,
        }
    }
}

impl AffectDynamics {
    /// Advance the affect by `dt` seconds.
    pub fn step(&self, affect: &mut AffectState, ctx: TickContext, dt: f32) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        let quiet = ctx
            .since_speaking
            .map_or(true, |secs| secs > self.quiet_window_secs);
        if ctx.idle && quiet {
            affect.curiosity = (affect.curiosity + self.curiosity_growth * dt).min(1.0);
        } else {
            affect.curiosity = (affect.curiosity - self.curiosity_decay * dt).max(0.0);
        }

        affect.glitch = (affect.glitch - self.glitch_decay * dt).max(0.0);
        affect.confidence = (affect.confidence + self.confidence_recovery * dt).min(1.0);
        // Never pull arousal up to the floor; only stop decaying there.
        if affect.arousal > self.arousal_floor {
            affect.arousal = (affect.arousal - self.arousal_decay * dt).max(self.arousal_floor);
        }

        affect.normalize();
    }
}
