//! Continuous affect state of the avatar.
//!
//! Six scalars instead of discrete emotion labels. The state machine is the
//! only writer; every other component reads a copy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffectState {
    /// Positive/negative (-1.0 to 1.0)
    pub valence: f32,
    /// Calm/activated (0.0 to 1.0)
    pub arousal: f32,
    /// Self-assurance, eroded by failures (0.0 to 1.0)
    pub confidence: f32,
    /// Visual/vocal instability after shocks (0.0 to 1.0)
    pub glitch: f32,
    /// Drive to look something up (0.0 to 1.0)
    pub curiosity: f32,
    /// Urge to start a conversation (0.0 to 1.0)
    pub social_pressure: f32,
}

impl Default for AffectState {
    fn default() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.1,
            confidence: 0.9,
            glitch: 0.0,
            curiosity: 0.05,
            social_pressure: 0.0,
        }
    }
}

impl AffectState {
    pub fn new(
        valence: f32,
        arousal: f32,
        confidence: f32,
        glitch: f32,
        curiosity: f32,
        social_pressure: f32,
    ) -> Self {
        let mut state = Self {
            valence,
            arousal,
            confidence,
            glitch,
            curiosity,
            social_pressure,
        };
        state.normalize();
        state
    }

    /// Clamp every scalar into its range. Non-finite values fall back to the
    /// resting default for that scalar.
    pub fn normalize(&mut self) {
        let rest = Self::default();
        self.valence = sanitize(self.valence, rest.valence).clamp(-1.0, 1.0);
        self.arousal = sanitize(self.arousal, rest.arousal).clamp(0.0, 1.0);
        self.confidence = sanitize(self.confidence, rest.confidence).clamp(0.0, 1.0);
        self.glitch = sanitize(self.glitch, rest.glitch).clamp(0.0, 1.0);
        self.curiosity = sanitize(self.curiosity, rest.curiosity).clamp(0.0, 1.0);
        self.social_pressure = sanitize(self.social_pressure, rest.social_pressure).clamp(0.0, 1.0);
    }

    pub fn nudge_arousal(&mut self, delta: f32) {
        self.arousal = (self.arousal + delta).clamp(0.0, 1.0);
    }

    pub fn nudge_confidence(&mut self, delta: f32) {
        self.confidence = (self.confidence + delta).clamp(0.0, 1.0);
    }

    pub fn nudge_glitch(&mut self, delta: f32) {
        self.glitch = (self.glitch + delta).clamp(0.0, 1.0);
    }

    pub fn nudge_curiosity(&mut self, delta: f32) {
        self.curiosity = (self.curiosity + delta).clamp(0.0, 1.0);
    }

    pub fn nudge_social_pressure(&mut self, delta: f32) {
        self.social_pressure = (self.social_pressure + delta).clamp(0.0, 1.0);
    }

    /// Everything within range and finite.
    pub fn is_normalized(&self) -> bool {
        let unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        self.valence.is_finite()
            && (-1.0..=1.0).contains(&self.valence)
            && unit(self.arousal)
            && unit(self.confidence)
            && unit(self.glitch)
            && unit(self.curiosity)
            && unit(self.social_pressure)
    }
}

#[inline]
fn sanitize(v: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        tracing::warn!("NaN/Inf detected in affect, resetting to fallback {}", fallback);
        fallback
    }
}
