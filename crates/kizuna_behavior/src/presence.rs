//! Idle presence and conversation starters.
//!
//! While nothing is happening the avatar occasionally shows it is still
//! there (a short "thinking" noise at a jittered interval), and when social
//! pressure builds up it opens a conversation itself.

use kizuna_core::config::PresenceConfig;
use kizuna_core::AffectState;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Think,
    Aside,
    Pause,
    SelfCorrect,
}

impl PresenceKind {
    const ALL: [PresenceKind; 4] = [
        PresenceKind::Think,
        PresenceKind::Aside,
        PresenceKind::Pause,
        PresenceKind::SelfCorrect,
    ];

    pub fn text(self) -> &'static str {
        match self {
            PresenceKind::Think => "…",
            PresenceKind::Aside => "んー。",
            PresenceKind::Pause => "",
            PresenceKind::SelfCorrect => "あ、いや。",
        }
    }
}

const STARTER_PHRASES: [&str; 3] = ["ねえ。", "今、大丈夫？", "ちょっと聞いていい？"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdlePresence {
    pub kind: PresenceKind,
    pub text: String,
    pub ts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Starter {
    pub text: String,
    pub ts: f64,
}

#[derive(Debug)]
pub struct PresenceScheduler {
    config: PresenceConfig,
    rng: StdRng,
    /// Set on the first eligible tick so the avatar does not fidget at startup.
    last_idle_action: Option<f64>,
    next_interval: f64,
    last_starter: Option<f64>,
}

impl PresenceScheduler {
    pub fn new(config: PresenceConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: PresenceConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: PresenceConfig, rng: StdRng) -> Self {
        let mut scheduler = Self {
            config,
            rng,
            last_idle_action: None,
            next_interval: 0.0,
            last_starter: None,
        };
        scheduler.next_interval = scheduler.draw_interval();
        scheduler
    }

    fn draw_interval(&mut self) -> f64 {
        let lo = self.config.idle_interval_min_secs;
        let hi = self.config.idle_interval_max_secs;
        if hi > lo {
            self.rng.gen_range(lo..=hi)
        } else {
            lo
        }
    }

    /// Called on ticks where idle presence is allowed at all.
    pub fn maybe_idle_presence(&mut self, now: f64) -> Option<IdlePresence> {
        let Some(last) = self.last_idle_action else {
            self.last_idle_action = Some(now);
            return None;
        };
        if now - last < self.next_interval {
            return None;
        }
        self.last_idle_action = Some(now);
        self.next_interval = self.draw_interval();
        let kind = *PresenceKind::ALL.choose(&mut self.rng)?;
        tracing::debug!(kind = ?kind, "Idle presence");
        Some(IdlePresence {
            kind,
            text: kind.text().to_string(),
            ts: now,
        })
    }

    /// Open a conversation when social pressure is high, the avatar feels
    /// sure enough of itself and the room has been quiet for a moment.
    pub fn maybe_starter(
        &mut self,
        now: f64,
        affect: &AffectState,
        since_speaking: Option<f64>,
    ) -> Option<Starter> {
        if self
            .last_starter
            .is_some_and(|last| now - last < self.config.starter_cooldown_secs)
        {
            return None;
        }
        if since_speaking.is_some_and(|quiet| quiet < self.config.starter_min_silence_secs) {
            return None;
        }
        if affect.social_pressure < self.config.starter_social_pressure
            || affect.confidence < self.config.starter_min_confidence
        {
            return None;
        }
        let text = STARTER_PHRASES.choose(&mut self.rng)?;
        self.last_starter = Some(now);
        tracing::info!("Conversation starter");
        Some(Starter {
            text: text.to_string(),
            ts: now,
        })
    }
}
