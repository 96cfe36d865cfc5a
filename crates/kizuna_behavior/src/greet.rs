//! Greeting scheduler.
//!
//! Greets a recognised speaker at most once per cooldown, with the greeting
//! flavour picked from the local hour.

use std::collections::HashMap;

use kizuna_core::config::GreetConfig;
use kizuna_core::Mode;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GreetType {
    Morning,
    Day,
    Night,
}

impl GreetType {
    /// 05:00-10:59 morning, 11:00-17:59 day, otherwise night.
    pub fn from_hour(hour: u32) -> Self {
        match hour % 24 {
            5..=10 => GreetType::Morning,
            11..=17 => GreetType::Day,
            _ => GreetType::Night,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GreetRequest {
    pub alias: String,
    pub speaker_key: String,
    pub display_name: Option<String>,
    pub greet_type: GreetType,
    pub ts: f64,
}

/// Recognition facts for one final transcript.
#[derive(Debug, Clone, Copy)]
pub struct GreetCandidate<'a> {
    pub alias: &'a str,
    pub speaker_key: &'a str,
    pub confidence: f32,
    pub has_profile: bool,
}

#[derive(Debug)]
pub struct GreetScheduler {
    config: GreetConfig,
    last_greet: HashMap<String, f64>,
}

impl GreetScheduler {
    pub fn new(config: GreetConfig) -> Self {
        Self {
            config,
            last_greet: HashMap::new(),
        }
    }

    pub fn should_greet(&self, candidate: &GreetCandidate<'_>, mode: Mode, name_flow_open: bool, now: f64) -> bool {
        if self.config.requires_known_name && !candidate.has_profile {
            return false;
        }
        if candidate.confidence < self.config.min_confidence || mode.is_high_priority() || name_flow_open {
            return false;
        }
        match self.last_greet.get(candidate.speaker_key) {
            Some(last) => now - last >= self.config.cooldown_secs,
            None => true,
        }
    }

    /// Record the greeting immediately so a burst of transcripts greets once.
    pub fn schedule(
        &mut self,
        candidate: &GreetCandidate<'_>,
        display_name: Option<String>,
        hour: u32,
        now: f64,
    ) -> GreetRequest {
        self.last_greet.insert(candidate.speaker_key.to_string(), now);
        let req = GreetRequest {
            alias: candidate.alias.to_string(),
            speaker_key: candidate.speaker_key.to_string(),
            display_name,
            greet_type: GreetType::from_hour(hour),
            ts: now,
        };
        tracing::info!(speaker = %req.speaker_key, greet_type = ?req.greet_type, "Greeting scheduled");
        req
    }
}
