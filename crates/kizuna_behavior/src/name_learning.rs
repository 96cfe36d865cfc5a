//! Name learning flow.
//!
//! When the same unnamed speaker keeps talking with a confident voice match,
//! the avatar asks for their name, confirms it and hands the result to the
//! profile store. Asking is gated by a recognition streak and two cooldowns
//! (global and per alias) so it never turns into nagging. An open flow is
//! bounded: it expires when left unanswered and gives up after repeated
//! rejections.

use std::collections::HashMap;

use kizuna_core::config::NameLearningConfig;
use kizuna_core::Mode;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameStage {
    Ask,
    Confirm,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameRequestState {
    pub alias: String,
    pub stage: NameStage,
    pub asked_at: f64,
    pub confidence: f32,
    pub name_candidate: Option<String>,
    pub candidate_confidence: Option<f32>,
    pub retries: u32,
}

/// What a rejected candidate did to the open flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Ask again.
    Retry { alias: String },
    /// Too many rejections; the flow is closed.
    GaveUp { alias: String },
}

/// Consecutive recognitions of the same alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpeakerStreak {
    pub alias: Option<String>,
    pub count: u32,
}

/// A confirmed name waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameSetRequest {
    pub alias: String,
    pub name: String,
    pub consent: bool,
    pub ts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameSaved {
    pub alias: String,
    pub name: String,
    pub ts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForgetRequest {
    pub name_or_alias: String,
    pub ts: f64,
}

#[derive(Debug)]
pub struct NameLearning {
    config: NameLearningConfig,
    streak: SpeakerStreak,
    request: Option<NameRequestState>,
    last_request_at: Option<f64>,
    last_asked: HashMap<String, f64>,
}

impl NameLearning {
    pub fn new(config: NameLearningConfig) -> Self {
        Self {
            config,
            streak: SpeakerStreak::default(),
            request: None,
            last_request_at: None,
            last_asked: HashMap::new(),
        }
    }

    pub fn streak(&self) -> &SpeakerStreak {
        &self.streak
    }

    pub fn request(&self) -> Option<&NameRequestState> {
        self.request.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.request.is_some()
    }

    pub fn is_unknown_alias(&self, alias: &str) -> bool {
        alias.starts_with(&self.config.unknown_prefix)
    }

    /// Record one recognition. A weak match breaks the streak.
    pub fn observe(&mut self, alias: &str, confidence: f32) {
        if confidence < self.config.min_confidence {
            self.streak = SpeakerStreak::default();
            return;
        }
        if self.streak.alias.as_deref() == Some(alias) {
            self.streak.count += 1;
        } else {
            self.streak = SpeakerStreak {
                alias: Some(alias.to_string()),
                count: 1,
            };
        }
    }

    pub fn should_prompt(
        &self,
        alias: &str,
        confidence: f32,
        has_profile: bool,
        mode: Mode,
        now: f64,
    ) -> bool {
        if !self.is_unknown_alias(alias) || has_profile || mode.is_high_priority() {
            return false;
        }
        if confidence < self.config.min_confidence {
            return false;
        }
        if self.streak.alias.as_deref() != Some(alias) || self.streak.count < self.config.min_streak {
            return false;
        }
        if let Some(last) = self.last_request_at {
            if now - last < self.config.request_cooldown_secs {
                return false;
            }
        }
        if let Some(last) = self.last_asked.get(alias) {
            if now - last < self.config.per_alias_interval_secs {
                return false;
            }
        }
        true
    }

    pub fn open(&mut self, alias: &str, confidence: f32, now: f64) -> &NameRequestState {
        self.last_request_at = Some(now);
        self.last_asked.insert(alias.to_string(), now);
        tracing::info!(alias, "Asking unknown speaker for their name");
        self.request.insert(NameRequestState {
            alias: alias.to_string(),
            stage: NameStage::Ask,
            asked_at: now,
            confidence,
            name_candidate: None,
            candidate_confidence: None,
            retries: 0,
        })
    }

    /// Store a name candidate and move to confirmation. `alias` of `None`
    /// addresses whichever flow is open.
    pub fn answer(&mut self, alias: Option<&str>, name: &str, confidence: f32) -> Option<&NameRequestState> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let req = self
            .request
            .as_mut()
            .filter(|r| alias.map_or(true, |a| a == r.alias))?;
        req.name_candidate = Some(name.to_string());
        req.candidate_confidence = Some(confidence);
        req.stage = NameStage::Confirm;
        Some(&*req)
    }

    /// Finalize the flow. Payload values take precedence over the stored
    /// candidate.
    pub fn confirm_yes(&mut self, alias: Option<&str>, name: Option<&str>, now: f64) -> Option<NameSetRequest> {
        let req = self.request.as_ref()?;
        if alias.is_some_and(|a| a != req.alias) {
            return None;
        }
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| req.name_candidate.clone())?;
        let set = NameSetRequest {
            alias: req.alias.clone(),
            name,
            consent: true,
            ts: now,
        };
        self.request = None;
        tracing::info!(alias = %set.alias, "Name confirmed");
        Some(set)
    }

    /// Candidate rejected. Asks again (restarting the answer window) until
    /// `max_retries` is used up, then closes the flow.
    pub fn confirm_no(&mut self, now: f64) -> Option<Rejection> {
        let req = self.request.as_mut()?;
        if req.retries >= self.config.max_retries {
            let alias = req.alias.clone();
            self.request = None;
            tracing::info!(alias = %alias, "Giving up on name after repeated rejections");
            return Some(Rejection::GaveUp { alias });
        }
        req.retries += 1;
        req.stage = NameStage::Retry;
        req.asked_at = now;
        req.name_candidate = None;
        req.candidate_confidence = None;
        Some(Rejection::Retry {
            alias: req.alias.clone(),
        })
    }

    /// Close the flow if nobody answered within `request_ttl_secs` of the
    /// latest ask. Returns the closed request.
    pub fn expire(&mut self, now: f64) -> Option<NameRequestState> {
        let asked_at = self.request.as_ref()?.asked_at;
        if now - asked_at < self.config.request_ttl_secs {
            return None;
        }
        let req = self.request.take()?;
        tracing::info!(alias = %req.alias, "Name request went unanswered");
        Some(req)
    }

    /// Close any open flow. Cooldowns are kept.
    pub fn clear(&mut self) -> Option<NameRequestState> {
        self.request.take()
    }
}
