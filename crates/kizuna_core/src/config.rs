use crate::dynamics::AffectDynamics;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KizunaConfig {
    pub timers: TimerConfig,
    pub search: SearchConfig,
    pub affect: AffectDynamics,
    pub emergency: EmergencyConfig,
    pub names: NameLearningConfig,
    pub greet: GreetConfig,
    pub speaker: SpeakerConfig,
    pub presence: PresenceConfig,
    pub runtime: RuntimeConfig,
}

impl KizunaConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: KizunaConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KIZUNA_EMERGENCY_ENABLED") {
            if let Ok(b) = v.parse() {
                self.emergency.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("KIZUNA_SEARCH_COOLDOWN_SECS") {
            if let Ok(n) = v.parse() {
                self.search.cooldown_secs = n;
            }
        }
        if let Ok(v) = std::env::var("KIZUNA_TICK_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.runtime.tick_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("KIZUNA_BEEP_PATH") {
            self.emergency.beep_wav_path = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.presence.idle_interval_min_secs > self.presence.idle_interval_max_secs {
            return Err(crate::Error::Config(
                "presence.idle_interval_min_secs exceeds idle_interval_max_secs".to_string(),
            )
            .into());
        }
        if self.names.request_ttl_secs <= 0.0 {
            return Err(crate::Error::Config("names.request_ttl_secs must be > 0".to_string()).into());
        }
        if self.runtime.tick_interval_ms == 0 {
            return Err(crate::Error::Config("runtime.tick_interval_ms must be > 0".to_string()).into());
        }
        Ok(())
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub search_timeout_secs: f64,
    /// ALERT returns to the previous mode after this hold.
    pub alert_hold_secs: f64,
    pub error_recover_secs: f64,
    /// Time spent in RECOVER before settling back to IDLE.
    pub recover_settle_secs: f64,
    pub max_backoff_secs: f64,
    pub max_search_attempts: u32,
    pub talk_silence_timeout_secs: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            search_timeout_secs: 30.0,
            alert_hold_secs: 4.0,
            error_recover_secs: 5.0,
            recover_settle_secs: 1.0,
            max_backoff_secs: 60.0,
            max_search_attempts: 5,
            talk_silence_timeout_secs: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub cooldown_secs: f64,
    /// Curiosity above this while IDLE starts a search on its own.
    pub curiosity_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60.0,
            curiosity_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    pub enabled: bool,
    pub cooldown_secs: f64,
    /// Defaults to `cooldown_secs` when unset.
    pub active_hold_secs: Option<f64>,
    /// Empty disables the notification sound.
    pub beep_wav_path: String,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown_secs: 10.0,
            active_hold_secs: None,
            beep_wav_path: String::new(),
        }
    }
}

impl EmergencyConfig {
    pub fn hold_secs(&self) -> f64 {
        self.active_hold_secs.unwrap_or(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NameLearningConfig {
    /// Aliases starting with this are placeholders for unnamed speakers.
    pub unknown_prefix: String,
    pub min_confidence: f32,
    pub min_streak: u32,
    pub request_cooldown_secs: f64,
    pub per_alias_interval_secs: f64,
    /// An ask or confirmation left unanswered this long is dropped.
    pub request_ttl_secs: f64,
    /// Rejected candidates allowed before the flow gives up.
    pub max_retries: u32,
}

impl Default for NameLearningConfig {
    fn default() -> Self {
        Self {
            unknown_prefix: "unknown".to_string(),
            min_confidence: 0.65,
            min_streak: 2,
            request_cooldown_secs: 120.0,
            per_alias_interval_secs: 180.0,
            request_ttl_secs: 60.0,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GreetConfig {
    pub min_confidence: f32,
    pub cooldown_secs: f64,
    pub requires_known_name: bool,
}

impl Default for GreetConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.65,
            cooldown_secs: 180.0,
            requires_known_name: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Recognition confidence needed to focus on a speaker.
    pub focus_threshold: f32,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            focus_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub idle_interval_min_secs: f64,
    pub idle_interval_max_secs: f64,
    pub starter_cooldown_secs: f64,
    pub starter_min_silence_secs: f64,
    pub starter_social_pressure: f32,
    pub starter_min_confidence: f32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            idle_interval_min_secs: 12.0,
            idle_interval_max_secs: 25.0,
            starter_cooldown_secs: 60.0,
            starter_min_silence_secs: 2.0,
            starter_social_pressure: 0.4,
            starter_min_confidence: 0.35,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
