//! Behavioural modes of the avatar.
//!
//! Exactly one mode is current at any time. The numeric values are part of
//! the contract with the animation collaborator, which drives the avatar's
//! `N_State` parameter from them.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Mode {
    #[default]
    Idle = 0,
    Greet = 1,
    Talk = 2,
    React = 3,
    Focus = 4,
    Alert = 5,
    Search = 6,
    Error = 7,
    Recover = 8,
}

impl Mode {
    pub const ALL: [Mode; 9] = [
        Mode::Idle,
        Mode::Greet,
        Mode::Talk,
        Mode::React,
        Mode::Focus,
        Mode::Alert,
        Mode::Search,
        Mode::Error,
        Mode::Recover,
    ];

    /// Modes in which an utterance may be in progress. Queued interrupts
    /// wait for the next utterance boundary while one of these is current.
    pub fn is_speaking(self) -> bool {
        matches!(self, Mode::Talk | Mode::Greet | Mode::React)
    }

    /// Modes that block name prompts, greetings and casual talk.
    pub fn is_high_priority(self) -> bool {
        matches!(self, Mode::Alert | Mode::Search)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "IDLE",
            Mode::Greet => "GREET",
            Mode::Talk => "TALK",
            Mode::React => "REACT",
            Mode::Focus => "FOCUS",
            Mode::Alert => "ALERT",
            Mode::Search => "SEARCH",
            Mode::Error => "ERROR",
            Mode::Recover => "RECOVER",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
