//! # Kizuna core vocabulary
//!
//! Types shared by the behaviour core and its collaborators: the mode enum,
//! the affect scalars and their drift, the closed event vocabulary, the
//! clock abstraction and configuration.

pub mod affect;
pub mod clock;
pub mod config;
pub mod dynamics;
pub mod error;
pub mod event;
pub mod mode;

pub use affect::AffectState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::KizunaConfig;
pub use dynamics::{AffectDynamics, TickContext};
pub use error::{Error, Result};
pub use event::{Event, EventEnvelope};
pub use mode::Mode;
