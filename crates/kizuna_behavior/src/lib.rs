//! # Kizuna behaviour core
//!
//! Decides what the avatar is doing (its `Mode`) and how it feels (its
//! `AffectState`) from a stream of events: disaster alerts, emergency
//! messages, speech recognition results, search outcomes and heartbeats.
//!
//! `BehaviorMachine` is the synchronous core; `BehaviorRuntime` drives it on
//! a tokio task with a heartbeat and timer deadlines.

pub mod alert;
pub mod arbiter;
pub mod emergency;
pub mod greet;
pub mod machine;
pub mod name_learning;
pub mod observer;
pub mod presence;
pub mod runtime;
pub mod timers;

pub use alert::{AlertOutcome, AlertRecord};
pub use arbiter::{InterruptReason, PendingInterrupt};
pub use emergency::{EmergencyDecision, NotificationSound};
pub use greet::{GreetRequest, GreetType};
pub use machine::{BehaviorMachine, SearchRequest, Snapshot};
pub use name_learning::{ForgetRequest, NameRequestState, NameSaved, NameSetRequest, NameStage, Rejection};
pub use observer::{Cue, Observer};
pub use presence::{IdlePresence, PresenceKind, Starter};
pub use runtime::{BehaviorRuntime, HeartbeatConfig, RuntimeClock, RuntimeHandle};
pub use timers::TimerKind;
