//! # lineup-engine
//!
//! Runs slot drafts: a host opens a draft in a channel, participants signal
//! for slots, and once every slot is held the owner's link is handed to the
//! whole lineup.
//!
//! - [`DraftEngine`]: entry point, one per process
//! - [`SessionRegistry`]: at most one active draft per channel
//! - [`SignalDebouncer`]: settle window and first-signal-wins resolution
//! - [`DraftSession`]: the per-draft state machine
//! - [`EscalationTimer`]: reminder and deadline
//! - [`HandoffCollector`]: payload wait and direct-message fan-out
//! - [`Gateway`]: everything the engine needs from the chat service

mod actor;
pub mod commands;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod handoff;
pub mod mock;
pub mod registry;
pub mod render;
pub mod session;
pub mod timer;

pub use commands::{HostCommand, HostPolicy, Requester};
pub use debounce::{Observation, SignalDebouncer};
pub use engine::{DraftEngine, EngineConfig, HostRequest};
pub use error::EngineError;
pub use gateway::{Announcement, Gateway, RawSignal, SignalSink, Subscription};
pub use handoff::{HandoffCollector, HandoffOutcome, PayloadMatcher};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::DraftSession;
pub use timer::EscalationTimer;
