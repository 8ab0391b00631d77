//! Build engine orchestration.
//!
//! Each project scope gets one out-of-process build engine, driven over
//! Content-Length framed JSON-RPC on stdio. [`EngineManager`] keeps exactly
//! one [`EngineClient`] alive per scope, replaces clients whose configuration
//! drifted, and writes successful builds into the scope's
//! [`ProjectCache`](quire_cache::ProjectCache).

pub mod codec;
pub mod events;

mod client;
mod context;
mod error;
mod listeners;
mod manager;
mod protocol;

pub use client::{ClientState, EngineClient};
pub use context::EngineContext;
pub use error::EngineError;
pub use events::{BuildFinished, ClientReady, EventHub, MessageLevel, Progress, UserMessage};
pub use listeners::{BuildListener, BuildListeners};
pub use manager::{BuildOutcome, EngineManager};
pub use protocol::{ApplicationInfo, ProgressKind};
