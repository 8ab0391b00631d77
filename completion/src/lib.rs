//! Completion for documentation sources.
//!
//! [`CompletionTrigger`] decides from the cursor's line whether completion
//! applies and captures what was typed so far. [`CompletionRegistry`] then
//! hands the resulting [`CompletionContext`] to every provider serving that
//! trigger. Providers only read the project cache; they never talk to the
//! build engine.

mod context;
mod provider;
mod trigger;

pub use context::{
    Capture, ClientCapabilities, CompletionContext, CompletionRequest, PositionEncoding,
    TriggerMatch,
};
pub use provider::{
    CompletionItem, CompletionKind, CompletionProvider, CompletionRegistry, DirectiveProvider,
    RoleProvider,
};
pub use trigger::{
    CompletionTrigger, MYST_DIRECTIVE, MYST_ROLE, RST_DIRECTIVE, RST_DIRECTIVE_OPTION, RST_ROLE,
    Trigger,
};
