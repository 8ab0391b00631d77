//! Core domain types for Quire.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Every record the build engine reports, and every record the project cache
//! hands back to feature code, is defined here.

mod diagnostic;
mod position;
mod project;
mod symbol;

pub use diagnostic::{Diagnostic, DiagnosticSeverity};
pub use position::{Position, Range};
pub use project::{DirectiveRecord, FileRecord, ImplementationRecord, ObjectRecord, RoleRecord};
pub use symbol::{LocatedSymbol, Symbol, SymbolKind, SymbolNode};

/// Re-exported so downstream crates agree on the URI type.
pub use url::Url;
