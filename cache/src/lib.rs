//! Project cache: a locally queryable copy of everything the build engine
//! reported for one project.
//!
//! Only [`ProjectCache::sync`] writes, always inside a single transaction, so
//! readers see either the previous build's snapshot or the new one, never a
//! mix. Every other method is a read-only query used by feature code.

mod output;
mod query;
mod sqlite_util;
mod store;

pub use output::BuildOutput;
pub use query::{ObjectFilter, ProjectFilter, SymbolQuery};
pub use sqlite_util::cache_file_name;
pub use store::{ProjectCache, SCHEMA_VERSION};
