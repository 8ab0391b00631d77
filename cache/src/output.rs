use std::collections::BTreeMap;

use quire_types::{Diagnostic, DirectiveRecord, FileRecord, ObjectRecord, RoleRecord, Symbol};
use serde::{Deserialize, Serialize};
use url::Url;

/// Everything one successful build produced, ready to replace the cached snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildOutput {
    pub files: Vec<FileRecord>,
    pub objects: Vec<ObjectRecord>,
    pub roles: Vec<RoleRecord>,
    pub directives: Vec<DirectiveRecord>,
    pub symbols: BTreeMap<Url, Vec<Symbol>>,
    pub diagnostics: BTreeMap<Url, Vec<Diagnostic>>,
    pub config: BTreeMap<String, serde_json::Value>,
}

impl BuildOutput {
    /// Number of diagnostics across all files.
    #[must_use]
    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.values().map(Vec::len).sum()
    }
}
