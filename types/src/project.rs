//! Project-level records reported by the build engine after a build.

use serde::{Deserialize, Serialize};
use url::Url;

/// A source file known to the engine and where its output was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub uri: Url,
    /// Engine-side document name (e.g. `guide/install`).
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

/// A cross-referenceable object (label, function, term, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    pub domain: String,
    pub name: String,
    pub display: String,
    pub obj_type: String,
    pub doc_id: String,
    /// Set for objects pulled in from another project's inventory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl ObjectRecord {
    /// Fully qualified type, e.g. `py:function`.
    #[must_use]
    pub fn qualified_type(&self) -> String {
        format!("{}:{}", self.domain, self.obj_type)
    }
}

/// A named markup extension (role or directive) and the code implementing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
}

impl ImplementationRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, implementation: Option<&str>) -> Self {
        Self {
            name: name.into(),
            implementation: implementation.map(str::to_string),
        }
    }

    /// Domain prefix of a qualified name (`py` for `py:func`).
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.name.split_once(':').map(|(domain, _)| domain)
    }
}

pub type RoleRecord = ImplementationRecord;
pub type DirectiveRecord = ImplementationRecord;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_record_uses_camel_case_on_the_wire() {
        let json = serde_json::json!({
            "domain": "std",
            "name": "install",
            "display": "Installation",
            "objType": "label",
            "docId": "guide/install"
        });
        let obj: ObjectRecord = serde_json::from_value(json).unwrap();
        assert_eq!(obj.obj_type, "label");
        assert_eq!(obj.doc_id, "guide/install");
        assert!(obj.project.is_none());
        assert_eq!(obj.qualified_type(), "std:label");
    }

    #[test]
    fn implementation_domain_split() {
        let role = RoleRecord::new("py:func", Some("sphinx.domains.python.PyXRefRole"));
        assert_eq!(role.domain(), Some("py"));
        assert_eq!(RoleRecord::new("ref", None).domain(), None);
    }

    #[test]
    fn file_record_output_path_is_optional() {
        let json = serde_json::json!({ "uri": "file:///proj/index.rst", "docId": "index" });
        let file: FileRecord = serde_json::from_value(json).unwrap();
        assert_eq!(file.doc_id, "index");
        assert!(file.output_path.is_none());
    }
}
