//! Diagnostics reported by the build engine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::position::Range;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    #[default]
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from the numeric wire severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the defined range.
    /// Callers (boundary code) decide the fallback policy.
    #[must_use]
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_wire(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

impl Serialize for DiagnosticSeverity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_wire())
    }
}

// Unknown severities degrade to a warning rather than failing the whole report.
impl<'de> Deserialize<'de> for DiagnosticSeverity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u64::deserialize(deserializer)?;
        Ok(Self::from_wire(value).unwrap_or_default())
    }
}

/// A single diagnostic for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default)]
    pub severity: DiagnosticSeverity,
    pub message: String,
    /// Producer of the diagnostic (e.g. "sphinx", "docutils").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(severity: DiagnosticSeverity, message: impl Into<String>, range: Range) -> Self {
        Self {
            range,
            severity,
            message: message.into(),
            source: None,
            code: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Format as `location:line:col: severity: [source] message` (1-indexed for display).
    #[must_use]
    pub fn display_with_location(&self, location: &str) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            location,
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.source.as_deref().unwrap_or("unknown"),
            self.message,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire_known_values() {
        assert_eq!(
            DiagnosticSeverity::from_wire(1),
            Some(DiagnosticSeverity::Error)
        );
        assert_eq!(
            DiagnosticSeverity::from_wire(2),
            Some(DiagnosticSeverity::Warning)
        );
        assert_eq!(
            DiagnosticSeverity::from_wire(3),
            Some(DiagnosticSeverity::Information)
        );
        assert_eq!(
            DiagnosticSeverity::from_wire(4),
            Some(DiagnosticSeverity::Hint)
        );
    }

    #[test]
    fn test_from_wire_unknown_returns_none() {
        assert_eq!(DiagnosticSeverity::from_wire(0), None);
        assert_eq!(DiagnosticSeverity::from_wire(99), None);
    }

    #[test]
    fn test_severity_label() {
        assert_eq!(DiagnosticSeverity::Error.label(), "error");
        assert_eq!(DiagnosticSeverity::Warning.label(), "warning");
        assert_eq!(DiagnosticSeverity::Information.label(), "info");
        assert_eq!(DiagnosticSeverity::Hint.label(), "hint");
    }

    #[test]
    fn test_missing_severity_defaults_to_warning() {
        let json = serde_json::json!({
            "range": { "start": { "line": 5, "character": 3 }, "end": { "line": 5, "character": 10 } },
            "message": "undefined label"
        });
        let diag: Diagnostic = serde_json::from_value(json).unwrap();
        assert_eq!(diag.severity, DiagnosticSeverity::Warning);
        assert!(diag.source.is_none());
    }

    #[test]
    fn test_out_of_range_severity_degrades_to_warning() {
        let json = serde_json::json!({
            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
            "severity": 42,
            "message": "odd"
        });
        let diag: Diagnostic = serde_json::from_value(json).unwrap();
        assert_eq!(diag.severity, DiagnosticSeverity::Warning);
    }

    #[test]
    fn test_severity_serializes_as_number() {
        let diag = Diagnostic::new(DiagnosticSeverity::Error, "boom", Range::on_line(0, 0, 1));
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["severity"], 1);
        assert!(json.get("source").is_none(), "absent source must be omitted");
    }

    #[test]
    fn test_display_with_location() {
        let diag = Diagnostic::new(
            DiagnosticSeverity::Error,
            "Unknown directive type \"nope\".",
            Range::on_line(10, 5, 9),
        )
        .with_source("docutils");
        // line/col are 0-indexed internally, displayed as 1-indexed
        assert_eq!(
            diag.display_with_location("index.rst"),
            "index.rst:11:6: error: [docutils] Unknown directive type \"nope\"."
        );
    }
}
