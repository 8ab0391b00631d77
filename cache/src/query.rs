//! Query criteria for the cache read API.

use quire_types::SymbolKind;
use url::Url;

/// Which inventory an object must come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProjectFilter {
    #[default]
    Any,
    /// Objects defined by the project itself.
    Local,
    /// Objects from one external project.
    Named(String),
}

/// Object lookup criteria. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    pub domains: Vec<String>,
    pub obj_types: Vec<String>,
    pub project: ProjectFilter,
}

impl ObjectFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    pub fn obj_type(mut self, obj_type: impl Into<String>) -> Self {
        self.obj_types.push(obj_type.into());
        self
    }

    pub fn project(mut self, project: ProjectFilter) -> Self {
        self.project = project;
        self
    }
}

/// Symbol search criteria. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolQuery {
    pub uri: Option<Url>,
    pub name: Option<String>,
    /// Case-insensitive substring match on the name.
    pub name_contains: Option<String>,
    pub kind: Option<SymbolKind>,
    pub detail: Option<String>,
}

/// SQL fragment plus its positional parameters.
pub(crate) struct WhereClause {
    pub sql: String,
    pub params: Vec<rusqlite::types::Value>,
}

impl WhereClause {
    fn new() -> Self {
        Self {
            sql: String::from(" WHERE 1 = 1"),
            params: Vec::new(),
        }
    }

    fn push_eq(&mut self, column: &str, value: rusqlite::types::Value) {
        self.sql.push_str(&format!(" AND {column} = ?"));
        self.params.push(value);
    }

    fn push_in(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.sql.push_str(&format!(" AND {column} IN ({placeholders})"));
        self.params
            .extend(values.iter().cloned().map(rusqlite::types::Value::Text));
    }
}

impl ObjectFilter {
    pub(crate) fn to_where(&self) -> WhereClause {
        let mut clause = WhereClause::new();
        clause.push_in("domain", &self.domains);
        clause.push_in("obj_type", &self.obj_types);
        match &self.project {
            ProjectFilter::Any => {}
            ProjectFilter::Local => clause.sql.push_str(" AND project IS NULL"),
            ProjectFilter::Named(name) => {
                clause.push_eq("project", rusqlite::types::Value::Text(name.clone()));
            }
        }
        clause
    }
}

impl SymbolQuery {
    pub(crate) fn to_where(&self) -> WhereClause {
        use rusqlite::types::Value;

        let mut clause = WhereClause::new();
        if let Some(uri) = &self.uri {
            clause.push_eq("uri", Value::Text(uri.to_string()));
        }
        if let Some(name) = &self.name {
            clause.push_eq("name", Value::Text(name.clone()));
        }
        if let Some(fragment) = &self.name_contains {
            let escaped = fragment
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            clause.sql.push_str(" AND name LIKE ? ESCAPE '\\'");
            clause.params.push(Value::Text(format!("%{escaped}%")));
        }
        if let Some(kind) = self.kind {
            clause.push_eq("kind", Value::Integer(i64::from(kind.0)));
        }
        if let Some(detail) = &self.detail {
            clause.push_eq("detail", Value::Text(detail.clone()));
        }
        clause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_params() {
        let clause = ObjectFilter::new().to_where();
        assert_eq!(clause.sql, " WHERE 1 = 1");
        assert!(clause.params.is_empty());
    }

    #[test]
    fn object_filter_builds_in_lists() {
        let clause = ObjectFilter::new()
            .domain("py")
            .obj_type("function")
            .obj_type("method")
            .project(ProjectFilter::Local)
            .to_where();
        assert_eq!(
            clause.sql,
            " WHERE 1 = 1 AND domain IN (?) AND obj_type IN (?, ?) AND project IS NULL"
        );
        assert_eq!(clause.params.len(), 3);
    }

    #[test]
    fn name_contains_escapes_like_wildcards() {
        let query = SymbolQuery {
            name_contains: Some("100%_done".to_string()),
            ..SymbolQuery::default()
        };
        let clause = query.to_where();
        assert_eq!(
            clause.params,
            vec![rusqlite::types::Value::Text("%100\\%\\_done%".to_string())]
        );
    }
}
