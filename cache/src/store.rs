//! SQLite-backed project cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use quire_types::{
    Diagnostic, DiagnosticSeverity, DirectiveRecord, FileRecord, ImplementationRecord,
    LocatedSymbol, ObjectRecord, Position, Range, RoleRecord, Symbol, SymbolKind, SymbolNode,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use url::Url;

use crate::output::BuildOutput;
use crate::query::{ObjectFilter, SymbolQuery};
use crate::sqlite_util::{cache_file_name, open_db};

/// Bumped whenever the table layout changes. Stores with another version are
/// dropped and rebuilt on open.
pub const SCHEMA_VERSION: i64 = 1;

const TABLES: [&str; 7] = [
    "files",
    "objects",
    "roles",
    "directives",
    "symbols",
    "diagnostics",
    "config",
];

/// Queryable snapshot of one project's latest successful build.
pub struct ProjectCache {
    db: Mutex<Connection>,
}

impl ProjectCache {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS files (
            uri TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            output_path TEXT
        );

        CREATE TABLE IF NOT EXISTS objects (
            domain TEXT NOT NULL,
            name TEXT NOT NULL,
            display TEXT NOT NULL,
            obj_type TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            project TEXT
        );

        CREATE TABLE IF NOT EXISTS roles (
            name TEXT PRIMARY KEY,
            implementation TEXT
        );

        CREATE TABLE IF NOT EXISTS directives (
            name TEXT PRIMARY KEY,
            implementation TEXT
        );

        CREATE TABLE IF NOT EXISTS symbols (
            uri TEXT NOT NULL,
            id INTEGER NOT NULL,
            name TEXT NOT NULL,
            kind INTEGER NOT NULL,
            detail TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            start_char INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_char INTEGER NOT NULL,
            parent_id INTEGER,
            order_id INTEGER NOT NULL,
            PRIMARY KEY (uri, id)
        );

        CREATE TABLE IF NOT EXISTS diagnostics (
            uri TEXT NOT NULL,
            severity INTEGER NOT NULL,
            message TEXT NOT NULL,
            source TEXT,
            code TEXT,
            start_line INTEGER NOT NULL,
            start_char INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_char INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS config (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_objects_domain
        ON objects(domain, obj_type);

        CREATE INDEX IF NOT EXISTS idx_symbols_name
        ON symbols(name);

        CREATE INDEX IF NOT EXISTS idx_diagnostics_uri
        ON diagnostics(uri);
    ";

    /// Open or create the cache database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = open_db(path)?;
        Self::initialize(db)
            .with_context(|| format!("Failed to initialize project cache at {}", path.display()))
    }

    /// Open the cache for `scope` inside `dir`, or in memory when `dir` is `None`.
    pub fn open_for_scope(dir: Option<&Path>, scope: &Url) -> Result<Self> {
        match dir {
            Some(dir) => Self::open(dir.join(cache_file_name(scope))),
            None => Self::open_in_memory(),
        }
    }

    /// Open an in-memory cache.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory project cache")?;
        Self::initialize(db)
    }

    fn initialize(mut db: Connection) -> Result<Self> {
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set project cache pragmas")?;

        let version: i64 = db
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("Failed to read project cache schema version")?;
        if version != SCHEMA_VERSION {
            if version != 0 {
                tracing::warn!(
                    found = version,
                    expected = SCHEMA_VERSION,
                    "Project cache schema mismatch, rebuilding"
                );
            }
            Self::rebuild_schema(&mut db)?;
        }
        Ok(Self { db: Mutex::new(db) })
    }

    fn rebuild_schema(db: &mut Connection) -> Result<()> {
        let tx = db
            .transaction()
            .context("Failed to start schema transaction")?;
        let existing: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
                .context("Failed to list cache tables")?;
            stmt.query_map([], |row| row.get(0))
                .context("Failed to list cache tables")?
                .collect::<rusqlite::Result<_>>()
                .context("Failed to read cache table names")?
        };
        for table in existing {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))
                .with_context(|| format!("Failed to drop stale table {table}"))?;
        }
        tx.execute_batch(Self::SCHEMA)
            .context("Failed to create project cache schema")?;
        tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
            .context("Failed to stamp project cache schema version")?;
        tx.commit().context("Failed to commit schema rebuild")
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the cached snapshot with `output`.
    ///
    /// All tables are cleared and repopulated inside one transaction. On any
    /// error the transaction is rolled back and the previous snapshot stays.
    pub fn sync(&self, output: &BuildOutput) -> Result<()> {
        let mut db = self.conn();
        let tx = db
            .transaction()
            .context("Failed to start project cache transaction")?;

        for table in TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .with_context(|| format!("Failed to clear {table}"))?;
        }

        insert_files(&tx, &output.files)?;
        insert_objects(&tx, &output.objects)?;
        insert_implementations(&tx, "roles", &output.roles)?;
        insert_implementations(&tx, "directives", &output.directives)?;
        insert_symbols(&tx, &output.symbols)?;
        insert_diagnostics(&tx, &output.diagnostics)?;
        insert_config(&tx, &output.config)?;

        tx.commit()
            .context("Failed to commit project cache transaction")?;

        tracing::debug!(
            files = output.files.len(),
            objects = output.objects.len(),
            diagnostics = output.diagnostic_count(),
            "Project cache synced"
        );
        Ok(())
    }

    /// Objects matching `filter`, ordered by domain, type and name.
    pub fn get_objects(&self, filter: &ObjectFilter) -> Result<Vec<ObjectRecord>> {
        let clause = filter.to_where();
        let db = self.conn();
        let mut stmt = db
            .prepare(&format!(
                "SELECT domain, name, display, obj_type, doc_id, project FROM objects{}
                 ORDER BY domain, obj_type, name",
                clause.sql
            ))
            .context("Failed to prepare get_objects query")?;
        let rows = stmt
            .query_map(params_from_iter(clause.params.iter()), |row| {
                Ok(ObjectRecord {
                    domain: row.get(0)?,
                    name: row.get(1)?,
                    display: row.get(2)?,
                    obj_type: row.get(3)?,
                    doc_id: row.get(4)?,
                    project: row.get(5)?,
                })
            })
            .context("Failed to query objects")?;
        rows.collect::<rusqlite::Result<_>>()
            .context("Failed to read object rows")
    }

    pub fn get_role(&self, name: &str) -> Result<Option<RoleRecord>> {
        self.get_implementation("roles", name)
    }

    pub fn get_roles(&self) -> Result<Vec<RoleRecord>> {
        self.list_implementations("roles")
    }

    pub fn get_directive(&self, name: &str) -> Result<Option<DirectiveRecord>> {
        self.get_implementation("directives", name)
    }

    pub fn get_directives(&self) -> Result<Vec<DirectiveRecord>> {
        self.list_implementations("directives")
    }

    fn get_implementation(&self, table: &str, name: &str) -> Result<Option<ImplementationRecord>> {
        self.conn()
            .query_row(
                &format!("SELECT name, implementation FROM {table} WHERE name = ?1"),
                params![name],
                implementation_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to look up {name} in {table}"))
    }

    fn list_implementations(&self, table: &str) -> Result<Vec<ImplementationRecord>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(&format!(
                "SELECT name, implementation FROM {table} ORDER BY name"
            ))
            .with_context(|| format!("Failed to prepare {table} query"))?;
        let rows = stmt
            .query_map([], implementation_from_row)
            .with_context(|| format!("Failed to query {table}"))?;
        rows.collect::<rusqlite::Result<_>>()
            .with_context(|| format!("Failed to read {table} rows"))
    }

    /// The symbol tree of one document, siblings ordered by `order_id`.
    ///
    /// Symbols whose parent is missing are promoted to the top level.
    pub fn get_document_symbols(&self, uri: &Url) -> Result<Vec<SymbolNode>> {
        let located = self.find_symbols(&SymbolQuery {
            uri: Some(uri.clone()),
            ..SymbolQuery::default()
        })?;
        let symbols: Vec<Symbol> = located.into_iter().map(|s| s.symbol).collect();
        Ok(build_symbol_tree(symbols))
    }

    /// Flat symbol search across the project.
    pub fn find_symbols(&self, query: &SymbolQuery) -> Result<Vec<LocatedSymbol>> {
        let clause = query.to_where();
        let db = self.conn();
        let mut stmt = db
            .prepare(&format!(
                "SELECT uri, id, name, kind, detail, start_line, start_char, end_line, end_char,
                        parent_id, order_id
                 FROM symbols{}
                 ORDER BY uri, order_id, id",
                clause.sql
            ))
            .context("Failed to prepare find_symbols query")?;
        let rows = stmt
            .query_map(params_from_iter(clause.params.iter()), |row| {
                Ok(LocatedSymbol {
                    uri: url_column(row, 0)?,
                    symbol: Symbol {
                        id: row.get(1)?,
                        name: row.get(2)?,
                        kind: SymbolKind(row.get(3)?),
                        detail: row.get(4)?,
                        range: range_columns(row, 5)?,
                        parent_id: row.get(9)?,
                        order_id: row.get(10)?,
                    },
                })
            })
            .context("Failed to query symbols")?;
        rows.collect::<rusqlite::Result<_>>()
            .context("Failed to read symbol rows")
    }

    /// All diagnostics of the latest build, keyed by document.
    pub fn get_diagnostics(&self) -> Result<BTreeMap<Url, Vec<Diagnostic>>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(
                "SELECT uri, severity, message, source, code,
                        start_line, start_char, end_line, end_char
                 FROM diagnostics
                 ORDER BY uri, rowid",
            )
            .context("Failed to prepare get_diagnostics query")?;
        let rows = stmt
            .query_map([], |row| {
                let uri = url_column(row, 0)?;
                let severity: i64 = row.get(1)?;
                let severity = u64::try_from(severity).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, Box::new(e))
                })?;
                let diagnostic = Diagnostic {
                    range: range_columns(row, 5)?,
                    severity: DiagnosticSeverity::from_wire(severity).unwrap_or_default(),
                    message: row.get(2)?,
                    source: row.get(3)?,
                    code: row.get(4)?,
                };
                Ok((uri, diagnostic))
            })
            .context("Failed to query diagnostics")?;

        let mut out: BTreeMap<Url, Vec<Diagnostic>> = BTreeMap::new();
        for row in rows {
            let (uri, diagnostic) = row.context("Failed to read diagnostic row")?;
            out.entry(uri).or_default().push(diagnostic);
        }
        Ok(out)
    }

    pub fn get_config_value(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM config WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to look up config value {name}"))?;
        raw.map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("Corrupt config value for {name}"))
        })
        .transpose()
    }

    pub fn get_file(&self, uri: &Url) -> Result<Option<FileRecord>> {
        self.conn()
            .query_row(
                "SELECT uri, doc_id, output_path FROM files WHERE uri = ?1",
                params![uri.as_str()],
                |row| {
                    Ok(FileRecord {
                        uri: url_column(row, 0)?,
                        doc_id: row.get(1)?,
                        output_path: row.get(2)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to look up file {uri}"))
    }

    /// Where the engine wrote the output for `uri`, if it was built.
    pub fn get_build_path(&self, uri: &Url) -> Result<Option<String>> {
        Ok(self.get_file(uri)?.and_then(|file| file.output_path))
    }
}

fn insert_files(tx: &Transaction<'_>, files: &[FileRecord]) -> Result<()> {
    let mut stmt = tx
        .prepare("INSERT INTO files (uri, doc_id, output_path) VALUES (?1, ?2, ?3)")
        .context("Failed to prepare file insert")?;
    for file in files {
        stmt.execute(params![file.uri.as_str(), file.doc_id, file.output_path])
            .with_context(|| format!("Failed to insert file {}", file.uri))?;
    }
    Ok(())
}

fn insert_objects(tx: &Transaction<'_>, objects: &[ObjectRecord]) -> Result<()> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO objects (domain, name, display, obj_type, doc_id, project)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .context("Failed to prepare object insert")?;
    for obj in objects {
        stmt.execute(params![
            obj.domain,
            obj.name,
            obj.display,
            obj.obj_type,
            obj.doc_id,
            obj.project
        ])
        .with_context(|| format!("Failed to insert object {}:{}", obj.domain, obj.name))?;
    }
    Ok(())
}

fn insert_implementations(
    tx: &Transaction<'_>,
    table: &str,
    records: &[ImplementationRecord],
) -> Result<()> {
    let mut stmt = tx
        .prepare(&format!(
            "INSERT INTO {table} (name, implementation) VALUES (?1, ?2)"
        ))
        .with_context(|| format!("Failed to prepare {table} insert"))?;
    for record in records {
        stmt.execute(params![record.name, record.implementation])
            .with_context(|| format!("Failed to insert {} into {table}", record.name))?;
    }
    Ok(())
}

fn insert_symbols(tx: &Transaction<'_>, symbols: &BTreeMap<Url, Vec<Symbol>>) -> Result<()> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO symbols (uri, id, name, kind, detail, start_line, start_char,
                                  end_line, end_char, parent_id, order_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .context("Failed to prepare symbol insert")?;
    for (uri, items) in symbols {
        for symbol in items {
            stmt.execute(params![
                uri.as_str(),
                symbol.id,
                symbol.name,
                symbol.kind.0,
                symbol.detail,
                symbol.range.start.line,
                symbol.range.start.character,
                symbol.range.end.line,
                symbol.range.end.character,
                symbol.parent_id,
                symbol.order_id
            ])
            .with_context(|| format!("Failed to insert symbol {} for {uri}", symbol.id))?;
        }
    }
    Ok(())
}

fn insert_diagnostics(
    tx: &Transaction<'_>,
    diagnostics: &BTreeMap<Url, Vec<Diagnostic>>,
) -> Result<()> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO diagnostics (uri, severity, message, source, code,
                                      start_line, start_char, end_line, end_char)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .context("Failed to prepare diagnostic insert")?;
    for (uri, items) in diagnostics {
        for diag in items {
            stmt.execute(params![
                uri.as_str(),
                diag.severity.as_wire(),
                diag.message,
                diag.source,
                diag.code,
                diag.range.start.line,
                diag.range.start.character,
                diag.range.end.line,
                diag.range.end.character
            ])
            .with_context(|| format!("Failed to insert diagnostic for {uri}"))?;
        }
    }
    Ok(())
}

fn insert_config(tx: &Transaction<'_>, config: &BTreeMap<String, serde_json::Value>) -> Result<()> {
    let mut stmt = tx
        .prepare("INSERT INTO config (name, value) VALUES (?1, ?2)")
        .context("Failed to prepare config insert")?;
    for (name, value) in config {
        let encoded = serde_json::to_string(value)
            .with_context(|| format!("Failed to encode config value {name}"))?;
        stmt.execute(params![name, encoded])
            .with_context(|| format!("Failed to insert config value {name}"))?;
    }
    Ok(())
}

fn implementation_from_row(row: &Row<'_>) -> rusqlite::Result<ImplementationRecord> {
    Ok(ImplementationRecord {
        name: row.get(0)?,
        implementation: row.get(1)?,
    })
}

fn url_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Url> {
    let raw: String = row.get(idx)?;
    Url::parse(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn range_columns(row: &Row<'_>, first: usize) -> rusqlite::Result<Range> {
    Ok(Range::new(
        Position::new(row.get(first)?, row.get(first + 1)?),
        Position::new(row.get(first + 2)?, row.get(first + 3)?),
    ))
}

/// Assemble flat symbols (already sorted by `order_id`) into a tree.
fn build_symbol_tree(symbols: Vec<Symbol>) -> Vec<SymbolNode> {
    let ids: HashSet<i64> = symbols.iter().map(|s| s.id).collect();
    let mut by_parent: HashMap<Option<i64>, Vec<Symbol>> = HashMap::new();
    for symbol in symbols {
        let parent = symbol.parent_id.filter(|p| ids.contains(p) && *p != symbol.id);
        by_parent.entry(parent).or_default().push(symbol);
    }

    let mut roots = attach_children(None, &mut by_parent);
    // Parent cycles never reach the top level; surface them as roots.
    let mut stranded: Vec<Symbol> = by_parent.drain().flat_map(|(_, v)| v).collect();
    stranded.sort_by_key(|s| (s.order_id, s.id));
    roots.extend(stranded.into_iter().map(|symbol| SymbolNode {
        symbol,
        children: Vec::new(),
    }));
    roots
}

fn attach_children(
    parent: Option<i64>,
    by_parent: &mut HashMap<Option<i64>, Vec<Symbol>>,
) -> Vec<SymbolNode> {
    let Some(children) = by_parent.remove(&parent) else {
        return Vec::new();
    };
    children
        .into_iter()
        .map(|symbol| {
            let children = attach_children(Some(symbol.id), by_parent);
            SymbolNode { symbol, children }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ProjectFilter;

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file:///proj/{path}")).unwrap()
    }

    fn symbol(id: i64, name: &str, parent_id: Option<i64>, order_id: i64) -> Symbol {
        Symbol {
            id,
            name: name.to_string(),
            kind: SymbolKind::STRING,
            detail: String::new(),
            range: Range::on_line(id as u32, 0, 10),
            parent_id,
            order_id,
        }
    }

    fn object(domain: &str, name: &str, obj_type: &str, project: Option<&str>) -> ObjectRecord {
        ObjectRecord {
            domain: domain.to_string(),
            name: name.to_string(),
            display: name.to_string(),
            obj_type: obj_type.to_string(),
            doc_id: "index".to_string(),
            project: project.map(str::to_string),
        }
    }

    fn diag(message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticSeverity::Warning, message, Range::on_line(1, 0, 4))
            .with_source("sphinx")
    }

    /// Build output covering two documents, `a.rst` and `b.rst`.
    fn build_a() -> BuildOutput {
        let mut output = BuildOutput {
            files: vec![
                FileRecord {
                    uri: uri("a.rst"),
                    doc_id: "a".to_string(),
                    output_path: Some("/proj/_build/a/index.html".to_string()),
                },
                FileRecord {
                    uri: uri("b.rst"),
                    doc_id: "b".to_string(),
                    output_path: Some("/proj/_build/b/index.html".to_string()),
                },
            ],
            objects: vec![
                object("std", "intro", "label", None),
                object("py", "demo.run", "function", None),
                object("py", "os.path.join", "function", Some("python")),
            ],
            roles: vec![
                RoleRecord::new("ref", Some("sphinx.roles.XRefRole")),
                RoleRecord::new("py:func", Some("sphinx.domains.python.PyXRefRole")),
            ],
            directives: vec![DirectiveRecord::new(
                "note",
                Some("docutils.parsers.rst.directives.admonitions.Note"),
            )],
            ..BuildOutput::default()
        };
        output.symbols.insert(
            uri("a.rst"),
            vec![symbol(1, "Title A", None, 0), symbol(2, "Section", Some(1), 0)],
        );
        output
            .symbols
            .insert(uri("b.rst"), vec![symbol(1, "Title B", None, 0)]);
        output
            .diagnostics
            .insert(uri("b.rst"), vec![diag("undefined label: 'nope'")]);
        output
            .config
            .insert("project".to_string(), serde_json::json!("Demo"));
        output
    }

    fn cache() -> ProjectCache {
        ProjectCache::open_in_memory().unwrap()
    }

    #[test]
    fn empty_cache_answers_queries() {
        let cache = cache();
        assert!(cache.get_roles().unwrap().is_empty());
        assert!(cache.get_diagnostics().unwrap().is_empty());
        assert_eq!(cache.get_role("ref").unwrap(), None);
        assert_eq!(cache.get_build_path(&uri("a.rst")).unwrap(), None);
    }

    #[test]
    fn sync_populates_every_table() {
        let cache = cache();
        cache.sync(&build_a()).unwrap();

        assert_eq!(cache.get_roles().unwrap().len(), 2);
        assert_eq!(
            cache.get_role("ref").unwrap().unwrap().implementation.as_deref(),
            Some("sphinx.roles.XRefRole")
        );
        assert_eq!(cache.get_directives().unwrap()[0].name, "note");
        assert_eq!(
            cache.get_build_path(&uri("a.rst")).unwrap().as_deref(),
            Some("/proj/_build/a/index.html")
        );
        assert_eq!(
            cache.get_config_value("project").unwrap(),
            Some(serde_json::json!("Demo"))
        );
        let diagnostics = cache.get_diagnostics().unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[&uri("b.rst")][0].message, "undefined label: 'nope'");
        assert_eq!(
            diagnostics[&uri("b.rst")][0].source.as_deref(),
            Some("sphinx")
        );
    }

    #[test]
    fn resync_replaces_previous_snapshot() {
        let cache = cache();
        cache.sync(&build_a()).unwrap();

        let mut next = build_a();
        next.diagnostics.clear();
        next.roles.truncate(1);
        next.symbols.remove(&uri("b.rst"));
        cache.sync(&next).unwrap();

        assert!(cache.get_diagnostics().unwrap().is_empty());
        assert_eq!(cache.get_roles().unwrap().len(), 1);
        assert!(cache.get_document_symbols(&uri("b.rst")).unwrap().is_empty());
    }

    #[test]
    fn failed_sync_keeps_previous_snapshot() {
        let cache = cache();
        cache.sync(&build_a()).unwrap();

        // Second build: new diagnostics for a.rst, but b.rst reports a
        // duplicate symbol id, which violates the primary key.
        let mut broken = build_a();
        broken
            .diagnostics
            .insert(uri("a.rst"), vec![diag("new problem")]);
        broken.symbols.insert(
            uri("b.rst"),
            vec![symbol(7, "Dup", None, 0), symbol(7, "Dup again", None, 1)],
        );
        assert!(cache.sync(&broken).is_err());

        let diagnostics = cache.get_diagnostics().unwrap();
        assert!(!diagnostics.contains_key(&uri("a.rst")));
        assert_eq!(diagnostics[&uri("b.rst")][0].message, "undefined label: 'nope'");
        let b_symbols = cache.get_document_symbols(&uri("b.rst")).unwrap();
        assert_eq!(b_symbols.len(), 1);
        assert_eq!(b_symbols[0].symbol.name, "Title B");
    }

    #[test]
    fn document_symbols_form_an_ordered_tree() {
        let cache = cache();
        let mut output = BuildOutput::default();
        output.symbols.insert(
            uri("a.rst"),
            vec![
                symbol(1, "Title", None, 0),
                symbol(3, "Second", Some(1), 1),
                symbol(2, "First", Some(1), 0),
                symbol(4, "Nested", Some(2), 0),
                symbol(5, "Orphan", Some(99), 1),
            ],
        );
        cache.sync(&output).unwrap();

        let tree = cache.get_document_symbols(&uri("a.rst")).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].symbol.name, "Title");
        assert_eq!(tree[1].symbol.name, "Orphan");
        let children: Vec<&str> = tree[0]
            .children
            .iter()
            .map(|c| c.symbol.name.as_str())
            .collect();
        assert_eq!(children, vec!["First", "Second"]);
        assert_eq!(tree[0].children[0].children[0].symbol.name, "Nested");
        assert_eq!(tree[0].subtree_size(), 4);
    }

    #[test]
    fn find_symbols_filters_by_criteria() {
        let cache = cache();
        cache.sync(&build_a()).unwrap();

        let titles = cache
            .find_symbols(&SymbolQuery {
                name_contains: Some("title".to_string()),
                ..SymbolQuery::default()
            })
            .unwrap();
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[0].uri, uri("a.rst"));
        assert_eq!(titles[1].uri, uri("b.rst"));

        let exact = cache
            .find_symbols(&SymbolQuery {
                name: Some("Section".to_string()),
                kind: Some(SymbolKind::STRING),
                ..SymbolQuery::default()
            })
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].symbol.parent_id, Some(1));

        let none = cache
            .find_symbols(&SymbolQuery {
                kind: Some(SymbolKind::CLASS),
                ..SymbolQuery::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn get_objects_applies_filter() {
        let cache = cache();
        cache.sync(&build_a()).unwrap();

        assert_eq!(cache.get_objects(&ObjectFilter::new()).unwrap().len(), 3);

        let py = cache
            .get_objects(&ObjectFilter::new().domain("py").obj_type("function"))
            .unwrap();
        assert_eq!(py.len(), 2);

        let local = cache
            .get_objects(&ObjectFilter::new().domain("py").project(ProjectFilter::Local))
            .unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].name, "demo.run");

        let external = cache
            .get_objects(&ObjectFilter::new().project(ProjectFilter::Named("python".to_string())))
            .unwrap();
        assert_eq!(external[0].name, "os.path.join");
    }

    #[test]
    fn diagnostic_severity_survives_storage() {
        let cache = cache();
        let mut output = build_a();
        output.diagnostics.insert(
            uri("a.rst"),
            vec![
                Diagnostic::new(DiagnosticSeverity::Error, "bad", Range::on_line(0, 0, 1)),
                Diagnostic::new(DiagnosticSeverity::Hint, "hint", Range::on_line(2, 0, 1)),
            ],
        );
        cache.sync(&output).unwrap();

        let diagnostics = cache.get_diagnostics().unwrap();
        let severities: Vec<_> = diagnostics[&uri("a.rst")]
            .iter()
            .map(|d| d.severity)
            .collect();
        assert_eq!(
            severities,
            [DiagnosticSeverity::Error, DiagnosticSeverity::Hint]
        );
        assert_eq!(
            diagnostics[&uri("b.rst")][0].severity,
            DiagnosticSeverity::Warning
        );
    }

    #[test]
    fn negative_severity_is_a_read_error() {
        let cache = cache();
        cache.sync(&build_a()).unwrap();
        cache
            .conn()
            .execute("UPDATE diagnostics SET severity = -1", [])
            .unwrap();
        assert!(cache.get_diagnostics().is_err());
    }

    #[test]
    fn on_disk_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let scope = Url::parse("file:///proj/").unwrap();
        {
            let cache = ProjectCache::open_for_scope(Some(dir.path()), &scope).unwrap();
            cache.sync(&build_a()).unwrap();
        }
        let reopened = ProjectCache::open_for_scope(Some(dir.path()), &scope).unwrap();
        assert_eq!(reopened.get_roles().unwrap().len(), 2);
        assert!(dir.path().join(cache_file_name(&scope)).is_file());
    }

    #[test]
    fn schema_mismatch_rebuilds_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");
        {
            let cache = ProjectCache::open(&path).unwrap();
            cache.sync(&build_a()).unwrap();
        }
        {
            let raw = Connection::open(&path).unwrap();
            raw.execute_batch("CREATE TABLE legacy_blobs (data TEXT); PRAGMA user_version = 99;")
                .unwrap();
        }

        let cache = ProjectCache::open(&path).unwrap();
        assert!(cache.get_roles().unwrap().is_empty());

        let db = cache.conn();
        let version: i64 = db
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        let legacy: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'legacy_blobs'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(legacy, 0);
    }
}
