use crate::config::Config;
use crate::host::{ReferenceSearch, Scope, SourceText, SymbolIndex, TypeResolver};
use crate::indexer::extract::{ChainRoot, ChainStep, ExtractedFile, Receiver, ReceiverChain};
use crate::indexer::java;
use crate::model::{
    DeclKind, Declaration, DeclarationSummary, Marker, MemberKind, MemberRecord, Origin, Param,
    RefKind, ReferenceSite, Severity, SourceUnit, TypeRef,
};
use crate::util;
use anyhow::{Context, Result, anyhow, bail};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

mod migrations;

const DECL_SELECT: &str = "SELECT d.id, d.qualname, d.name, d.kind, d.modifiers, d.package,
        d.superclass, d.interfaces, d.annotations, d.outer, d.start_line, d.end_line,
        f.path, f.name, f.origin
     FROM declarations d
     JOIN files f ON f.id = d.file_id";

const MEMBER_SELECT: &str = "SELECT m.id, m.kind, m.name, d.qualname, m.ty, m.modifiers,
        m.params, m.throws, m.annotations, m.has_body, m.has_initializer, f.name,
        m.start_line, m.end_line
     FROM members m
     JOIN declarations d ON d.id = m.decl_id
     JOIN files f ON f.id = m.file_id";

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

/// One row of the `files` table, without the stored content.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub origin: Origin,
    pub hash: String,
    pub package: String,
    pub wildcard_imports: Vec<String>,
}

/// A source file about to be written by [`Db::replace_file`].
#[derive(Debug, Clone)]
pub struct FileInput<'a> {
    pub path: &'a str,
    pub origin: Origin,
    pub hash: &'a str,
    pub size: i64,
    pub modified: i64,
    pub content: &'a str,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileCounts {
    pub declarations: usize,
    pub members: usize,
    pub references: usize,
}

/// Handle to the SQLite index: one serialized writer plus a pool of readers.
pub struct Db {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl Db {
    /// Open or create the index at `db_path` and bring its schema up to date.
    pub fn new(db_path: &Path) -> Result<Self> {
        util::ensure_parent_dir(db_path)?;

        let config = Config::get();
        debug!(
            pool_size = config.pool_size,
            min_idle = config.pool_min_idle,
            "initializing connection pool"
        );

        // Open write connection first and run migrations
        let write_conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db at {}", db_path.display()))?;
        write_conn.busy_timeout(Duration::from_secs(30))?;
        write_conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        migrations::migrate(&write_conn)?;

        let write_conn = Arc::new(Mutex::new(write_conn));

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.pool_min_idle))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .with_context(|| "create connection pool")?;

        info!(path = %db_path.display(), "index database ready");

        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn,
            read_pool,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// A pooled read connection outside any transaction.
    pub fn read_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .with_context(|| "get read connection from pool")
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.write_conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a read transaction. Unit paths resolve against `root`.
    pub fn begin_read(&self, root: &Path) -> Result<ReadTxn> {
        ReadTxn::begin(self.read_conn()?, root.to_path_buf())
    }

    /// The indexed file at a repo-relative (or library) path.
    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.read_conn()?;
        let record = conn
            .query_row(
                "SELECT id, path, name, origin, hash, package, wildcard_imports
                 FROM files WHERE path = ?1",
                params![path],
                file_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Path to content hash for every indexed file.
    pub fn list_file_hashes(&self) -> Result<HashMap<String, String>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare("SELECT path, hash FROM files")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = HashMap::new();
        for row in rows {
            let (path, hash) = row?;
            out.insert(path, hash);
        }
        Ok(out)
    }

    /// Source text stored at index time, if the file is indexed.
    pub fn file_content(&self, path: &str) -> Result<Option<String>> {
        let conn = self.read_conn()?;
        let content = conn
            .query_row(
                "SELECT content FROM files WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }

    /// Replace everything recorded for one file. Markers are dropped because
    /// they describe the previous content.
    pub fn replace_file(&self, file: &FileInput<'_>, extracted: &ExtractedFile) -> Result<FileCounts> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let wildcards = serde_json::to_string(&extracted.wildcard_imports())?;
        tx.execute(
            "INSERT INTO files(path, name, origin, hash, size, modified, package, wildcard_imports, content)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                origin = excluded.origin,
                hash = excluded.hash,
                size = excluded.size,
                modified = excluded.modified,
                package = excluded.package,
                wildcard_imports = excluded.wildcard_imports,
                content = excluded.content",
            params![
                file.path,
                util::file_name_of(file.path),
                file.origin.as_str(),
                file.hash,
                file.size,
                file.modified,
                extracted.package,
                wildcards,
                file.content,
            ],
        )?;
        let file_id: i64 = tx.query_row(
            "SELECT id FROM files WHERE path = ?1",
            params![file.path],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM members WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM declarations WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM refs WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM markers WHERE file_id = ?1", params![file_id])?;

        let mut decl_ids = Vec::with_capacity(extracted.declarations.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO declarations(file_id, qualname, name, kind, modifiers, package,
                    superclass, interfaces, annotations, outer, start_line, end_line,
                    start_byte, end_byte)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for decl in &extracted.declarations {
                let superclass = match &decl.superclass {
                    Some(ty) => Some(serde_json::to_string(ty)?),
                    None => None,
                };
                stmt.execute(params![
                    file_id,
                    decl.qualname,
                    decl.name,
                    decl.kind.as_str(),
                    serde_json::to_string(&decl.modifiers)?,
                    extracted.package,
                    superclass,
                    serde_json::to_string(&decl.interfaces)?,
                    serde_json::to_string(&decl.annotations)?,
                    decl.outer,
                    decl.start_line,
                    decl.end_line,
                    decl.start_byte,
                    decl.end_byte,
                ])?;
                decl_ids.push(tx.last_insert_rowid());
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO members(decl_id, file_id, kind, name, ty, modifiers, params, throws,
                    annotations, has_body, has_initializer, start_line, end_line, start_byte, end_byte)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for member in &extracted.members {
                let decl_id = decl_ids
                    .get(member.decl_index)
                    .copied()
                    .ok_or_else(|| anyhow!("member {} has no declaration", member.name))?;
                let ty = match &member.ty {
                    Some(ty) => Some(serde_json::to_string(ty)?),
                    None => None,
                };
                stmt.execute(params![
                    decl_id,
                    file_id,
                    member.kind.as_str(),
                    member.name,
                    ty,
                    serde_json::to_string(&member.modifiers)?,
                    serde_json::to_string(&member.params)?,
                    serde_json::to_string(&member.throws)?,
                    serde_json::to_string(&member.annotations)?,
                    member.has_body,
                    member.has_initializer,
                    member.start_line,
                    member.end_line,
                    member.start_byte,
                    member.end_byte,
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO refs(file_id, kind, name, arg_count, receiver, receiver_type,
                    receiver_chain, caller_class, line, start_byte, end_byte, call_text)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for reference in &extracted.references {
                let receiver_type = match &reference.receiver_type {
                    Some(ty) => Some(serde_json::to_string(ty)?),
                    None => None,
                };
                let receiver_chain = match &reference.receiver_chain {
                    Some(chain) => Some(serde_json::to_string(chain)?),
                    None => None,
                };
                stmt.execute(params![
                    file_id,
                    reference.kind.as_str(),
                    reference.name,
                    reference.arg_count,
                    reference.receiver.as_str(),
                    receiver_type,
                    receiver_chain,
                    reference.caller_class,
                    reference.line,
                    reference.start_byte,
                    reference.end_byte,
                    reference.call_text,
                ])?;
            }
        }
        tx.commit()?;

        Ok(FileCounts {
            declarations: extracted.declarations.len(),
            members: extracted.members.len(),
            references: extracted.references.len(),
        })
    }

    /// Drop a file and, through cascades, its declarations, members, refs
    /// and markers. Returns whether anything was removed.
    pub fn delete_file_by_path(&self, path: &str) -> Result<bool> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    /// Swap the diagnostic markers of an indexed file in one write
    /// transaction, so readers see either the old set or the new one.
    pub fn replace_markers(&self, path: &str, markers: &[Marker]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let Some(file_id) = tx
            .query_row(
                "SELECT id FROM files WHERE path = ?1",
                params![path],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
        else {
            bail!("no indexed file at {path}");
        };
        tx.execute("DELETE FROM markers WHERE file_id = ?1", params![file_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO markers(file_id, severity, line, start_byte, end_byte, message)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for marker in markers {
                stmt.execute(params![
                    file_id,
                    marker.severity.as_str(),
                    marker.line,
                    marker.start_byte,
                    marker.end_byte,
                    marker.message,
                ])?;
            }
        }
        tx.commit()?;
        Ok(markers.len())
    }

    /// Integer value stored under `key` in the meta table.
    pub fn get_meta_i64(&self, key: &str) -> Result<Option<i64>> {
        let conn = self.read_conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|raw| raw.parse().ok()))
    }

    pub fn set_meta_i64(&self, key: &str, value: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO meta(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value.to_string()],
        )?;
        Ok(())
    }
}

/// A consistent read window over the index. Committed when dropped.
pub struct ReadTxn {
    conn: PooledConnection<SqliteConnectionManager>,
    root: PathBuf,
}

impl ReadTxn {
    fn begin(conn: PooledConnection<SqliteConnectionManager>, root: PathBuf) -> Result<Self> {
        conn.execute_batch("BEGIN DEFERRED")
            .with_context(|| "begin read transaction")?;
        Ok(Self { conn, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of indexed files of the given origin.
    pub fn count_files(&self, origin: Origin) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM files WHERE origin = ?1",
            params![origin.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_declarations(&self, origin: Origin) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM declarations d JOIN files f ON f.id = d.file_id WHERE f.origin = ?1",
            params![origin.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Unix seconds of the last completed indexing run.
    pub fn last_indexed(&self) -> Result<Option<i64>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'last_indexed'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|raw| raw.parse().ok()))
    }

    /// Every declaration in scope, as name/package/kind/file rows.
    pub fn list_declarations(&self, scope: Scope) -> Result<Vec<DeclarationSummary>> {
        let decls = self.all_declarations(scope)?;
        Ok(decls
            .into_iter()
            .map(|decl| DeclarationSummary {
                name: decl.qualname,
                package: decl.package,
                kind: decl.kind,
                file: decl.unit.path,
            })
            .collect())
    }

    fn query_decls(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Declaration>> {
        let sql = format!("{DECL_SELECT} {filter}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, decl_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            let mut decl = row?;
            decl.unit.exists = util::to_abs_path(&self.root, &decl.unit.path).exists();
            out.push(decl);
        }
        Ok(out)
    }

    fn query_members(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<MemberRecord>> {
        let sql = format!("{MEMBER_SELECT} {filter}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, member_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn file_record(&self, path: &str) -> Result<Option<FileRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, path, name, origin, hash, package, wildcard_imports
                 FROM files WHERE path = ?1",
                params![path],
                file_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn qualname_exists(&self, qualname: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM declarations WHERE qualname = ?1 LIMIT 1",
                params![qualname],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Qualified name for a type written in a file with the given package and
    /// wildcard imports, when the extractor could not pin it down.
    fn resolve_type_in(
        &self,
        ty: &TypeRef,
        package: &str,
        wildcards: &[String],
    ) -> Result<Option<String>> {
        if let Some(resolved) = &ty.resolved {
            return Ok(Some(erase(resolved).to_string()));
        }
        let base = erase(&ty.text);
        if base.is_empty() || java::is_primitive(base) {
            return Ok(None);
        }
        if base.contains('.') && self.qualname_exists(base)? {
            return Ok(Some(base.to_string()));
        }
        let local = if package.is_empty() {
            base.to_string()
        } else {
            format!("{package}.{base}")
        };
        if self.qualname_exists(&local)? {
            return Ok(Some(local));
        }
        for wildcard in wildcards {
            let candidate = format!("{wildcard}.{base}");
            if self.qualname_exists(&candidate)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// The type itself plus every supertype reachable through the index.
    fn ancestors(
        &self,
        qualname: &str,
        cache: &mut HashMap<String, HashSet<String>>,
    ) -> Result<HashSet<String>> {
        if let Some(hit) = cache.get(qualname) {
            return Ok(hit.clone());
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([qualname.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let decls = self.query_decls("WHERE d.qualname = ?1", &[&current])?;
            for decl in decls {
                let wildcards = self
                    .file_record(&decl.unit.path)?
                    .map(|file| file.wildcard_imports)
                    .unwrap_or_default();
                let supers = decl.superclass.iter().chain(decl.interfaces.iter());
                for ty in supers {
                    if let Some(parent) = self.resolve_type_in(ty, &decl.package, &wildcards)? {
                        queue.push_back(parent);
                    }
                }
            }
        }
        cache.insert(qualname.to_string(), seen.clone());
        Ok(seen)
    }

    /// The class followed by its enclosing classes, innermost first.
    fn outer_chain(&self, qualname: &str) -> Result<Vec<String>> {
        let mut chain = vec![qualname.to_string()];
        let mut current = qualname.to_string();
        while let Some(outer) = self
            .conn
            .query_row(
                "SELECT outer FROM declarations WHERE qualname = ?1 LIMIT 1",
                params![current],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten()
        {
            if chain.contains(&outer) {
                break;
            }
            chain.push(outer.clone());
            current = outer;
        }
        Ok(chain)
    }

    /// Whether a candidate reference row targets `member`. Name and kind were
    /// already filtered by the query.
    fn ref_matches(
        &self,
        member: &MemberRecord,
        row: &RefRow,
        cache: &mut HashMap<String, HashSet<String>>,
    ) -> Result<SiteMatch> {
        if let Some(count) = row.arg_count {
            if !arity_matches(&member.params, count) {
                return Ok(SiteMatch::No);
            }
        }
        let owner = member.owner.as_str();
        if row.kind == RefKind::New {
            let created = match &row.receiver_type {
                Some(ty) => self.resolve_type_in(ty, &row.package, &row.wildcards)?,
                None => None,
            };
            return Ok(SiteMatch::when(created.as_deref() == Some(owner)));
        }
        match row.receiver {
            Receiver::Implicit | Receiver::This => {
                let Some(caller) = &row.caller_class else {
                    return Ok(SiteMatch::No);
                };
                let scopes = if row.receiver == Receiver::This {
                    vec![caller.clone()]
                } else {
                    self.outer_chain(caller)?
                };
                for scope in scopes {
                    if self.ancestors(&scope, cache)?.contains(owner) {
                        return Ok(SiteMatch::Resolved);
                    }
                }
                Ok(SiteMatch::No)
            }
            Receiver::Super => {
                let Some(caller) = &row.caller_class else {
                    return Ok(SiteMatch::No);
                };
                let ancestors = self.ancestors(caller, cache)?;
                Ok(SiteMatch::when(caller != owner && ancestors.contains(owner)))
            }
            Receiver::Type | Receiver::Expr => {
                let target = match (&row.receiver_type, &row.receiver_chain) {
                    (Some(ty), _) => {
                        match self.resolve_type_in(ty, &row.package, &row.wildcards)? {
                            Some(target) => target,
                            // a written type outside the index
                            None => return Ok(SiteMatch::No),
                        }
                    }
                    (None, Some(chain)) => match self.walk_chain(chain, row, cache)? {
                        Some(target) => erase(&target).to_string(),
                        None => return Ok(SiteMatch::Unresolved),
                    },
                    (None, None) => return Ok(SiteMatch::Unresolved),
                };
                if self.is_opaque(&target)? {
                    return Ok(SiteMatch::Unresolved);
                }
                Ok(SiteMatch::when(self.ancestors(&target, cache)?.contains(owner)))
            }
        }
    }

    /// A type variable or anything else that is neither qualified nor indexed.
    fn is_opaque(&self, qualname: &str) -> Result<bool> {
        Ok(!qualname.contains('.') && !self.qualname_exists(qualname)?)
    }

    /// Follow a receiver chain to the type of the final value, generics
    /// included. `None` when a step cannot be followed.
    fn walk_chain(
        &self,
        chain: &ReceiverChain,
        row: &RefRow,
        cache: &mut HashMap<String, HashSet<String>>,
    ) -> Result<Option<String>> {
        let mut steps = chain.steps.iter();
        let mut current = match &chain.root {
            ChainRoot::Typed(ty) => self.type_text_in(ty, &row.package, &row.wildcards)?,
            ChainRoot::This => row.caller_class.clone(),
            ChainRoot::Implicit => {
                let (Some(caller), Some(first)) = (&row.caller_class, steps.next()) else {
                    return Ok(None);
                };
                let mut found = None;
                for scope in self.outer_chain(caller)? {
                    found = self.step_type(&scope, first, cache)?;
                    if found.is_some() {
                        break;
                    }
                }
                found
            }
        };
        for step in steps {
            let Some(value) = current else {
                return Ok(None);
            };
            current = self.step_type(&value, step, cache)?;
        }
        Ok(current)
    }

    /// Type of `step` applied to a value of type `current`.
    fn step_type(
        &self,
        current: &str,
        step: &ChainStep,
        cache: &mut HashMap<String, HashSet<String>>,
    ) -> Result<Option<String>> {
        let args = type_args(current);
        if let ChainStep::LambdaParam { index, arity } = step {
            let arg = if args.len() == *arity {
                args.get(*index)
            } else if *arity == 1 {
                args.last()
            } else {
                None
            };
            return Ok(arg.and_then(|a| bound_of(a)).map(str::to_string));
        }
        let base = erase(current);
        if !self.qualname_exists(base)? {
            // Outside the index only element accessors of generic containers are known.
            return Ok(match step {
                ChainStep::Call { name, .. } if ELEMENT_ACCESSORS.contains(&name.as_str()) => {
                    args.last().and_then(|a| bound_of(a)).map(str::to_string)
                }
                _ => None,
            });
        }
        let mut owners: Vec<String> = self.ancestors(base, cache)?.into_iter().collect();
        owners.sort_by_key(|owner| (owner != base, owner.clone()));
        for owner in owners {
            if let Some(found) = self.member_type(&owner, step)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Declared type of a field, or return type of a method with a fitting
    /// arity, declared directly in `owner`.
    fn member_type(&self, owner: &str, step: &ChainStep) -> Result<Option<String>> {
        let (kind, name, args) = match step {
            ChainStep::Field { name } => (MemberKind::Field, name, None),
            ChainStep::Call { name, args } => (MemberKind::Method, name, Some(*args)),
            ChainStep::LambdaParam { .. } => return Ok(None),
        };
        let mut stmt = self.conn.prepare(
            "SELECT m.ty, m.params, f.package, f.wildcard_imports
             FROM members m
             JOIN declarations d ON d.id = m.decl_id
             JOIN files f ON f.id = m.file_id
             WHERE d.qualname = ?1 AND m.kind = ?2 AND m.name = ?3
             ORDER BY m.start_byte",
        )?;
        let rows = stmt.query_map(params![owner, kind.as_str(), name], |row| {
            Ok((
                opt_json_col::<TypeRef>(row, 0)?,
                json_col::<Vec<Param>>(row, 1)?,
                row.get::<_, String>(2)?,
                json_col::<Vec<String>>(row, 3)?,
            ))
        })?;
        for row in rows {
            let (ty, params, package, wildcards) = row?;
            if args.is_some_and(|count| !arity_matches(&params, count)) {
                continue;
            }
            if let Some(ty) = ty {
                return self.type_text_in(&ty, &package, &wildcards);
            }
        }
        Ok(None)
    }

    /// Canonical text of a written type, keeping its type arguments.
    fn type_text_in(&self, ty: &TypeRef, package: &str, wildcards: &[String]) -> Result<Option<String>> {
        if let Some(resolved) = &ty.resolved {
            return Ok(Some(resolved.clone()));
        }
        let Some(base) = self.resolve_type_in(ty, package, wildcards)? else {
            return Ok(None);
        };
        let args = ty.text.find('<').map(|at| &ty.text[at..]).unwrap_or("");
        Ok(Some(format!("{base}{args}")))
    }
}

impl Drop for ReadTxn {
    fn drop(&mut self) {
        if let Err(err) = self.conn.execute_batch("COMMIT") {
            debug!("closing read transaction: {err}");
        }
    }
}

impl SymbolIndex for ReadTxn {
    fn find_by_qualified_name(&self, qualname: &str, scope: Scope) -> Result<Option<Declaration>> {
        let filter = format!(
            "WHERE d.qualname = ?1 {} ORDER BY f.path LIMIT 1",
            scope_filter(scope)
        );
        Ok(self.query_decls(&filter, &[&qualname])?.into_iter().next())
    }

    fn find_by_simple_name(&self, name: &str, scope: Scope) -> Result<Vec<Declaration>> {
        let filter = format!(
            "WHERE d.name = ?1 {} ORDER BY d.qualname, f.path",
            scope_filter(scope)
        );
        self.query_decls(&filter, &[&name])
    }

    fn all_simple_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT name FROM declarations ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn find_source_units_by_filename(&self, file_name: &str) -> Result<Vec<SourceUnit>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, name FROM files WHERE name = ?1 ORDER BY path")?;
        let rows = stmt.query_map(params![file_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut units = Vec::new();
        for row in rows {
            let (path, name) = row?;
            let exists = util::to_abs_path(&self.root, &path).exists();
            units.push(SourceUnit { path, name, exists });
        }
        Ok(units)
    }

    fn declarations_in_unit(&self, unit: &SourceUnit) -> Result<Vec<Declaration>> {
        self.query_decls("WHERE f.path = ?1 ORDER BY d.start_byte", &[&unit.path])
    }

    fn members_of(&self, decl: &Declaration) -> Result<Vec<MemberRecord>> {
        self.query_members("WHERE m.decl_id = ?1 ORDER BY m.start_byte", &[&decl.id])
    }

    fn nested_types(&self, decl: &Declaration) -> Result<Vec<Declaration>> {
        self.query_decls(
            "WHERE d.outer = ?1 AND f.path = ?2 ORDER BY d.start_byte",
            &[&decl.qualname, &decl.unit.path],
        )
    }

    fn all_declarations(&self, scope: Scope) -> Result<Vec<Declaration>> {
        let filter = match scope {
            Scope::Project => "WHERE f.origin = 'project' ORDER BY d.qualname, f.path",
            Scope::All => "ORDER BY d.qualname, f.path",
        };
        self.query_decls(filter, &[])
    }
}

impl ReferenceSearch for ReadTxn {
    fn find_references(&self, member: &MemberRecord, scope: Scope) -> Result<Vec<ReferenceSite>> {
        let (name, kinds) = match member.kind {
            MemberKind::Field => return Ok(Vec::new()),
            MemberKind::Method => (member.name.clone(), "('call', 'method_ref')"),
            MemberKind::Constructor => (simple_name(&member.owner).to_string(), "('new')"),
        };
        let sql = format!(
            "SELECT r.id, r.kind, r.arg_count, r.receiver, r.receiver_type, r.caller_class,
                r.line, r.start_byte, r.end_byte, r.call_text,
                f.path, f.name, f.package, f.wildcard_imports, r.receiver_chain
             FROM refs r
             JOIN files f ON f.id = r.file_id
             WHERE r.name = ?1 AND r.kind IN {kinds} {}
             ORDER BY f.path, r.start_byte",
            scope_filter(scope)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![name], ref_from_row)?;
        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }

        let mut cache = HashMap::new();
        let mut sites = Vec::new();
        for mut row in candidates {
            match self.ref_matches(member, &row, &mut cache) {
                Ok(SiteMatch::No) => {}
                Ok(SiteMatch::Resolved) => sites.push(row.site),
                Ok(SiteMatch::Unresolved) => {
                    row.site.unresolved_receiver = true;
                    sites.push(row.site);
                }
                Err(err) => warn!(
                    path = %row.site.path,
                    line = row.site.line,
                    "skipping reference: {err:#}"
                ),
            }
        }
        Ok(sites)
    }

    fn enclosing_member(&self, site: &ReferenceSite) -> Result<Option<MemberRecord>> {
        let found = self.query_members(
            "WHERE f.path = ?1 AND m.kind IN ('method', 'constructor')
               AND m.start_byte <= ?2 AND m.end_byte >= ?3
             ORDER BY (m.end_byte - m.start_byte) ASC
             LIMIT 1",
            &[&site.path, &site.start_byte, &site.end_byte],
        )?;
        Ok(found.into_iter().next())
    }

    fn enclosing_declaration(&self, site: &ReferenceSite) -> Result<Option<Declaration>> {
        let found = self.query_decls(
            "WHERE f.path = ?1 AND d.start_byte <= ?2 AND d.end_byte >= ?3
             ORDER BY (d.end_byte - d.start_byte) ASC
             LIMIT 1",
            &[&site.path, &site.start_byte, &site.end_byte],
        )?;
        Ok(found.into_iter().next())
    }
}

impl TypeResolver for ReadTxn {
    fn canonical_text(&self, ty: &TypeRef) -> Result<String> {
        if let Some(resolved) = &ty.resolved {
            return Ok(resolved.clone());
        }
        if java::is_primitive(&ty.text) {
            return Ok(ty.text.clone());
        }
        bail!("cannot resolve type '{}'", ty.text)
    }

    fn presentable_text(&self, ty: &TypeRef) -> Result<String> {
        let text = ty.text.trim();
        if text.is_empty() {
            bail!("empty type text");
        }
        Ok(util::presentable_type(text))
    }
}

impl SourceText for ReadTxn {
    fn unit_text(&self, unit: &SourceUnit) -> Result<String> {
        let content: Option<String> = self
            .conn
            .query_row(
                "SELECT content FROM files WHERE path = ?1",
                params![unit.path],
                |row| row.get(0),
            )
            .optional()?;
        content.ok_or_else(|| anyhow!("{} is not indexed", unit.path))
    }

    fn markers(&self, unit: &SourceUnit) -> Result<Vec<Marker>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.severity, m.line, m.start_byte, m.end_byte, m.message
             FROM markers m
             JOIN files f ON f.id = m.file_id
             WHERE f.path = ?1
             ORDER BY m.line, m.start_byte, m.id",
        )?;
        let rows = stmt.query_map(params![unit.path], marker_from_row)?;
        let mut markers = Vec::new();
        for row in rows {
            markers.push(row?);
        }
        Ok(markers)
    }

    fn parse_errors(&self, unit: &SourceUnit) -> Result<Vec<Marker>> {
        let text = self.unit_text(unit)?;
        java::syntax_errors(&text)
    }
}

/// Outcome of checking one candidate reference against a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiteMatch {
    No,
    Resolved,
    /// Name and arity fit but the receiver's type is unknown.
    Unresolved,
}

impl SiteMatch {
    fn when(matched: bool) -> Self {
        if matched { SiteMatch::Resolved } else { SiteMatch::No }
    }
}

/// Methods of generic containers outside the index whose result is the
/// element type, taken as the last type argument.
const ELEMENT_ACCESSORS: &[&str] = &[
    "get", "getFirst", "getLast", "first", "last", "next", "previous", "peek", "peekFirst",
    "peekLast", "poll", "pollFirst", "pollLast", "pop", "remove", "removeFirst", "removeLast",
    "element", "take", "orElse", "orElseGet", "orElseThrow", "getValue", "join",
];

struct RefRow {
    kind: RefKind,
    arg_count: Option<i64>,
    receiver: Receiver,
    receiver_type: Option<TypeRef>,
    receiver_chain: Option<ReceiverChain>,
    caller_class: Option<String>,
    package: String,
    wildcards: Vec<String>,
    site: ReferenceSite,
}

fn scope_filter(scope: Scope) -> &'static str {
    match scope {
        Scope::Project => "AND f.origin = 'project'",
        Scope::All => "",
    }
}

fn arity_matches(params: &[Param], count: i64) -> bool {
    let declared = params.len() as i64;
    let varargs = params.last().is_some_and(|p| p.varargs);
    count == declared || (varargs && count >= declared - 1)
}

/// Strip type arguments and array brackets.
fn erase(text: &str) -> &str {
    let end = text.find(['<', '[']).unwrap_or(text.len());
    text[..end].trim()
}

/// Top-level type arguments: `Map<K,List<V>>` gives `["K", "List<V>"]`.
fn type_args(text: &str) -> Vec<&str> {
    let (Some(open), Some(close)) = (text.find('<'), text.rfind('>')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    let inner = &text[open + 1..close];
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (at, ch) in inner.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(inner[start..at].trim());
                start = at + 1;
            }
            _ => {}
        }
    }
    args.push(inner[start..].trim());
    args.retain(|arg| !arg.is_empty());
    args
}

/// The type a wildcard argument stands for; `None` for a bare `?`.
fn bound_of(arg: &str) -> Option<&str> {
    let arg = arg.trim();
    let bound = arg
        .strip_prefix("? extends ")
        .or_else(|| arg.strip_prefix("? super "))
        .unwrap_or(arg)
        .trim();
    (bound != "?" && !bound.is_empty()).then_some(bound)
}

fn simple_name(qualname: &str) -> &str {
    qualname.rsplit('.').next().unwrap_or(qualname)
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
        }),
        None => Ok(None),
    }
}

fn enum_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{raw}'").into(),
        )
    })
}

fn parse_origin(raw: &str) -> Option<Origin> {
    match raw {
        "project" => Some(Origin::Project),
        "library" => Some(Origin::Library),
        _ => None,
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        origin: enum_col(row, 3, parse_origin)?,
        hash: row.get(4)?,
        package: row.get(5)?,
        wildcard_imports: json_col(row, 6)?,
    })
}

fn decl_from_row(row: &Row<'_>) -> rusqlite::Result<Declaration> {
    Ok(Declaration {
        id: row.get(0)?,
        qualname: row.get(1)?,
        name: row.get(2)?,
        kind: enum_col(row, 3, DeclKind::parse)?,
        modifiers: json_col(row, 4)?,
        package: row.get(5)?,
        superclass: opt_json_col(row, 6)?,
        interfaces: json_col(row, 7)?,
        annotations: json_col(row, 8)?,
        outer: row.get(9)?,
        start_line: row.get(10)?,
        end_line: row.get(11)?,
        unit: SourceUnit {
            path: row.get(12)?,
            name: row.get(13)?,
            exists: false,
        },
        origin: enum_col(row, 14, parse_origin)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRecord> {
    Ok(MemberRecord {
        id: row.get(0)?,
        kind: enum_col(row, 1, MemberKind::parse)?,
        name: row.get(2)?,
        owner: row.get(3)?,
        ty: opt_json_col(row, 4)?,
        modifiers: json_col(row, 5)?,
        params: json_col(row, 6)?,
        throws: json_col(row, 7)?,
        annotations: json_col(row, 8)?,
        has_body: row.get(9)?,
        has_initializer: row.get(10)?,
        file_name: row.get(11)?,
        start_line: row.get(12)?,
        end_line: row.get(13)?,
    })
}

fn marker_from_row(row: &Row<'_>) -> rusqlite::Result<Marker> {
    Ok(Marker {
        severity: enum_col(row, 0, Severity::parse)?,
        line: row.get(1)?,
        start_byte: row.get(2)?,
        end_byte: row.get(3)?,
        message: row.get(4)?,
    })
}

fn ref_from_row(row: &Row<'_>) -> rusqlite::Result<RefRow> {
    let kind = enum_col(row, 1, RefKind::parse)?;
    Ok(RefRow {
        kind,
        arg_count: row.get(2)?,
        receiver: enum_col(row, 3, Receiver::parse)?,
        receiver_type: opt_json_col(row, 4)?,
        receiver_chain: opt_json_col(row, 14)?,
        caller_class: row.get(5)?,
        package: row.get(12)?,
        wildcards: json_col(row, 13)?,
        site: ReferenceSite {
            id: row.get(0)?,
            kind,
            line: row.get(6)?,
            start_byte: row.get(7)?,
            end_byte: row.get(8)?,
            call_text: row.get(9)?,
            path: row.get(10)?,
            file_name: row.get(11)?,
            unresolved_receiver: false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TypeRef;

    fn param(varargs: bool) -> Param {
        Param {
            name: "p".to_string(),
            ty: TypeRef::new("int", Some("int".to_string())),
            varargs,
        }
    }

    #[test]
    fn arity_accounts_for_varargs() {
        assert!(arity_matches(&[], 0));
        assert!(!arity_matches(&[param(false)], 0));
        assert!(arity_matches(&[param(false), param(true)], 1));
        assert!(arity_matches(&[param(false), param(true)], 4));
        assert!(!arity_matches(&[param(false), param(false)], 3));
    }

    fn marker(line: i64, message: &str) -> Marker {
        Marker {
            severity: Severity::Error,
            line,
            start_byte: 0,
            end_byte: 1,
            message: message.to_string(),
        }
    }

    #[test]
    fn read_transaction_sees_one_marker_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::new(&dir.path().join("index.sqlite")).unwrap();
        index_source(&db, "A.java", "package com.acme;\nclass A { void f() {} }\n");
        db.replace_markers("A.java", &[marker(2, "first")]).unwrap();

        let unit = SourceUnit {
            path: "A.java".to_string(),
            name: "A.java".to_string(),
            exists: true,
        };
        let txn = db.begin_read(dir.path()).unwrap();
        assert_eq!(txn.markers(&unit).unwrap(), vec![marker(2, "first")]);

        db.replace_markers("A.java", &[marker(3, "later"), marker(1, "earlier")])
            .unwrap();
        assert_eq!(txn.markers(&unit).unwrap(), vec![marker(2, "first")]);
        drop(txn);

        let txn = db.begin_read(dir.path()).unwrap();
        assert_eq!(
            txn.markers(&unit).unwrap(),
            vec![marker(1, "earlier"), marker(3, "later")]
        );
    }

    fn index_source(db: &Db, path: &str, source: &str) {
        let extracted = java::JavaExtractor::new().unwrap().extract(source).unwrap();
        let file = FileInput {
            path,
            origin: Origin::Project,
            hash: path,
            size: source.len() as i64,
            modified: 0,
            content: source,
        };
        db.replace_file(&file, &extracted).unwrap();
    }

    #[test]
    fn unreadable_candidate_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::new(&dir.path().join("index.sqlite")).unwrap();
        index_source(&db, "W.java", "package p;\npublic class W {\n    void reset() {}\n}\n");
        index_source(
            &db,
            "B.java",
            "package p;\nclass B extends W {\n    void f() {\n        reset();\n    }\n}\n",
        );
        index_source(
            &db,
            "C.java",
            "package p;\nclass C {\n    void g() {\n        W w = new W();\n        w.reset();\n    }\n}\n",
        );
        db.conn()
            .execute(
                "UPDATE declarations SET superclass = 'not json' WHERE qualname = 'p.B'",
                [],
            )
            .unwrap();

        let txn = db.begin_read(dir.path()).unwrap();
        let w = txn
            .find_by_qualified_name("p.W", Scope::Project)
            .unwrap()
            .unwrap();
        let reset = txn
            .members_of(&w)
            .unwrap()
            .into_iter()
            .find(|m| m.name == "reset")
            .unwrap();
        let sites = txn.find_references(&reset, Scope::Project).unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].file_name, "C.java");
        assert_eq!(sites[0].line, 5);
        assert!(!sites[0].unresolved_receiver);
    }

    #[test]
    fn type_args_split_at_the_top_level() {
        assert_eq!(
            type_args("java.util.Map<java.lang.String,java.util.List<com.p.Widget>>"),
            vec!["java.lang.String", "java.util.List<com.p.Widget>"]
        );
        assert_eq!(type_args("java.util.List<? extends com.p.Widget>"), vec!["? extends com.p.Widget"]);
        assert!(type_args("com.p.Widget").is_empty());
        assert_eq!(bound_of("? extends com.p.Widget"), Some("com.p.Widget"));
        assert_eq!(bound_of("?"), None);
    }

    #[test]
    fn erase_strips_generics_and_arrays() {
        assert_eq!(erase("java.util.List<java.lang.String>"), "java.util.List");
        assert_eq!(erase("Widget[]"), "Widget");
        assert_eq!(erase("int"), "int");
    }
}
