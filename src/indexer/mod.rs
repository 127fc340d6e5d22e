use crate::db::{Db, FileCounts, FileInput};
use crate::model::{IndexStats, Marker, Origin};
use anyhow::{Result, anyhow};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub mod extract;
pub mod java;
pub mod scan;

const MAX_FILE_SIZE_MB: u64 = 10;

#[derive(Debug, Default)]
pub struct SyncStats {
    pub indexed: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub declarations: usize,
    pub references: usize,
}

pub struct Indexer {
    repo_root: PathBuf,
    library_roots: Vec<PathBuf>,
    db: Arc<Db>,
    scan_options: scan::ScanOptions,
    extractor: java::JavaExtractor,
}

impl Indexer {
    pub fn new(repo_root: PathBuf, db_path: PathBuf) -> Result<Self> {
        Self::new_with_options(repo_root, db_path, scan::ScanOptions::default(), Vec::new())
    }

    pub fn new_with_options(
        repo_root: PathBuf,
        db_path: PathBuf,
        scan_options: scan::ScanOptions,
        library_roots: Vec<PathBuf>,
    ) -> Result<Self> {
        let db = Arc::new(Db::new(&db_path)?);
        Self::with_db(repo_root, db, scan_options, library_roots)
    }

    pub fn with_db(
        repo_root: PathBuf,
        db: Arc<Db>,
        scan_options: scan::ScanOptions,
        library_roots: Vec<PathBuf>,
    ) -> Result<Self> {
        let repo_root = std::fs::canonicalize(&repo_root).unwrap_or(repo_root);
        let library_roots = library_roots
            .into_iter()
            .map(|root| std::fs::canonicalize(&root).unwrap_or(root))
            .collect();
        Ok(Self {
            repo_root,
            library_roots,
            db,
            scan_options,
            extractor: java::JavaExtractor::new()?,
        })
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn library_roots(&self) -> &[PathBuf] {
        &self.library_roots
    }

    pub fn reindex(&mut self) -> Result<IndexStats> {
        let started = Instant::now();
        let mut scanned = scan::scan_repo_with_options(&self.repo_root, self.scan_options)?;
        for root in &self.library_roots {
            match scan::scan_library_root(root, self.scan_options) {
                Ok(files) => scanned.extend(files),
                Err(err) => warn!(root = %root.display(), "skip library root: {err:#}"),
            }
        }
        let existing = self.db.list_file_hashes()?;

        let mut seen = HashSet::new();
        let mut stats = IndexStats {
            scanned: scanned.len(),
            ..IndexStats::default()
        };
        for file in &scanned {
            seen.insert(file.stored_path.clone());
            if existing.get(&file.stored_path) == Some(&file.hash) {
                stats.skipped += 1;
                continue;
            }
            match self.index_scanned_file(file) {
                Ok(counts) => {
                    stats.indexed += 1;
                    stats.declarations += counts.declarations;
                    stats.members += counts.members;
                    stats.references += counts.references;
                }
                Err(err) => {
                    warn!(path = %file.stored_path, "index error: {err:#}");
                    stats.errors += 1;
                }
            }
        }

        for path in existing.keys() {
            if !seen.contains(path) {
                self.db.delete_file_by_path(path)?;
                stats.deleted += 1;
            }
        }

        self.db.set_meta_i64("last_indexed", crate::util::unix_now())?;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            scanned = stats.scanned,
            indexed = stats.indexed,
            skipped = stats.skipped,
            deleted = stats.deleted,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            "reindex complete"
        );
        Ok(stats)
    }

    pub fn sync_abs_paths(&mut self, paths: &[PathBuf]) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let mut touched = false;
        for path in paths {
            let Some((stored_path, _)) = scan::locate(&self.repo_root, &self.library_roots, path)
            else {
                continue;
            };
            if !path.exists() {
                if self.db.delete_file_by_path(&stored_path)? {
                    stats.deleted += 1;
                    touched = true;
                }
                continue;
            }
            let Some(scanned) = scan::scan_path(&self.repo_root, &self.library_roots, path)? else {
                continue;
            };
            if let Some(existing) = self.db.get_file_by_path(&scanned.stored_path)? {
                if existing.hash == scanned.hash {
                    stats.skipped += 1;
                    continue;
                }
            }
            match self.index_scanned_file(&scanned) {
                Ok(counts) => {
                    stats.indexed += 1;
                    stats.declarations += counts.declarations;
                    stats.references += counts.references;
                    touched = true;
                }
                Err(err) => {
                    warn!(path = %scanned.stored_path, "index error: {err:#}");
                    stats.errors += 1;
                }
            }
        }
        if touched {
            self.db.set_meta_i64("last_indexed", crate::util::unix_now())?;
        }
        Ok(stats)
    }

    /// Index an in-memory buffer in place of the file's on-disk content.
    pub fn index_text(&mut self, stored_path: &str, text: &str) -> Result<FileCounts> {
        let origin = self
            .db
            .get_file_by_path(stored_path)?
            .map(|record| record.origin)
            .unwrap_or(Origin::Project);
        let extracted = self.extractor.extract(text)?;
        let hash = scan::hash_bytes(text.as_bytes());
        let input = FileInput {
            path: stored_path,
            origin,
            hash: &hash,
            size: text.len() as i64,
            modified: crate::util::unix_now(),
            content: text,
        };
        let counts = self.db.replace_file(&input, &extracted)?;
        debug!(path = stored_path, "indexed edit buffer");
        Ok(counts)
    }

    /// Run the built-in analysis over the stored content and record its markers.
    pub fn analyze_path(&mut self, stored_path: &str) -> Result<Vec<Marker>> {
        let content = self
            .db
            .file_content(stored_path)?
            .ok_or_else(|| anyhow!("{stored_path} is not indexed"))?;
        let markers = self.extractor.analyze(&content)?;
        self.db.replace_markers(stored_path, &markers)?;
        debug!(path = stored_path, markers = markers.len(), "analysis complete");
        Ok(markers)
    }

    fn index_scanned_file(&mut self, file: &scan::ScannedFile) -> Result<FileCounts> {
        if file.size as u64 > MAX_FILE_SIZE_MB * 1024 * 1024 {
            warn!(
                path = %file.stored_path,
                size_mb = file.size as u64 / (1024 * 1024),
                "skipping large file"
            );
            return Ok(FileCounts::default());
        }
        let source = crate::util::read_to_string(&file.abs_path)?;
        let extracted = self
            .extractor
            .extract(&source)
            .map_err(|err| anyhow!("extract error {}: {err}", file.stored_path))?;
        let input = FileInput {
            path: &file.stored_path,
            origin: file.origin,
            hash: &file.hash,
            size: file.size,
            modified: file.modified,
            content: &source,
        };
        self.db.replace_file(&input, &extracted)
    }
}
