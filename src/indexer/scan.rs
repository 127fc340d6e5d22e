use crate::model::Origin;
use anyhow::{Context, Result};
use blake3::Hasher;
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const SOURCE_EXTENSIONS: &[&str] = &["java"];

#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Repo-relative for project files, absolute for library roots.
    pub stored_path: String,
    pub abs_path: PathBuf,
    pub hash: String,
    pub size: i64,
    pub modified: i64,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub no_ignore: bool,
}

impl ScanOptions {
    pub fn new(no_ignore: bool) -> Self {
        Self { no_ignore }
    }
}

pub fn scan_repo(repo_root: &Path) -> Result<Vec<ScannedFile>> {
    scan_repo_with_options(repo_root, ScanOptions::default())
}

pub fn scan_repo_with_options(repo_root: &Path, options: ScanOptions) -> Result<Vec<ScannedFile>> {
    walk(repo_root, options, Origin::Project)
}

/// Dependency sources are indexed under their absolute paths.
pub fn scan_library_root(root: &Path, options: ScanOptions) -> Result<Vec<ScannedFile>> {
    walk(root, options, Origin::Library)
}

fn walk(root: &Path, options: ScanOptions, origin: Origin) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let mut builder = WalkBuilder::new(root);
    if options.no_ignore {
        builder
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false);
    } else {
        builder
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);
    }
    let walker = builder
        .hidden(false)
        .filter_entry(|entry| !is_ignored_entry(entry))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                warn!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if !is_source_file(path) {
            continue;
        }
        let stored_path = stored_path_for(root, path, origin)?;
        files.push(describe(path, stored_path, origin)?);
    }
    files.sort_by(|a, b| a.stored_path.cmp(&b.stored_path));
    Ok(files)
}

fn is_ignored_entry(entry: &ignore::DirEntry) -> bool {
    match entry.file_name() {
        name if name == OsStr::new(".codeprobe") => true,
        name if name == OsStr::new(".git") => true,
        _ => false,
    }
}

fn stored_path_for(root: &Path, path: &Path, origin: Origin) -> Result<String> {
    match origin {
        Origin::Project => crate::util::normalize_rel_path(root, path),
        Origin::Library => Ok(crate::util::normalize_path(path)),
    }
}

fn describe(path: &Path, stored_path: String, origin: Origin) -> Result<ScannedFile> {
    let metadata = fs::metadata(path)?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let size = metadata.len() as i64;
    let hash = hash_file(path).with_context(|| format!("hash {}", path.display()))?;
    Ok(ScannedFile {
        stored_path,
        abs_path: path.to_path_buf(),
        hash,
        size,
        modified,
        origin,
    })
}

/// Describe one changed path. Paths outside the project and library roots
/// are ignored.
pub fn scan_path(
    repo_root: &Path,
    library_roots: &[PathBuf],
    path: &Path,
) -> Result<Option<ScannedFile>> {
    if !path.is_file() || !is_source_file(path) {
        return Ok(None);
    }
    let Some((stored_path, origin)) = locate(repo_root, library_roots, path) else {
        return Ok(None);
    };
    Ok(Some(describe(path, stored_path, origin)?))
}

/// Stored path and origin for an absolute path, when it belongs to a known root.
pub fn locate(repo_root: &Path, library_roots: &[PathBuf], path: &Path) -> Option<(String, Origin)> {
    for root in library_roots {
        if path.starts_with(root) {
            return Some((crate::util::normalize_path(path), Origin::Library));
        }
    }
    crate::util::normalize_rel_path(repo_root, path)
        .ok()
        .map(|rel| (rel, Origin::Project))
}

pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize().to_hex().to_string()
}

fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path)?;
    Ok(hash_bytes(&data))
}
