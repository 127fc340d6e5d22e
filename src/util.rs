use crate::model::ContextLine;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const MESSAGE_LIMIT: usize = 200;
pub const CONTEXT_RADIUS: i64 = 3;

const MESSAGE_PREFIXES: &[&str] = &["Error:", "错误:", "错误："];

pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

pub fn normalize_rel_path(repo_root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(repo_root).with_context(|| {
        format!(
            "strip prefix {} from {}",
            repo_root.display(),
            path.display()
        )
    })?;
    Ok(normalize_path(rel))
}

pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    let mut absolute = false;
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::RootDir => absolute = true,
            Component::CurDir | Component::Prefix(_) => {}
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

pub fn file_name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Resolve a stored unit path against the project root. Library paths are
/// stored absolute and come back unchanged.
pub fn to_abs_path(repo_root: &Path, path: &str) -> PathBuf {
    repo_root.join(path)
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    Ok(())
}

pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Strip localized error prefixes and bound the length.
pub fn clean_message(raw: &str) -> String {
    let mut message = raw.trim();
    for prefix in MESSAGE_PREFIXES {
        if let Some(rest) = message.strip_prefix(prefix) {
            message = rest.trim_start();
            break;
        }
    }
    truncate_chars(message, MESSAGE_LIMIT)
}

/// Lines `line - radius ..= line + radius`, clamped to the document.
pub fn context_window(content: &str, line: i64, radius: i64) -> Vec<ContextLine> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || line < 1 {
        return Vec::new();
    }
    let total = lines.len() as i64;
    let start = (line - radius).max(1);
    let end = (line + radius).min(total);
    (start..=end)
        .map(|n| ContextLine {
            line: n,
            text: lines[(n - 1) as usize].to_string(),
            marked: n == line,
        })
        .collect()
}

pub fn line_of_byte(content: &str, byte: usize) -> i64 {
    let end = byte.min(content.len());
    content.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() as i64 + 1
}

/// Drop package qualifiers from every dotted name in a type rendering.
pub fn presentable_type(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut segment = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == '$' {
            segment.push(ch);
        } else if ch == '.' && !segment.is_empty() {
            segment.clear();
        } else {
            out.push_str(&segment);
            segment.clear();
            out.push(ch);
        }
    }
    out.push_str(&segment);
    out
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
