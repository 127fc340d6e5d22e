//! Filesystem watching for the serve loop.
//!
//! Changed Java sources are collected into a batch that is forwarded to the
//! engine as [`Command::Sync`] once no change has arrived for the debounce
//! window. Overflowing batches, watcher rescans and watcher failures all turn
//! into a single [`Command::Rescan`]. Without a working watcher the loop
//! falls back to periodic rescans.

use crate::engine::Command;
use crate::indexer::scan;
use anyhow::Result;
use clap::ValueEnum;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::{Match, WalkBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_FALLBACK_SCAN_SECS: u64 = 300;
const DEFAULT_MAX_BATCH: usize = 1000;
const STARTUP_WAIT: Duration = Duration::from_secs(2);
const POLL_IDLE: Duration = Duration::from_millis(200);
const INTERNAL_DIRS: &[&str] = &[".git", ".codeprobe"];

#[derive(ValueEnum, Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchMode {
    /// Never watch.
    Off,
    /// Watch, falling back to periodic rescans when the platform watcher fails.
    Auto,
    /// Watch or fail to start.
    On,
}

#[derive(Clone, Copy, Debug)]
pub struct WatchConfig {
    pub mode: WatchMode,
    pub debounce: Duration,
    pub fallback_scan: Duration,
    /// Batches at least this large become a full rescan.
    pub max_batch: usize,
    pub no_ignore: bool,
}

impl WatchConfig {
    pub fn new(mode: WatchMode, debounce_ms: u64, no_ignore: bool) -> Self {
        Self {
            mode,
            debounce: Duration::from_millis(debounce_ms.max(1)),
            no_ignore,
            ..Self::default()
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            fallback_scan: Duration::from_secs(DEFAULT_FALLBACK_SCAN_SECS),
            max_batch: DEFAULT_MAX_BATCH,
            no_ignore: false,
        }
    }
}

/// Stops the watch thread when dropped.
pub struct WatchHandle {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}

/// Watch `repo_root` and feed changes to the engine through `sink`.
/// Returns `Ok(None)` when watching is off.
pub fn start(
    repo_root: PathBuf,
    config: WatchConfig,
    sink: Sender<Command>,
) -> Result<Option<WatchHandle>> {
    if config.mode == WatchMode::Off {
        return Ok(None);
    }
    let (ready_tx, ready_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();
    let thread = thread::Builder::new()
        .name("codeprobe-watch".to_string())
        .spawn(move || {
            if let Err(err) = run(repo_root, config, sink, stop_rx, ready_tx) {
                warn!("watcher stopped: {err:#}");
            }
        })?;
    match ready_rx.recv_timeout(STARTUP_WAIT) {
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) | Err(_) => Ok(Some(WatchHandle {
            stop: stop_tx,
            thread: Some(thread),
        })),
    }
}

/// Where change notifications come from.
enum Source {
    Events {
        _watcher: RecommendedWatcher,
        rx: Receiver<notify::Result<Event>>,
    },
    Polling {
        last_scan: Instant,
    },
}

fn run(
    repo_root: PathBuf,
    config: WatchConfig,
    sink: Sender<Command>,
    stop: Receiver<()>,
    ready: Sender<Result<()>>,
) -> Result<()> {
    let repo_root = std::fs::canonicalize(&repo_root).unwrap_or(repo_root);
    let rules = IgnoreRules::load(&repo_root, config.no_ignore);
    let mut source = match open_watcher(&repo_root) {
        Ok(source) => source,
        Err(err) if config.mode == WatchMode::On => {
            let _ = ready.send(Err(err));
            return Ok(());
        }
        Err(err) => {
            warn!("file watching unavailable, rescanning periodically: {err:#}");
            polling()
        }
    };
    let _ = ready.send(Ok(()));
    info!(root = %repo_root.display(), "watching for source changes");

    let mut batch = Batch::new(config.max_batch);
    loop {
        if !matches!(stop.try_recv(), Err(mpsc::TryRecvError::Empty)) {
            return Ok(());
        }
        let mut lost_watcher = false;
        match &mut source {
            Source::Events { rx, .. } => match rx.recv_timeout(config.debounce) {
                Ok(Ok(event)) => {
                    if event.need_rescan() {
                        batch.overflow();
                    } else if !matches!(event.kind, EventKind::Access(_)) {
                        for path in event.paths {
                            if scan::is_source_file(&path) && !rules.ignores(&path) {
                                batch.add(path);
                            }
                        }
                    }
                }
                Ok(Err(err)) if falls_back(&err, config.mode) => {
                    warn!("watcher failed, switching to periodic rescans: {err}");
                    lost_watcher = true;
                }
                Ok(Err(err)) => warn!("watch error: {err}"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => lost_watcher = true,
            },
            Source::Polling { last_scan } => {
                if last_scan.elapsed() >= config.fallback_scan {
                    *last_scan = Instant::now();
                    batch.overflow();
                } else {
                    thread::sleep(POLL_IDLE);
                }
            }
        }
        if lost_watcher {
            source = polling();
            batch.overflow();
        }
        if let Some(command) = batch.due(config.debounce) {
            debug!(?command, "forwarding source changes");
            if sink.send(command).is_err() {
                return Ok(());
            }
        }
    }
}

fn open_watcher(repo_root: &Path) -> Result<Source> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(repo_root, RecursiveMode::Recursive)?;
    Ok(Source::Events {
        _watcher: watcher,
        rx,
    })
}

fn polling() -> Source {
    Source::Polling {
        last_scan: Instant::now(),
    }
}

fn falls_back(err: &notify::Error, mode: WatchMode) -> bool {
    mode == WatchMode::Auto
        && matches!(
            err.kind,
            notify::ErrorKind::MaxFilesWatch
                | notify::ErrorKind::WatchNotFound
                | notify::ErrorKind::PathNotFound
        )
}

/// Pending changes between flushes.
#[derive(Debug)]
struct Batch {
    paths: BTreeSet<PathBuf>,
    last_change: Option<Instant>,
    rescan: bool,
    max: usize,
}

impl Batch {
    fn new(max: usize) -> Self {
        Self {
            paths: BTreeSet::new(),
            last_change: None,
            rescan: false,
            max: max.max(1),
        }
    }

    fn add(&mut self, path: PathBuf) {
        if self.rescan {
            return;
        }
        self.paths.insert(path);
        self.last_change = Some(Instant::now());
        if self.paths.len() >= self.max {
            self.overflow();
        }
    }

    /// Drop the individual paths in favor of one full rescan.
    fn overflow(&mut self) {
        self.paths.clear();
        self.rescan = true;
    }

    /// The command to send now, if any. Rescans go out immediately; path
    /// batches wait until `quiet` has passed since the last change.
    fn due(&mut self, quiet: Duration) -> Option<Command> {
        if self.rescan {
            self.rescan = false;
            self.last_change = None;
            return Some(Command::Rescan);
        }
        let settled = self.last_change.is_some_and(|at| at.elapsed() >= quiet);
        if !settled || self.paths.is_empty() {
            return None;
        }
        self.last_change = None;
        Some(Command::Sync(std::mem::take(&mut self.paths).into_iter().collect()))
    }
}

/// `.gitignore` rules found under the root at startup, plus `.git/info/exclude`.
struct IgnoreRules {
    root: PathBuf,
    /// Shallowest first, so deeper files override.
    matchers: Vec<Gitignore>,
    enabled: bool,
}

impl IgnoreRules {
    fn load(root: &Path, no_ignore: bool) -> Self {
        let mut rules = Self {
            root: root.to_path_buf(),
            matchers: Vec::new(),
            enabled: !no_ignore,
        };
        if no_ignore {
            return rules;
        }
        let mut files = vec![(root.to_path_buf(), root.join(".git").join("info").join("exclude"))];
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .require_git(false)
            .filter_entry(|entry| !is_internal(entry.file_name()))
            .build();
        for entry in walker.flatten() {
            if entry.file_name() == ".gitignore" {
                if let Some(dir) = entry.path().parent() {
                    files.push((dir.to_path_buf(), entry.path().to_path_buf()));
                }
            }
        }
        files.sort_by_key(|(dir, _)| dir.components().count());
        for (dir, file) in files {
            if let Some(matcher) = build_matcher(&dir, &file) {
                rules.matchers.push(matcher);
            }
        }
        debug!(files = rules.matchers.len(), "loaded ignore rules");
        rules
    }

    fn ignores(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return true;
        };
        if rel.components().any(|c| is_internal(c.as_os_str())) {
            return true;
        }
        if !self.enabled {
            return false;
        }
        let is_dir = path.is_dir();
        let mut ignored = false;
        for matcher in self.matchers.iter().filter(|m| path.starts_with(m.path())) {
            match matcher.matched_path_or_any_parents(path, is_dir) {
                Match::Ignore(_) => ignored = true,
                Match::Whitelist(_) => ignored = false,
                Match::None => {}
            }
        }
        ignored
    }
}

fn is_internal(name: &std::ffi::OsStr) -> bool {
    INTERNAL_DIRS.iter().any(|dir| name == *dir)
}

fn build_matcher(dir: &Path, file: &Path) -> Option<Gitignore> {
    if !file.is_file() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(dir);
    if let Some(err) = builder.add(file) {
        warn!(file = %file.display(), "ignore file parse error: {err}");
    }
    match builder.build() {
        Ok(matcher) => Some(matcher),
        Err(err) => {
            warn!(file = %file.display(), "ignore file build error: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_skip_gitignored_and_internal_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::write(root.join(".gitignore"), "generated/\n").unwrap();
        std::fs::create_dir_all(root.join("generated")).unwrap();
        std::fs::create_dir_all(root.join("src").join("keep")).unwrap();
        std::fs::write(root.join("src").join(".gitignore"), "*.java\n!keep/\n").unwrap();

        let rules = IgnoreRules::load(&root, false);
        assert!(rules.ignores(&root.join("generated").join("A.java")));
        assert!(rules.ignores(&root.join(".codeprobe").join("index.sqlite")));
        assert!(rules.ignores(&root.join("src").join("A.java")));
        assert!(!rules.ignores(&root.join("Main.java")));
        assert!(rules.ignores(Path::new("/elsewhere/A.java")));

        let open = IgnoreRules::load(&root, true);
        assert!(!open.ignores(&root.join("generated").join("A.java")));
        assert!(open.ignores(&root.join(".git").join("HEAD")));
    }

    #[test]
    fn batch_waits_for_quiet_before_syncing() {
        let mut batch = Batch::new(10);
        assert!(batch.due(Duration::ZERO).is_none());
        batch.add(PathBuf::from("/r/B.java"));
        batch.add(PathBuf::from("/r/A.java"));
        batch.add(PathBuf::from("/r/A.java"));
        assert!(batch.due(Duration::from_secs(60)).is_none());
        match batch.due(Duration::ZERO) {
            Some(Command::Sync(paths)) => assert_eq!(
                paths,
                vec![PathBuf::from("/r/A.java"), PathBuf::from("/r/B.java")]
            ),
            other => panic!("expected a sync, got {other:?}"),
        }
        assert!(batch.due(Duration::ZERO).is_none());
    }

    #[test]
    fn oversized_batches_become_a_rescan() {
        let mut batch = Batch::new(2);
        batch.add(PathBuf::from("/r/A.java"));
        batch.add(PathBuf::from("/r/B.java"));
        batch.add(PathBuf::from("/r/C.java"));
        assert!(matches!(batch.due(Duration::from_secs(60)), Some(Command::Rescan)));
        assert!(batch.due(Duration::ZERO).is_none());
    }

    #[test]
    fn config_clamps_debounce() {
        let config = WatchConfig::new(WatchMode::On, 0, true);
        assert_eq!(config.debounce, Duration::from_millis(1));
        assert!(config.no_ignore);
        assert_eq!(WatchConfig::default().mode, WatchMode::Auto);
    }
}
