//! Background analysis engine.
//!
//! One worker thread owns the [`Indexer`] and is the only writer of the
//! index and of diagnostic markers. Everything else talks to it through
//! [`Command`]s, so opening a unit or requesting analysis never blocks the
//! caller.

use crate::config::Config;
use crate::db::Db;
use crate::host::{AnalysisEngine, SourceText};
use crate::indexer::Indexer;
use crate::model::{IndexState, Marker, SourceUnit};
use anyhow::{Result, anyhow};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const IDLE_WAIT: Duration = Duration::from_millis(200);
const PENDING_WAIT: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub enum Command {
    /// Full rescan; the index reports `Building` until it finishes.
    Reindex,
    /// Incremental rescan that keeps the index `Ready`.
    Rescan,
    Sync(Vec<PathBuf>),
    Open(String),
    Close(String),
    Analyze(String),
    /// Commit any pending buffer for the path. The text itself is queued by
    /// [`Engine::edit`].
    Edit(String),
    Stop,
}

struct PendingEdit {
    text: String,
    queued: Instant,
}

#[derive(Default)]
struct Shared {
    building: AtomicBool,
    open_units: Mutex<HashSet<String>>,
    pending_edits: Mutex<HashMap<String, PendingEdit>>,
}

impl Shared {
    fn open_units(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.open_units.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_edits(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingEdit>> {
        self.pending_edits.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Engine {
    db: Arc<Db>,
    commands: Sender<Command>,
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Engine {
    /// Spawn the worker. With `bootstrap` the first command is a full reindex
    /// and the index reports `Building` from the moment this returns.
    pub fn start(indexer: Indexer, bootstrap: bool) -> Result<Self> {
        let db = Arc::clone(indexer.db());
        let shared = Arc::new(Shared::default());
        if bootstrap {
            shared.building.store(true, Ordering::SeqCst);
        }
        let (commands, rx) = mpsc::channel();
        let commit_delay = Config::get().commit_delay();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("codeprobe-engine".to_string())
            .spawn(move || run_worker(indexer, rx, worker_shared, commit_delay))?;
        let engine = Self {
            db,
            commands,
            shared,
            worker: Mutex::new(Some(worker)),
        };
        if bootstrap {
            engine.send(Command::Reindex)?;
        }
        Ok(engine)
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// A sender for collaborators such as the file watcher.
    pub fn commands(&self) -> Sender<Command> {
        self.commands.clone()
    }

    pub fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("analysis engine has stopped"))
    }

    pub fn reindex(&self) -> Result<()> {
        self.shared.building.store(true, Ordering::SeqCst);
        self.send(Command::Reindex)
    }

    /// Replace the unit's text with an editor buffer. The buffer stays
    /// uncommitted until the worker picks it up.
    pub fn edit(&self, path: &str, text: String) -> Result<()> {
        self.shared.pending_edits().insert(
            path.to_string(),
            PendingEdit {
                text,
                queued: Instant::now(),
            },
        );
        self.send(Command::Edit(path.to_string()))
    }

    pub fn close_unit(&self, path: &str) -> Result<()> {
        self.send(Command::Close(path.to_string()))
    }

    pub fn open_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.shared.open_units().iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Block until the index is `Ready` or the timeout expires.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        while self.shared.building.load(Ordering::SeqCst) {
            if started.elapsed() >= timeout {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        true
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AnalysisEngine for Engine {
    fn index_state(&self) -> IndexState {
        if self.shared.building.load(Ordering::SeqCst) {
            IndexState::Building
        } else {
            IndexState::Ready
        }
    }

    fn is_unit_open(&self, unit: &SourceUnit) -> bool {
        self.shared.open_units().contains(&unit.path)
    }

    fn open_unit(&self, unit: &SourceUnit) -> Result<()> {
        self.send(Command::Open(unit.path.clone()))
    }

    fn trigger_analysis(&self, unit: &SourceUnit) -> Result<()> {
        self.send(Command::Analyze(unit.path.clone()))
    }

    fn diagnostic_markers(&self, view: &dyn SourceText, unit: &SourceUnit) -> Result<Vec<Marker>> {
        view.markers(unit)
    }

    fn is_document_committed(&self, unit: &SourceUnit) -> bool {
        !self.shared.pending_edits().contains_key(&unit.path)
    }
}

fn run_worker(
    mut indexer: Indexer,
    rx: Receiver<Command>,
    shared: Arc<Shared>,
    commit_delay: Duration,
) {
    info!(root = %indexer.repo_root().display(), "analysis engine started");
    loop {
        let wait = if shared.pending_edits().is_empty() {
            IDLE_WAIT
        } else {
            PENDING_WAIT
        };
        match rx.recv_timeout(wait) {
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => {
                if let Err(err) = handle(&mut indexer, &shared, command) {
                    warn!("engine command failed: {err:#}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        commit_due_edits(&mut indexer, &shared, commit_delay);
    }
    info!("analysis engine stopped");
}

fn handle(indexer: &mut Indexer, shared: &Shared, command: Command) -> Result<()> {
    match command {
        Command::Reindex => {
            shared.building.store(true, Ordering::SeqCst);
            let result = indexer.reindex();
            shared.building.store(false, Ordering::SeqCst);
            result?;
            reanalyze_open(indexer, shared);
        }
        Command::Rescan => {
            indexer.reindex()?;
            reanalyze_open(indexer, shared);
        }
        Command::Sync(paths) => {
            let stats = indexer.sync_abs_paths(&paths)?;
            if stats.errors > 0 {
                warn!(errors = stats.errors, "sync finished with errors");
            }
            if stats.indexed > 0 || stats.deleted > 0 {
                reanalyze_open(indexer, shared);
            }
        }
        Command::Open(path) => {
            if indexer.db().get_file_by_path(&path)?.is_none() {
                return Err(anyhow!("cannot open {path}: not indexed"));
            }
            shared.open_units().insert(path.clone());
            indexer.analyze_path(&path)?;
        }
        Command::Close(path) => {
            shared.open_units().remove(&path);
        }
        Command::Analyze(path) => {
            if shared.pending_edits().contains_key(&path) {
                // the commit re-runs analysis
                return Ok(());
            }
            indexer.analyze_path(&path)?;
        }
        Command::Edit(path) => {
            debug!(path = %path, "edit queued");
        }
        Command::Stop => {}
    }
    Ok(())
}

fn reanalyze_open(indexer: &mut Indexer, shared: &Shared) {
    let paths: Vec<String> = shared.open_units().iter().cloned().collect();
    for path in paths {
        if let Err(err) = indexer.analyze_path(&path) {
            debug!(path = %path, "re-analysis skipped: {err:#}");
        }
    }
}

fn commit_due_edits(indexer: &mut Indexer, shared: &Shared, delay: Duration) {
    let due: Vec<(String, String, Instant)> = shared
        .pending_edits()
        .iter()
        .filter(|(_, edit)| edit.queued.elapsed() >= delay)
        .map(|(path, edit)| (path.clone(), edit.text.clone(), edit.queued))
        .collect();
    for (path, text, queued) in due {
        let result = indexer
            .index_text(&path, &text)
            .and_then(|_| indexer.analyze_path(&path));
        if let Err(err) = result {
            warn!(path = %path, "commit failed: {err:#}");
        }
        let mut pending = shared.pending_edits();
        // a newer buffer may have arrived while this one was committing
        if pending.get(&path).is_some_and(|edit| edit.queued == queued) {
            pending.remove(&path);
        }
    }
}
