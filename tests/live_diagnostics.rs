use anyhow::Result;
use codeprobe::artifacts::Classpath;
use codeprobe::check::{CheckOptions, check_errors};
use codeprobe::db::{Db, ReadTxn};
use codeprobe::error::ProbeError;
use codeprobe::host::{AnalysisEngine, ArtifactLoader, SourceText};
use codeprobe::indexer::Indexer;
use codeprobe::model::{CheckState, IndexState, Marker, Severity, SourceUnit};
use codeprobe::project::{Project, ProjectOptions};
use codeprobe::txn::{Coordinator, ProjectModel};
use codeprobe::{callchain, introspect, render};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn temp_repo_dir(label: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    dir.push(format!("codeprobe-{label}-{nanos}-{counter}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn copy_dir(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&path, &target);
        } else {
            std::fs::copy(&path, &target).unwrap();
        }
    }
}

fn setup_repo(fixture: &str) -> (PathBuf, PathBuf) {
    let src = fixture_path(fixture);
    let repo_root = temp_repo_dir(fixture);
    copy_dir(&src, &repo_root);
    let db_path = repo_root.join(".codeprobe").join("index.sqlite");
    (repo_root, db_path)
}

fn quick_options(timeout_ms: u64) -> CheckOptions {
    CheckOptions {
        timeout: Duration::from_millis(timeout_ms),
        poll: Duration::from_millis(10),
        open_delay: Duration::from_millis(5),
        trigger_delay: Duration::from_millis(5),
    }
}

/// Analysis engine that replays a fixed sequence of marker counts.
struct ScriptedEngine {
    state: Mutex<IndexState>,
    /// States reported before falling back to `state`, one per query.
    upcoming_states: Mutex<VecDeque<IndexState>>,
    /// Number of commit checks that report a pending edit.
    uncommitted: AtomicUsize,
    marker_reads: AtomicUsize,
    open: AtomicBool,
    confirm_open: bool,
    readings: Mutex<VecDeque<usize>>,
    growing: bool,
    last: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedEngine {
    fn new(readings: &[usize]) -> Self {
        Self {
            state: Mutex::new(IndexState::Ready),
            upcoming_states: Mutex::new(VecDeque::new()),
            uncommitted: AtomicUsize::new(0),
            marker_reads: AtomicUsize::new(0),
            open: AtomicBool::new(false),
            confirm_open: true,
            readings: Mutex::new(readings.iter().copied().collect()),
            growing: false,
            last: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn next_count(&self) -> usize {
        if self.growing {
            return self.last.fetch_add(1, Ordering::SeqCst) + 1;
        }
        match self.readings.lock().unwrap().pop_front() {
            Some(count) => {
                self.last.store(count, Ordering::SeqCst);
                count
            }
            None => self.last.load(Ordering::SeqCst),
        }
    }
}

impl AnalysisEngine for ScriptedEngine {
    fn index_state(&self) -> IndexState {
        match self.upcoming_states.lock().unwrap().pop_front() {
            Some(state) => state,
            None => *self.state.lock().unwrap(),
        }
    }

    fn is_unit_open(&self, _unit: &SourceUnit) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn open_unit(&self, _unit: &SourceUnit) -> Result<()> {
        self.calls.lock().unwrap().push("open");
        if self.confirm_open {
            self.open.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn trigger_analysis(&self, _unit: &SourceUnit) -> Result<()> {
        self.calls.lock().unwrap().push("analyze");
        Ok(())
    }

    fn diagnostic_markers(&self, _view: &dyn SourceText, _unit: &SourceUnit) -> Result<Vec<Marker>> {
        self.marker_reads.fetch_add(1, Ordering::SeqCst);
        let count = self.next_count();
        Ok((1..=count as i64)
            .map(|line| Marker {
                severity: Severity::Warning,
                line,
                start_byte: 0,
                end_byte: 0,
                message: "Unused import statement".to_string(),
            })
            .collect())
    }

    fn is_document_committed(&self, _unit: &SourceUnit) -> bool {
        self.uncommitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}

/// A real index paired with a scripted engine.
struct ScriptedProject {
    root: PathBuf,
    db: Arc<Db>,
    engine: ScriptedEngine,
    classpath: Classpath,
}

impl ProjectModel for ScriptedProject {
    type Txn = ReadTxn;

    fn name(&self) -> &str {
        "scripted"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn begin_read(&self) -> Result<ReadTxn> {
        self.db.begin_read(&self.root)
    }

    fn engine(&self) -> &dyn AnalysisEngine {
        &self.engine
    }

    fn artifacts(&self) -> &dyn ArtifactLoader {
        &self.classpath
    }
}

fn scripted(fixture: &str, engine: ScriptedEngine) -> (PathBuf, Coordinator<ScriptedProject>) {
    let (repo_root, db_path) = setup_repo(fixture);
    let mut indexer = Indexer::new(repo_root.clone(), db_path).unwrap();
    indexer.reindex().unwrap();
    let root = indexer.repo_root().to_path_buf();
    let project = ScriptedProject {
        classpath: Classpath::for_project(&root, &[]),
        db: Arc::clone(indexer.db()),
        root,
        engine,
    };
    (repo_root, Coordinator::with_project(project))
}

#[test]
fn settles_after_three_equal_readings() {
    let (repo_root, coordinator) = scripted("java_basic", ScriptedEngine::new(&[3, 5, 5, 5]));

    let report = check_errors(&coordinator, "com.acme.App", quick_options(5_000)).unwrap();
    assert_eq!(report.state, CheckState::Stable);
    assert_eq!(report.polls, 4);
    assert_eq!(report.warning_count, 5);
    assert!(report.errors.is_empty());
    assert!(report.caveat.is_none());
    assert!(report.notes.iter().any(|n| n == "opened unit"));
    assert!(
        report
            .notes
            .iter()
            .any(|n| n.contains("structural parse scan found 0"))
    );

    let project = coordinator.project().unwrap();
    assert_eq!(project.engine.calls(), vec!["open", "analyze"]);

    let _ = std::fs::remove_dir_all(&repo_root);
}

#[test]
fn polls_wait_out_indexing_and_pending_edits() {
    let engine = ScriptedEngine::new(&[4, 4, 4]);
    engine.upcoming_states.lock().unwrap().extend([
        IndexState::Ready,
        IndexState::Building,
        IndexState::Building,
    ]);
    engine.uncommitted.store(2, Ordering::SeqCst);
    let (repo_root, coordinator) = scripted("java_basic", engine);

    let report = check_errors(&coordinator, "com.acme.App", quick_options(5_000)).unwrap();
    assert_eq!(report.state, CheckState::Stable);
    assert_eq!(report.polls, 3);
    assert_eq!(report.warning_count, 4);

    let project = coordinator.project().unwrap();
    assert!(project.engine.upcoming_states.lock().unwrap().is_empty());
    assert_eq!(project.engine.uncommitted.load(Ordering::SeqCst), 0);
    // three counted polls plus the final harvest
    assert_eq!(project.engine.marker_reads.load(Ordering::SeqCst), 4);

    let _ = std::fs::remove_dir_all(&repo_root);
}

#[test]
fn unsettled_counts_time_out_with_a_caveat() {
    let mut engine = ScriptedEngine::new(&[]);
    engine.growing = true;
    let (repo_root, coordinator) = scripted("java_basic", engine);

    let report = check_errors(&coordinator, "com.acme.App", quick_options(150)).unwrap();
    assert_eq!(report.state, CheckState::TimedOut);
    assert!(report.polls > 0);
    assert!(report.caveat.as_deref().unwrap().contains("150 ms"));
    assert!(render::error_report(&report).contains("Caveat:"));

    let _ = std::fs::remove_dir_all(&repo_root);
}

#[test]
fn open_units_are_harvested_without_polling() {
    let engine = ScriptedEngine::new(&[2]);
    engine.open.store(true, Ordering::SeqCst);
    let (repo_root, coordinator) = scripted("java_basic", engine);

    let report = check_errors(&coordinator, "App.java", quick_options(5_000)).unwrap();
    assert_eq!(report.state, CheckState::AlreadyOpen);
    assert_eq!(report.polls, 0);
    assert_eq!(report.warning_count, 2);
    assert_eq!(report.class, "com.acme.App");

    let project = coordinator.project().unwrap();
    assert!(project.engine.calls().is_empty());

    let _ = std::fs::remove_dir_all(&repo_root);
}

#[test]
fn unconfirmed_open_continues_best_effort() {
    let mut engine = ScriptedEngine::new(&[0, 0, 0]);
    engine.confirm_open = false;
    let (repo_root, coordinator) = scripted("java_basic", engine);

    let report = check_errors(&coordinator, "com.acme.App", quick_options(5_000)).unwrap();
    assert_eq!(report.state, CheckState::Stable);
    assert!(
        report
            .notes
            .iter()
            .any(|n| n == "open not confirmed; continuing best effort")
    );

    let _ = std::fs::remove_dir_all(&repo_root);
}

#[test]
fn probes_fail_fast_while_indexing() {
    let engine = ScriptedEngine::new(&[0]);
    *engine.state.lock().unwrap() = IndexState::Building;
    let (repo_root, coordinator) = scripted("java_basic", engine);

    let err = check_errors(&coordinator, "com.acme.App", quick_options(5_000)).unwrap_err();
    assert!(matches!(err, ProbeError::IndexBuilding));
    assert_eq!(err.code(), "INDEX_BUILDING");
    let err = introspect::introspect(&coordinator, "com.acme.App").unwrap_err();
    assert!(matches!(err, ProbeError::IndexBuilding));
    let err = callchain::trace(&coordinator, "com.acme.Widget", "reset").unwrap_err();
    assert!(matches!(err, ProbeError::IndexBuilding));

    let project = coordinator.project().unwrap();
    assert!(project.engine.calls().is_empty());

    let _ = std::fs::remove_dir_all(&repo_root);
}

#[test]
fn probes_need_an_open_project() {
    let coordinator: Coordinator<ScriptedProject> = Coordinator::new();
    let err = check_errors(&coordinator, "App", quick_options(100)).unwrap_err();
    assert_eq!(err.code(), "NO_PROJECT_OPEN");
    let err = introspect::introspect(&coordinator, "App").unwrap_err();
    assert!(matches!(err, ProbeError::NoProjectOpen));
}

#[test]
fn syntax_error_is_reported_with_its_context() {
    let (repo_root, db_path) = setup_repo("java_broken");
    let options = ProjectOptions {
        bootstrap: true,
        ..ProjectOptions::default()
    };
    let project = Project::open(repo_root.clone(), db_path, options).unwrap();
    assert!(
        project
            .engine_handle()
            .wait_until_ready(Duration::from_secs(30))
    );
    let coordinator = Coordinator::with_project(project);

    let options = CheckOptions {
        timeout: Duration::from_secs(10),
        poll: Duration::from_millis(20),
        open_delay: Duration::from_millis(50),
        trigger_delay: Duration::from_millis(50),
    };
    let report = check_errors(&coordinator, "Broken", options).unwrap();
    assert_eq!(report.state, CheckState::Stable);
    assert_eq!(report.file_name, "Broken.java");
    assert_eq!(report.errors.len(), 1);
    let error = &report.errors[0];
    assert_eq!(error.line, 7);
    let lines: Vec<i64> = error.context.iter().map(|c| c.line).collect();
    assert_eq!(lines, vec![4, 5, 6, 7, 8, 9, 10]);
    let marked: Vec<i64> = error
        .context
        .iter()
        .filter(|c| c.marked)
        .map(|c| c.line)
        .collect();
    assert_eq!(marked, vec![7]);
    assert!(render::error_report(&report).contains(">>> 7:         int x = ;"));

    let again = check_errors(&coordinator, "com.acme.Broken", options).unwrap();
    assert_eq!(again.state, CheckState::AlreadyOpen);
    assert_eq!(again.errors.len(), 1);

    let fine = check_errors(&coordinator, "Fine", options).unwrap();
    assert!(fine.errors.is_empty());
    assert_eq!(fine.warning_count, 1);

    let _ = std::fs::remove_dir_all(&repo_root);
}
