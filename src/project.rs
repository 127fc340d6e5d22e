//! The concrete project: SQLite index, background analysis engine and
//! compiled-artifact classpath, plus the project-level operations.

use crate::artifacts::Classpath;
use crate::db::{Db, ReadTxn};
use crate::engine::Engine;
use crate::error::ProbeResult;
use crate::host::{AnalysisEngine, ArtifactLoader, Scope};
use crate::indexer::Indexer;
use crate::indexer::scan::ScanOptions;
use crate::model::{DeclarationSummary, Origin, ProjectInfo};
use crate::txn::{Coordinator, ProjectModel};
use crate::util;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ProjectOptions {
    pub no_ignore: bool,
    /// Extra compiled roots and jars, probed after the build outputs.
    pub classpath: Vec<PathBuf>,
    /// Dependency source roots.
    pub library_roots: Vec<PathBuf>,
    /// Start with a full reindex; the index reports `Building` until it ends.
    pub bootstrap: bool,
}

pub struct Project {
    name: String,
    root: PathBuf,
    db: Arc<Db>,
    engine: Engine,
    classpath: Classpath,
    library_roots: Vec<String>,
}

impl Project {
    pub fn open(root: PathBuf, db_path: PathBuf, options: ProjectOptions) -> Result<Self> {
        let indexer = Indexer::new_with_options(
            root,
            db_path,
            ScanOptions::new(options.no_ignore),
            options.library_roots,
        )?;
        let root = indexer.repo_root().to_path_buf();
        let library_roots = indexer
            .library_roots()
            .iter()
            .map(|path| util::normalize_path(path))
            .collect();
        let db = Arc::clone(indexer.db());
        let classpath = Classpath::for_project(&root, &options.classpath);
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| util::normalize_path(&root));
        let engine = Engine::start(indexer, options.bootstrap)?;
        info!(project = %name, root = %root.display(), "project opened");
        Ok(Self {
            name,
            root,
            db,
            engine,
            classpath,
            library_roots,
        })
    }

    /// The concrete engine, for commands the probes never issue.
    pub fn engine_handle(&self) -> &Engine {
        &self.engine
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn classpath(&self) -> &Classpath {
        &self.classpath
    }
}

impl ProjectModel for Project {
    type Txn = ReadTxn;

    fn name(&self) -> &str {
        &self.name
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

pub fn project_info(coordinator: &Coordinator<Project>) -> ProbeResult<ProjectInfo> {
    let project = coordinator.project()?;
    let counts = coordinator.run_read(|txn| -> Result<_> {
        Ok((
            txn.count_files(Origin::Project)?,
            txn.count_declarations(Origin::Project)?,
            txn.last_indexed()?,
        ))
    })??;
    let (files, declarations, last_indexed) = counts;
    Ok(ProjectInfo {
        name: project.name().to_string(),
        root: util::normalize_path(project.root()),
        index_state: project.engine().index_state(),
        files,
        declarations,
        library_roots: project.library_roots.clone(),
        classpath: project.classpath.display_entries(),
        last_indexed,
    })
}

/// Every project declaration, sorted by qualified name.
pub fn list_declarations(coordinator: &Coordinator<Project>) -> ProbeResult<Vec<DeclarationSummary>> {
    let decls = coordinator.run_read(|txn| txn.list_declarations(Scope::Project))??;
    Ok(decls)
}
