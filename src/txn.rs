//! Read-transaction coordination.
//!
//! Every probe reaches the index through [`Coordinator::run_read`]. A call
//! nested inside another `run_read` on the same thread reuses the active
//! transaction instead of opening a second one.

use crate::error::{ProbeError, ProbeResult};
use crate::host::{AnalysisEngine, ArtifactLoader, ProjectView};
use anyhow::Result;
use std::any::Any;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// The mutable project the probes read from. Writes belong to the engine.
pub trait ProjectModel: Send + Sync + 'static {
    type Txn: ProjectView + 'static;

    fn name(&self) -> &str;
    fn root(&self) -> &Path;
    fn begin_read(&self) -> Result<Self::Txn>;
    fn engine(&self) -> &dyn AnalysisEngine;
    fn artifacts(&self) -> &dyn ArtifactLoader;
}

static NEXT_COORDINATOR: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE: RefCell<Vec<(u64, Rc<dyn Any>)>> = const { RefCell::new(Vec::new()) };
}

struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

pub struct Coordinator<M: ProjectModel> {
    id: u64,
    project: RwLock<Option<Arc<M>>>,
}

impl<M: ProjectModel> Default for Coordinator<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ProjectModel> Coordinator<M> {
    pub fn new() -> Self {
        Self {
            id: NEXT_COORDINATOR.fetch_add(1, Ordering::Relaxed),
            project: RwLock::new(None),
        }
    }

    pub fn with_project(project: M) -> Self {
        let coordinator = Self::new();
        coordinator.open(Arc::new(project));
        coordinator
    }

    /// Install a project, returning the one it replaces.
    pub fn open(&self, project: Arc<M>) -> Option<Arc<M>> {
        let mut slot = self.project.write().unwrap_or_else(|e| e.into_inner());
        slot.replace(project)
    }

    pub fn close(&self) -> Option<Arc<M>> {
        let mut slot = self.project.write().unwrap_or_else(|e| e.into_inner());
        slot.take()
    }

    pub fn project(&self) -> ProbeResult<Arc<M>> {
        let slot = self.project.read().unwrap_or_else(|e| e.into_inner());
        slot.clone().ok_or(ProbeError::NoProjectOpen)
    }

    pub fn run_read<T>(&self, f: impl FnOnce(&M::Txn) -> T) -> ProbeResult<T> {
        let project = self.project()?;
        if let Some(txn) = self.active() {
            return Ok(f(&txn));
        }
        let txn = Rc::new(project.begin_read()?);
        let shared: Rc<dyn Any> = txn.clone();
        ACTIVE.with(|active| active.borrow_mut().push((self.id, shared)));
        let _guard = ActiveGuard;
        Ok(f(&txn))
    }

    /// Whether the calling thread is inside one of this coordinator's transactions.
    pub fn in_read(&self) -> bool {
        self.active().is_some()
    }

    fn active(&self) -> Option<Rc<M::Txn>> {
        let entry = ACTIVE.with(|active| {
            active
                .borrow()
                .iter()
                .rev()
                .find(|(id, _)| *id == self.id)
                .map(|(_, txn)| Rc::clone(txn))
        })?;
        entry.downcast::<M::Txn>().ok()
    }
}
