//! Collaborator interfaces the probe operations are written against.
//!
//! The SQLite read transaction in [`crate::db`] implements the index-facing
//! traits; [`crate::engine::Engine`] implements [`AnalysisEngine`] and
//! [`crate::artifacts::Classpath`] implements [`ArtifactLoader`].

use crate::model::{
    ArtifactInfo, Declaration, IndexState, Marker, MemberRecord, ReferenceSite, SourceUnit,
    TypeRef,
};
use anyhow::Result;

/// `Project` covers project sources only; `All` adds dependency sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Project,
    All,
}

pub trait SymbolIndex {
    fn find_by_qualified_name(&self, qualname: &str, scope: Scope) -> Result<Option<Declaration>>;
    fn find_by_simple_name(&self, name: &str, scope: Scope) -> Result<Vec<Declaration>>;
    fn all_simple_names(&self) -> Result<Vec<String>>;
    fn find_source_units_by_filename(&self, file_name: &str) -> Result<Vec<SourceUnit>>;
    fn declarations_in_unit(&self, unit: &SourceUnit) -> Result<Vec<Declaration>>;
    fn members_of(&self, decl: &Declaration) -> Result<Vec<MemberRecord>>;
    fn nested_types(&self, decl: &Declaration) -> Result<Vec<Declaration>>;
    fn all_declarations(&self, scope: Scope) -> Result<Vec<Declaration>>;
}

pub trait ReferenceSearch {
    fn find_references(&self, member: &MemberRecord, scope: Scope) -> Result<Vec<ReferenceSite>>;
    /// Name of the method or constructor containing the site, if any.
    fn enclosing_member(&self, site: &ReferenceSite) -> Result<Option<MemberRecord>>;
    fn enclosing_declaration(&self, site: &ReferenceSite) -> Result<Option<Declaration>>;
}

/// Fallible tiers of type-name rendering.
pub trait TypeResolver {
    /// Fully qualified rendering; fails when the type cannot be resolved.
    fn canonical_text(&self, ty: &TypeRef) -> Result<String>;
    /// Rendering as written, with qualifiers stripped.
    fn presentable_text(&self, ty: &TypeRef) -> Result<String>;
}

pub trait SourceText {
    fn unit_text(&self, unit: &SourceUnit) -> Result<String>;
    /// Diagnostic markers committed for the unit, in line order.
    fn markers(&self, unit: &SourceUnit) -> Result<Vec<Marker>>;
    /// Structural parse-error scan of the unit's current text.
    fn parse_errors(&self, unit: &SourceUnit) -> Result<Vec<Marker>>;
}

/// Everything the probes may read inside one read transaction.
pub trait ProjectView: SymbolIndex + ReferenceSearch + TypeResolver + SourceText {}

impl<T> ProjectView for T where T: SymbolIndex + ReferenceSearch + TypeResolver + SourceText {}

/// The background pipeline that owns indexing and diagnostics production.
pub trait AnalysisEngine: Send + Sync {
    fn index_state(&self) -> IndexState;
    fn is_unit_open(&self, unit: &SourceUnit) -> bool;
    /// Asynchronous; returns once the request is queued.
    fn open_unit(&self, unit: &SourceUnit) -> Result<()>;
    /// Asynchronous; returns once the request is queued.
    fn trigger_analysis(&self, unit: &SourceUnit) -> Result<()>;
    /// Current markers for the unit as seen through `view`, the caller's read
    /// transaction.
    fn diagnostic_markers(&self, view: &dyn SourceText, unit: &SourceUnit) -> Result<Vec<Marker>>;
    fn is_document_committed(&self, unit: &SourceUnit) -> bool;
}

pub trait ArtifactLoader: Send + Sync {
    /// `Ok(None)` when no artifact exists for the name.
    fn load_artifact(&self, qualname: &str) -> Result<Option<ArtifactInfo>>;
}
