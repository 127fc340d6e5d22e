use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Class,
    Interface,
    Enum,
    Annotation,
}

impl DeclKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeclKind::Class => "class",
            DeclKind::Interface => "interface",
            DeclKind::Enum => "enum",
            DeclKind::Annotation => "annotation",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "class" | "record" => Some(DeclKind::Class),
            "interface" => Some(DeclKind::Interface),
            "enum" => Some(DeclKind::Enum),
            "annotation" => Some(DeclKind::Annotation),
            _ => None,
        }
    }
}

/// Declaration order is the canonical rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Public,
    Private,
    Protected,
    Static,
    Final,
    Abstract,
    Synchronized,
    Volatile,
    Transient,
    Native,
}

impl Modifier {
    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::Public => "public",
            Modifier::Private => "private",
            Modifier::Protected => "protected",
            Modifier::Static => "static",
            Modifier::Final => "final",
            Modifier::Abstract => "abstract",
            Modifier::Synchronized => "synchronized",
            Modifier::Volatile => "volatile",
            Modifier::Transient => "transient",
            Modifier::Native => "native",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "public" => Some(Modifier::Public),
            "private" => Some(Modifier::Private),
            "protected" => Some(Modifier::Protected),
            "static" => Some(Modifier::Static),
            "final" => Some(Modifier::Final),
            "abstract" => Some(Modifier::Abstract),
            "synchronized" => Some(Modifier::Synchronized),
            "volatile" => Some(Modifier::Volatile),
            "transient" => Some(Modifier::Transient),
            "native" => Some(Modifier::Native),
            _ => None,
        }
    }
}

pub type Modifiers = BTreeSet<Modifier>;

pub fn modifiers_text(modifiers: &Modifiers) -> String {
    modifiers
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Project,
    Library,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Project => "project",
            Origin::Library => "library",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceUnit {
    /// Repo-relative for project files, absolute for library roots.
    pub path: String,
    pub name: String,
    pub exists: bool,
}

/// A type as written plus its canonical rendering when extraction could resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

impl TypeRef {
    pub fn new(text: impl Into<String>, resolved: Option<String>) -> Self {
        Self {
            text: text.into(),
            resolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    #[serde(skip)]
    pub id: i64,
    pub qualname: String,
    pub name: String,
    pub kind: DeclKind,
    pub modifiers: Modifiers,
    pub package: String,
    pub superclass: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub annotations: Vec<String>,
    pub outer: Option<String>,
    pub unit: SourceUnit,
    pub origin: Origin,
    pub start_line: i64,
    pub end_line: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Field,
    Method,
    Constructor,
}

impl MemberKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberKind::Field => "field",
            MemberKind::Method => "method",
            MemberKind::Constructor => "constructor",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "field" => Some(MemberKind::Field),
            "method" => Some(MemberKind::Method),
            "constructor" => Some(MemberKind::Constructor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub varargs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRecord {
    #[serde(skip)]
    pub id: i64,
    pub kind: MemberKind,
    pub name: String,
    pub owner: String,
    /// Field type or method return type; `None` for constructors.
    pub ty: Option<TypeRef>,
    pub modifiers: Modifiers,
    pub params: Vec<Param>,
    pub throws: Vec<TypeRef>,
    pub annotations: Vec<String>,
    pub has_body: bool,
    pub has_initializer: bool,
    pub file_name: String,
    pub start_line: i64,
    pub end_line: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NotFound,
    Single(Declaration),
    /// Qualified names, sorted.
    Ambiguous(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Source,
    Compiled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub file: String,
    pub start_line: i64,
    pub end_line: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub modifiers: Modifiers,
    pub annotations: Vec<String>,
    pub has_initializer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub return_type: String,
    pub parameters: Vec<ParamInfo>,
    pub modifiers: Modifiers,
    pub exceptions: Vec<String>,
    pub annotations: Vec<String>,
    pub is_constructor: bool,
    pub has_body: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredInfo {
    pub name: String,
    pub simple_name: String,
    pub package: String,
    #[serde(rename = "type")]
    pub kind: DeclKind,
    pub modifiers: Modifiers,
    pub super_class: String,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub constructors: Vec<MethodInfo>,
    pub inner_classes: Vec<String>,
    pub annotations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub source: Provenance,
}

/// Compiled view of a type, produced by an artifact loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub qualname: String,
    pub kind: DeclKind,
    pub modifiers: Modifiers,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub constructors: Vec<MethodInfo>,
    pub inner_classes: Vec<String>,
    pub annotations: Vec<String>,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Call,
    New,
    MethodRef,
}

impl RefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RefKind::Call => "call",
            RefKind::New => "new",
            RefKind::MethodRef => "method_ref",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "call" => Some(RefKind::Call),
            "new" => Some(RefKind::New),
            "method_ref" => Some(RefKind::MethodRef),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceSite {
    #[serde(skip)]
    pub id: i64,
    pub kind: RefKind,
    pub path: String,
    pub file_name: String,
    pub line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    /// Text of the enclosing call expression, when the reference is a call.
    pub call_text: Option<String>,
    /// Matched by name and arity only; the receiver's type could not be worked out.
    pub unresolved_receiver: bool,
}

pub const NON_MEMBER_TAG: &str = "non-member reference";
pub const UNRESOLVED_TAG: &str = "(unresolved receiver)";
pub const CALL_TEXT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    pub caller: String,
    /// `None` when the reference sits outside any method or constructor.
    pub member: Option<String>,
    pub file: String,
    pub line: i64,
    pub call_text: Option<String>,
    pub unresolved_receiver: bool,
}

impl CallSite {
    pub fn render(&self) -> String {
        let mut out = self.render_site();
        if self.unresolved_receiver {
            out.push(' ');
            out.push_str(UNRESOLVED_TAG);
        }
        out
    }

    fn render_site(&self) -> String {
        match &self.member {
            Some(member) => {
                let mut out = format!("{}.{} ({}:{})", self.caller, member, self.file, self.line);
                if let Some(text) = &self.call_text {
                    out.push_str(" -> ");
                    out.push_str(text);
                }
                out
            }
            None => format!(
                "{} ({}:{}) -> {}",
                self.caller, self.file, self.line, NON_MEMBER_TAG
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverloadCallers {
    pub signature: String,
    /// Rendered call sites plus note lines for references that could not be described.
    pub callers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassCallers {
    pub class: String,
    pub method_found: bool,
    pub overloads: Vec<OverloadCallers>,
    /// Why this class could not be searched; the other classes still are.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallChainReport {
    pub input: String,
    pub method: String,
    pub matches: Vec<String>,
    pub classes: Vec<ClassCallers>,
    pub found_any_method: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

/// Diagnostic as attached to a unit by the analysis engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub severity: Severity,
    pub line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextLine {
    pub line: i64,
    pub text: String,
    pub marked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: i64,
    pub message: String,
    pub context: Vec<ContextLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    NotLoaded,
    AlreadyOpen,
    Opened,
    AnalysisTriggered,
    Stable,
    TimedOut,
}

impl CheckState {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckState::NotLoaded => "not_loaded",
            CheckState::AlreadyOpen => "already_open",
            CheckState::Opened => "opened",
            CheckState::AnalysisTriggered => "analysis_triggered",
            CheckState::Stable => "stable",
            CheckState::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsReport {
    pub class: String,
    pub file_name: String,
    pub path: String,
    pub state: CheckState,
    pub errors: Vec<Diagnostic>,
    pub warning_count: usize,
    pub info_count: usize,
    /// Which fast path or fallback produced the result.
    pub notes: Vec<String>,
    /// Set when the result may be incomplete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caveat: Option<String>,
    pub polls: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Ready,
    Building,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclarationSummary {
    pub name: String,
    pub package: String,
    #[serde(rename = "type")]
    pub kind: DeclKind,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub root: String,
    pub index_state: IndexState,
    pub files: usize,
    pub declarations: usize,
    pub library_roots: Vec<String>,
    pub classpath: Vec<String>,
    pub last_indexed: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct IndexStats {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub errors: usize,
    pub declarations: usize,
    pub members: usize,
    pub references: usize,
    pub duration_ms: u64,
}
