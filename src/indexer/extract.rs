use crate::model::{DeclKind, MemberKind, Modifiers, Param, RefKind, TypeRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDecl {
    pub path: String,
    pub wildcard: bool,
    pub is_static: bool,
    pub line: i64,
}

#[derive(Debug, Clone)]
pub struct DeclInput {
    pub qualname: String,
    pub name: String,
    pub kind: DeclKind,
    pub modifiers: Modifiers,
    pub superclass: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub annotations: Vec<String>,
    pub outer: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
}

#[derive(Debug, Clone)]
pub struct MemberInput {
    /// Index into `ExtractedFile::declarations`.
    pub decl_index: usize,
    pub kind: MemberKind,
    pub name: String,
    pub ty: Option<TypeRef>,
    pub modifiers: Modifiers,
    pub params: Vec<Param>,
    pub throws: Vec<TypeRef>,
    pub annotations: Vec<String>,
    pub has_body: bool,
    pub has_initializer: bool,
    pub start_line: i64,
    pub end_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// `foo()` with no qualifier.
    Implicit,
    This,
    Super,
    /// A static reference through a type name.
    Type,
    Expr,
}

impl Receiver {
    pub fn as_str(self) -> &'static str {
        match self {
            Receiver::Implicit => "implicit",
            Receiver::This => "this",
            Receiver::Super => "super",
            Receiver::Type => "type",
            Receiver::Expr => "expr",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "implicit" => Some(Receiver::Implicit),
            "this" => Some(Receiver::This),
            "super" => Some(Receiver::Super),
            "type" => Some(Receiver::Type),
            "expr" => Some(Receiver::Expr),
            _ => None,
        }
    }
}

/// How to reach a receiver whose type was not visible at the call site. The
/// index walks the steps at query time using recorded field and return types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverChain {
    pub root: ChainRoot,
    pub steps: Vec<ChainStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRoot {
    /// A value of a written type.
    Typed(TypeRef),
    /// Members of the calling class and its outer classes.
    Implicit,
    This,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStep {
    Field { name: String },
    Call { name: String, args: i64 },
    /// Parameter `index` of an `arity`-parameter lambda handed to a method of
    /// the value reached so far.
    LambdaParam { index: usize, arity: usize },
}

impl ReceiverChain {
    pub fn new(root: ChainRoot) -> Self {
        Self {
            root,
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, step: ChainStep) -> Self {
        self.steps.push(step);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RefInput {
    pub kind: RefKind,
    pub name: String,
    /// `None` for method references, which match any arity.
    pub arg_count: Option<i64>,
    pub receiver: Receiver,
    pub receiver_type: Option<TypeRef>,
    /// Set for expression receivers whose type is left to the index.
    pub receiver_chain: Option<ReceiverChain>,
    pub caller_class: Option<String>,
    pub line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub call_text: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExtractedFile {
    pub package: String,
    pub imports: Vec<ImportDecl>,
    pub declarations: Vec<DeclInput>,
    pub members: Vec<MemberInput>,
    pub references: Vec<RefInput>,
}

impl ExtractedFile {
    pub fn wildcard_imports(&self) -> Vec<String> {
        self.imports
            .iter()
            .filter(|imp| imp.wildcard && !imp.is_static)
            .map(|imp| imp.path.clone())
            .collect()
    }
}
