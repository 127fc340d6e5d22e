use crate::indexer::extract::{
    ChainRoot, ChainStep, DeclInput, ExtractedFile, ImportDecl, MemberInput, Receiver,
    ReceiverChain, RefInput,
};
use crate::model::{
    CALL_TEXT_LIMIT, DeclKind, Marker, MemberKind, Modifier, Modifiers, Param, RefKind, Severity,
    TypeRef,
};
use crate::util;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use tree_sitter::{Node, Parser, Tree};

const PRIMITIVES: &[&str] = &[
    "void", "boolean", "byte", "char", "short", "int", "long", "float", "double",
];

/// `java.lang` types visible without an import.
const JAVA_LANG: &[&str] = &[
    "AssertionError",
    "AutoCloseable",
    "Boolean",
    "Byte",
    "CharSequence",
    "Character",
    "Class",
    "ClassCastException",
    "ClassNotFoundException",
    "CloneNotSupportedException",
    "Cloneable",
    "Comparable",
    "Deprecated",
    "Double",
    "Enum",
    "Error",
    "Exception",
    "Float",
    "FunctionalInterface",
    "IllegalArgumentException",
    "IllegalStateException",
    "IndexOutOfBoundsException",
    "Integer",
    "InterruptedException",
    "Iterable",
    "Long",
    "Math",
    "NullPointerException",
    "Number",
    "NumberFormatException",
    "Object",
    "Override",
    "Record",
    "Runnable",
    "RuntimeException",
    "SafeVarargs",
    "Short",
    "String",
    "StringBuffer",
    "StringBuilder",
    "SuppressWarnings",
    "System",
    "Thread",
    "Throwable",
    "UnsupportedOperationException",
    "Void",
];

const TYPE_DECLARATIONS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "annotation_type_declaration",
    "record_declaration",
];

pub struct JavaExtractor {
    parser: Parser,
}

impl JavaExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_java::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }

    fn parse(&mut self, source: &str) -> Result<Tree> {
        self.parser
            .parse(source, None)
            .context("java parser produced no tree")
    }

    pub fn extract(&mut self, source: &str) -> Result<ExtractedFile> {
        let tree = self.parse(source)?;
        Ok(Walker::extract(tree.root_node(), source))
    }

    pub fn syntax_errors(&mut self, source: &str) -> Result<Vec<Marker>> {
        let tree = self.parse(source)?;
        Ok(collect_syntax_errors(tree.root_node(), source))
    }

    /// Syntax errors, duplicate members and unused imports, ordered by position.
    pub fn analyze(&mut self, source: &str) -> Result<Vec<Marker>> {
        let tree = self.parse(source)?;
        let root = tree.root_node();
        let mut markers = collect_syntax_errors(root, source);
        let extracted = Walker::extract(root, source);
        markers.extend(duplicate_members(&extracted, source));
        markers.extend(unused_imports(root, source));
        markers.sort_by_key(|m| (m.line, m.start_byte));
        Ok(markers)
    }
}

pub fn syntax_errors(source: &str) -> Result<Vec<Marker>> {
    JavaExtractor::new()?.syntax_errors(source)
}

struct TypeScope {
    qualname: String,
    kind: DeclKind,
    type_params: HashSet<String>,
    fields: HashMap<String, TypeRef>,
    superclass: Option<TypeRef>,
}

struct Walker<'a> {
    source: &'a str,
    package: String,
    imports: HashMap<String, String>,
    wildcards: Vec<String>,
    /// Types declared in this file, by simple name and by dotted relative name.
    known: HashMap<String, String>,
    stack: Vec<TypeScope>,
    method_type_params: HashSet<String>,
    /// Lambda parameters in scope, innermost last.
    lambda_params: Vec<HashMap<String, ReceiverChain>>,
    out: ExtractedFile,
}

impl<'a> Walker<'a> {
    fn extract(root: Node<'_>, source: &'a str) -> ExtractedFile {
        let mut walker = Walker {
            source,
            package: String::new(),
            imports: HashMap::new(),
            wildcards: Vec::new(),
            known: HashMap::new(),
            stack: Vec::new(),
            method_type_params: HashSet::new(),
            lambda_params: Vec::new(),
            out: ExtractedFile::default(),
        };
        walker.read_header(root);
        walker.collect_known(root, None);
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if TYPE_DECLARATIONS.contains(&child.kind()) {
                walker.visit_type(child);
            }
        }
        walker.out
    }

    fn read_header(&mut self, root: Node<'_>) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "package_declaration" => {
                    let mut inner = child.walk();
                    for part in child.named_children(&mut inner) {
                        if matches!(part.kind(), "scoped_identifier" | "identifier") {
                            self.package = node_text(part, self.source);
                        }
                    }
                }
                "import_declaration" => {
                    if let Some(import) = parse_import(child, self.source) {
                        if !import.is_static {
                            if import.wildcard {
                                self.wildcards.push(import.path.clone());
                            } else {
                                let simple = last_segment(&import.path).to_string();
                                self.imports.insert(simple, import.path.clone());
                            }
                        }
                        self.out.imports.push(import);
                    }
                }
                _ => {}
            }
        }
        self.out.package = self.package.clone();
    }

    fn collect_known(&mut self, node: Node<'_>, outer: Option<(&str, &str)>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.kind() == "enum_body_declarations" {
                self.collect_known(child, outer);
                continue;
            }
            if !TYPE_DECLARATIONS.contains(&child.kind()) {
                continue;
            }
            let Some(name) = child
                .child_by_field_name("name")
                .map(|n| node_text(n, self.source))
            else {
                continue;
            };
            let (qualname, relative) = match outer {
                Some((outer_qual, outer_rel)) => {
                    (format!("{outer_qual}.{name}"), format!("{outer_rel}.{name}"))
                }
                None => (self.qualify(&name), name.clone()),
            };
            self.known.entry(name.clone()).or_insert_with(|| qualname.clone());
            self.known.insert(relative.clone(), qualname.clone());
            if let Some(body) = child.child_by_field_name("body") {
                self.collect_known(body, Some((&qualname, &relative)));
            }
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.package.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.package, name)
        }
    }

    fn current_class(&self) -> Option<String> {
        self.stack.last().map(|scope| scope.qualname.clone())
    }

    fn visit_type(&mut self, node: Node<'_>) {
        let Some(name) = node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.source))
        else {
            return;
        };
        let outer = self.stack.last();
        let qualname = match outer {
            Some(scope) => format!("{}.{}", scope.qualname, name),
            None => self.qualify(&name),
        };
        let outer_name = outer.map(|scope| scope.qualname.clone());
        let outer_kind = outer.map(|scope| scope.kind);
        let kind = match node.kind() {
            "interface_declaration" => DeclKind::Interface,
            "enum_declaration" => DeclKind::Enum,
            "annotation_type_declaration" => DeclKind::Annotation,
            _ => DeclKind::Class,
        };

        let (mut modifiers, annotations) = self.modifiers(node);
        if matches!(kind, DeclKind::Interface | DeclKind::Annotation) {
            modifiers.insert(Modifier::Abstract);
        }
        if node.kind() == "record_declaration" {
            modifiers.insert(Modifier::Final);
        }
        if outer_kind.is_some() && (kind != DeclKind::Class || node.kind() == "record_declaration")
        {
            modifiers.insert(Modifier::Static);
        }
        if matches!(outer_kind, Some(DeclKind::Interface | DeclKind::Annotation)) {
            modifiers.insert(Modifier::Public);
            modifiers.insert(Modifier::Static);
        }

        self.stack.push(TypeScope {
            qualname: qualname.clone(),
            kind,
            type_params: type_parameters(node, self.source),
            fields: HashMap::new(),
            superclass: None,
        });

        let superclass = node
            .child_by_field_name("superclass")
            .and_then(|n| n.named_child(0))
            .map(|ty| self.type_ref(ty));
        let mut interfaces = Vec::new();
        let interface_list = node.child_by_field_name("interfaces").or_else(|| {
            let mut cursor = node.walk();
            let found = node
                .named_children(&mut cursor)
                .find(|c| c.kind() == "extends_interfaces");
            found
        });
        if let Some(list) = interface_list {
            for ty in type_list(list) {
                interfaces.push(self.type_ref(ty));
            }
        }
        if let Some(scope) = self.stack.last_mut() {
            scope.superclass = superclass.clone();
        }

        let decl_index = self.out.declarations.len();
        self.out.declarations.push(DeclInput {
            qualname: qualname.clone(),
            name,
            kind,
            modifiers,
            superclass,
            interfaces,
            annotations,
            outer: outer_name,
            start_line: start_line(node),
            end_line: end_line(node),
            start_byte: node.start_byte() as i64,
            end_byte: node.end_byte() as i64,
        });

        if node.kind() == "record_declaration" {
            self.record_components(node, decl_index);
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.collect_field_types(body, &qualname);
            self.visit_body(body, decl_index, kind);
        }
        self.stack.pop();
    }

    fn collect_field_types(&mut self, body: Node<'_>, qualname: &str) {
        let mut found = Vec::new();
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            match child.kind() {
                "field_declaration" | "constant_declaration" => {
                    let Some(ty_node) = child.child_by_field_name("type") else {
                        continue;
                    };
                    let ty = self.type_ref(ty_node);
                    let mut declarators = child.walk();
                    for declarator in child.children_by_field_name("declarator", &mut declarators) {
                        if let Some(name) = declarator.child_by_field_name("name") {
                            found.push((node_text(name, self.source), ty.clone()));
                        }
                    }
                }
                "enum_constant" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        let simple = last_segment(qualname).to_string();
                        found.push((
                            node_text(name, self.source),
                            TypeRef::new(simple, Some(qualname.to_string())),
                        ));
                    }
                }
                "enum_body_declarations" => self.collect_field_types(child, qualname),
                _ => {}
            }
        }
        if let Some(scope) = self.stack.last_mut() {
            scope.fields.extend(found);
        }
    }

    fn visit_body(&mut self, body: Node<'_>, decl_index: usize, owner: DeclKind) {
        let mut cursor = body.walk();
        let children: Vec<Node<'_>> = body.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "field_declaration" | "constant_declaration" => {
                    self.visit_field(child, decl_index, owner)
                }
                "method_declaration" | "annotation_type_element_declaration" => {
                    self.visit_method(child, decl_index, owner)
                }
                "constructor_declaration" | "compact_constructor_declaration" => {
                    self.visit_constructor(child, decl_index)
                }
                "enum_constant" => self.visit_enum_constant(child, decl_index),
                "enum_body_declarations" => self.visit_body(child, decl_index, owner),
                "static_initializer" | "block" => {
                    self.collect_refs(child, &HashMap::new());
                }
                kind if TYPE_DECLARATIONS.contains(&kind) => self.visit_type(child),
                _ => {}
            }
        }
    }

    fn visit_field(&mut self, node: Node<'_>, decl_index: usize, owner: DeclKind) {
        let (mut modifiers, annotations) = self.modifiers(node);
        if matches!(owner, DeclKind::Interface | DeclKind::Annotation) {
            modifiers.extend([Modifier::Public, Modifier::Static, Modifier::Final]);
        }
        let Some(ty_node) = node.child_by_field_name("type") else {
            return;
        };
        let base = self.type_ref(ty_node);
        let mut cursor = node.walk();
        let declarators: Vec<Node<'_>> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators {
            let Some(name) = declarator.child_by_field_name("name") else {
                continue;
            };
            let ty = match declarator.child_by_field_name("dimensions") {
                Some(dims) => with_dimensions(&base, &compact(&node_text(dims, self.source))),
                None => base.clone(),
            };
            let value = declarator.child_by_field_name("value");
            self.out.members.push(MemberInput {
                decl_index,
                kind: MemberKind::Field,
                name: node_text(name, self.source),
                ty: Some(ty),
                modifiers: modifiers.clone(),
                params: Vec::new(),
                throws: Vec::new(),
                annotations: annotations.clone(),
                has_body: false,
                has_initializer: value.is_some(),
                start_line: start_line(node),
                end_line: end_line(node),
                start_byte: declarator.start_byte() as i64,
                end_byte: declarator.end_byte() as i64,
            });
            if let Some(value) = value {
                self.collect_refs(value, &HashMap::new());
            }
        }
    }

    fn visit_enum_constant(&mut self, node: Node<'_>, decl_index: usize) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let Some(scope) = self.stack.last() else {
            return;
        };
        let owner = scope.qualname.clone();
        let enum_type = TypeRef::new(last_segment(&owner), Some(owner.clone()));
        self.out.members.push(MemberInput {
            decl_index,
            kind: MemberKind::Field,
            name: node_text(name, self.source),
            ty: Some(enum_type.clone()),
            modifiers: [Modifier::Public, Modifier::Static, Modifier::Final]
                .into_iter()
                .collect(),
            params: Vec::new(),
            throws: Vec::new(),
            annotations: self.modifiers(node).1,
            has_body: false,
            has_initializer: false,
            start_line: start_line(node),
            end_line: end_line(node),
            start_byte: node.start_byte() as i64,
            end_byte: node.end_byte() as i64,
        });
        let arguments = node.child_by_field_name("arguments");
        self.out.references.push(RefInput {
            kind: RefKind::New,
            name: last_segment(&owner).to_string(),
            arg_count: Some(arguments.map(count_args).unwrap_or(0)),
            receiver: Receiver::Type,
            receiver_type: Some(enum_type),
            receiver_chain: None,
            caller_class: Some(owner),
            line: start_line(name),
            start_byte: name.start_byte() as i64,
            end_byte: name.end_byte() as i64,
            call_text: None,
        });
        if let Some(arguments) = arguments {
            self.collect_refs(arguments, &HashMap::new());
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.collect_refs(body, &HashMap::new());
        }
    }

    fn record_components(&mut self, node: Node<'_>, decl_index: usize) {
        let Some(params) = node.child_by_field_name("parameters") else {
            return;
        };
        let components = self.parameters(params);
        let mut fields = Vec::new();
        for param in components {
            fields.push((param.name.clone(), param.ty.clone()));
            self.out.members.push(MemberInput {
                decl_index,
                kind: MemberKind::Field,
                name: param.name,
                ty: Some(param.ty),
                modifiers: [Modifier::Private, Modifier::Final].into_iter().collect(),
                params: Vec::new(),
                throws: Vec::new(),
                annotations: Vec::new(),
                has_body: false,
                has_initializer: false,
                start_line: start_line(params),
                end_line: end_line(params),
                start_byte: params.start_byte() as i64,
                end_byte: params.end_byte() as i64,
            });
        }
        if let Some(scope) = self.stack.last_mut() {
            scope.fields.extend(fields);
        }
    }

    fn visit_method(&mut self, node: Node<'_>, decl_index: usize, owner: DeclKind) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        self.method_type_params = type_parameters(node, self.source);
        let (mut modifiers, annotations) = self.modifiers(node);
        let body = node.child_by_field_name("body");
        match owner {
            DeclKind::Annotation => {
                modifiers.extend([Modifier::Public, Modifier::Abstract]);
            }
            DeclKind::Interface => {
                if !modifiers.contains(&Modifier::Private) {
                    modifiers.insert(Modifier::Public);
                }
                if body.is_none() && !modifiers.contains(&Modifier::Static) {
                    modifiers.insert(Modifier::Abstract);
                }
            }
            _ => {}
        }
        let ty = node.child_by_field_name("type").map(|n| self.type_ref(n));
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();
        let throws = self.throws(node);
        self.out.members.push(MemberInput {
            decl_index,
            kind: MemberKind::Method,
            name: node_text(name, self.source),
            ty,
            modifiers,
            params: params.clone(),
            throws,
            annotations,
            has_body: body.is_some(),
            has_initializer: false,
            start_line: start_line(node),
            end_line: end_line(node),
            start_byte: node.start_byte() as i64,
            end_byte: node.end_byte() as i64,
        });
        if let Some(body) = body {
            let locals = self.locals(body, &params);
            self.collect_refs(body, &locals);
        }
        self.method_type_params.clear();
    }

    fn visit_constructor(&mut self, node: Node<'_>, decl_index: usize) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        self.method_type_params = type_parameters(node, self.source);
        let (modifiers, annotations) = self.modifiers(node);
        let params = match node.child_by_field_name("parameters") {
            Some(p) => self.parameters(p),
            // compact record constructors take the record components
            None => node
                .parent()
                .and_then(|body| body.parent())
                .and_then(|record| record.child_by_field_name("parameters"))
                .map(|p| self.parameters(p))
                .unwrap_or_default(),
        };
        let throws = self.throws(node);
        let body = node.child_by_field_name("body");
        self.out.members.push(MemberInput {
            decl_index,
            kind: MemberKind::Constructor,
            name: node_text(name, self.source),
            ty: None,
            modifiers,
            params: params.clone(),
            throws,
            annotations,
            has_body: body.is_some(),
            has_initializer: false,
            start_line: start_line(node),
            end_line: end_line(node),
            start_byte: node.start_byte() as i64,
            end_byte: node.end_byte() as i64,
        });
        if let Some(body) = body {
            let locals = self.locals(body, &params);
            self.collect_refs(body, &locals);
        }
        self.method_type_params.clear();
    }

    fn parameters(&self, node: Node<'_>) -> Vec<Param> {
        let mut params = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "formal_parameter" => {
                    let (Some(ty), Some(name)) = (
                        child.child_by_field_name("type"),
                        child.child_by_field_name("name"),
                    ) else {
                        continue;
                    };
                    let mut ty = self.type_ref(ty);
                    if let Some(dims) = child.child_by_field_name("dimensions") {
                        ty = with_dimensions(&ty, &compact(&node_text(dims, self.source)));
                    }
                    params.push(Param {
                        name: node_text(name, self.source),
                        ty,
                        varargs: false,
                    });
                }
                "spread_parameter" => {
                    let mut inner = child.walk();
                    let parts: Vec<Node<'_>> = child.named_children(&mut inner).collect();
                    let ty = parts.iter().find(|n| {
                        !matches!(n.kind(), "modifiers" | "variable_declarator")
                            && !n.is_extra()
                    });
                    let name = parts
                        .iter()
                        .find(|n| n.kind() == "variable_declarator")
                        .and_then(|d| d.child_by_field_name("name"));
                    let (Some(ty), Some(name)) = (ty, name) else {
                        continue;
                    };
                    let ty = with_dimensions(&self.type_ref(*ty), "...");
                    params.push(Param {
                        name: node_text(name, self.source),
                        ty,
                        varargs: true,
                    });
                }
                _ => {}
            }
        }
        params
    }

    fn throws(&self, node: Node<'_>) -> Vec<TypeRef> {
        let mut cursor = node.walk();
        let Some(throws) = node
            .named_children(&mut cursor)
            .find(|c| c.kind() == "throws")
        else {
            return Vec::new();
        };
        let mut inner = throws.walk();
        throws
            .named_children(&mut inner)
            .filter(|n| !n.is_extra())
            .map(|n| self.type_ref(n))
            .collect()
    }

    fn modifiers(&self, node: Node<'_>) -> (Modifiers, Vec<String>) {
        let mut modifiers = Modifiers::new();
        let mut annotations = Vec::new();
        let mut cursor = node.walk();
        let Some(list) = node
            .children(&mut cursor)
            .find(|c| c.kind() == "modifiers")
        else {
            return (modifiers, annotations);
        };
        let mut inner = list.walk();
        for child in list.children(&mut inner) {
            if let Some(modifier) = Modifier::parse(child.kind()) {
                modifiers.insert(modifier);
            } else if matches!(child.kind(), "marker_annotation" | "annotation") {
                if let Some(name) = child.child_by_field_name("name") {
                    let text = node_text(name, self.source);
                    annotations.push(last_segment(&text).to_string());
                }
            }
        }
        (modifiers, annotations)
    }

    fn locals(&self, body: Node<'_>, params: &[Param]) -> HashMap<String, TypeRef> {
        let mut locals: HashMap<String, TypeRef> = params
            .iter()
            .map(|p| (p.name.clone(), p.ty.clone()))
            .collect();
        self.collect_locals(body, &mut locals);
        locals
    }

    fn collect_locals(&self, node: Node<'_>, locals: &mut HashMap<String, TypeRef>) {
        match node.kind() {
            "local_variable_declaration" | "resource" => {
                if let Some(ty_node) = node.child_by_field_name("type") {
                    let declared = self.type_ref(ty_node);
                    let mut cursor = node.walk();
                    let declarators: Vec<Node<'_>> = if node.kind() == "resource" {
                        vec![node]
                    } else {
                        node.children_by_field_name("declarator", &mut cursor)
                            .collect()
                    };
                    for declarator in declarators {
                        let Some(name) = declarator.child_by_field_name("name") else {
                            continue;
                        };
                        let ty = if declared.text == "var" {
                            declarator
                                .child_by_field_name("value")
                                .filter(|v| v.kind() == "object_creation_expression")
                                .and_then(|v| v.child_by_field_name("type"))
                                .map(|t| self.type_ref(t))
                        } else {
                            Some(declared.clone())
                        };
                        if let Some(ty) = ty {
                            locals.insert(node_text(name, self.source), ty);
                        }
                    }
                }
            }
            "enhanced_for_statement" | "catch_formal_parameter" => {
                let ty = node.child_by_field_name("type").or_else(|| {
                    let mut cursor = node.walk();
                    let found = node
                        .named_children(&mut cursor)
                        .find(|c| c.kind() == "catch_type");
                    found
                });
                if let (Some(ty), Some(name)) = (ty, node.child_by_field_name("name")) {
                    let ty = match ty.kind() {
                        "catch_type" => ty.named_child(0).map(|t| self.type_ref(t)),
                        _ => Some(self.type_ref(ty)),
                    };
                    if let Some(ty) = ty.filter(|t| t.text != "var") {
                        locals.insert(node_text(name, self.source), ty);
                    }
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_locals(child, locals);
        }
    }

    fn collect_refs(&mut self, node: Node<'_>, locals: &HashMap<String, TypeRef>) {
        match node.kind() {
            "method_invocation" => self.push_call(node, locals),
            "object_creation_expression" => self.push_new(node),
            "method_reference" => self.push_method_ref(node, locals),
            "explicit_constructor_invocation" => self.push_explicit_constructor(node),
            "lambda_expression" => {
                let scope = self.lambda_scope(node, locals);
                self.lambda_params.push(scope);
                if let Some(body) = node.child_by_field_name("body") {
                    self.collect_refs(body, locals);
                }
                self.lambda_params.pop();
                return;
            }
            _ => {}
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.collect_refs(child, locals);
        }
    }

    fn push_call(&mut self, node: Node<'_>, locals: &HashMap<String, TypeRef>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let (receiver, receiver_type, receiver_chain) = match node.child_by_field_name("object") {
            Some(object) => self.receiver(object, locals),
            None => (Receiver::Implicit, None, None),
        };
        self.out.references.push(RefInput {
            kind: RefKind::Call,
            name: node_text(name, self.source),
            arg_count: Some(
                node.child_by_field_name("arguments")
                    .map(count_args)
                    .unwrap_or(0),
            ),
            receiver,
            receiver_type,
            receiver_chain,
            caller_class: self.current_class(),
            line: start_line(name),
            start_byte: name.start_byte() as i64,
            end_byte: name.end_byte() as i64,
            call_text: Some(call_text(node, self.source)),
        });
    }

    fn push_new(&mut self, node: Node<'_>) {
        let Some(ty_node) = node.child_by_field_name("type") else {
            return;
        };
        let ty = self.type_ref(ty_node);
        self.out.references.push(RefInput {
            kind: RefKind::New,
            name: simple_type_name(&ty.text).to_string(),
            arg_count: Some(
                node.child_by_field_name("arguments")
                    .map(count_args)
                    .unwrap_or(0),
            ),
            receiver: Receiver::Type,
            receiver_type: Some(ty),
            receiver_chain: None,
            caller_class: self.current_class(),
            line: start_line(ty_node),
            start_byte: ty_node.start_byte() as i64,
            end_byte: ty_node.end_byte() as i64,
            call_text: enclosing_call_text(node, self.source),
        });
    }

    fn push_method_ref(&mut self, node: Node<'_>, locals: &HashMap<String, TypeRef>) {
        let Some(target) = node.named_child(0) else {
            return;
        };
        let Some(last) = node.child(node.child_count().saturating_sub(1)) else {
            return;
        };
        let call_text = enclosing_call_text(node, self.source);
        if last.kind() == "new" {
            let ty = self.type_ref(target);
            self.out.references.push(RefInput {
                kind: RefKind::New,
                name: simple_type_name(&ty.text).to_string(),
                arg_count: None,
                receiver: Receiver::Type,
                receiver_type: Some(ty),
                receiver_chain: None,
                caller_class: self.current_class(),
                line: start_line(last),
                start_byte: last.start_byte() as i64,
                end_byte: last.end_byte() as i64,
                call_text,
            });
            return;
        }
        if last.kind() != "identifier" {
            return;
        }
        let (receiver, receiver_type, receiver_chain) = self.receiver(target, locals);
        self.out.references.push(RefInput {
            kind: RefKind::MethodRef,
            name: node_text(last, self.source),
            arg_count: None,
            receiver,
            receiver_type,
            receiver_chain,
            caller_class: self.current_class(),
            line: start_line(last),
            start_byte: last.start_byte() as i64,
            end_byte: last.end_byte() as i64,
            call_text,
        });
    }

    fn push_explicit_constructor(&mut self, node: Node<'_>) {
        let Some(scope) = self.stack.last() else {
            return;
        };
        let Some(keyword) = node.child_by_field_name("constructor") else {
            return;
        };
        let target = match keyword.kind() {
            "this" => Some(TypeRef::new(
                last_segment(&scope.qualname),
                Some(scope.qualname.clone()),
            )),
            "super" => scope.superclass.clone(),
            _ => None,
        };
        let Some(target) = target else {
            return;
        };
        self.out.references.push(RefInput {
            kind: RefKind::New,
            name: simple_type_name(&target.text).to_string(),
            arg_count: Some(
                node.child_by_field_name("arguments")
                    .map(count_args)
                    .unwrap_or(0),
            ),
            receiver: Receiver::Type,
            receiver_type: Some(target),
            receiver_chain: None,
            caller_class: self.current_class(),
            line: start_line(keyword),
            start_byte: keyword.start_byte() as i64,
            end_byte: keyword.end_byte() as i64,
            call_text: Some(call_text(node, self.source)),
        });
    }

    fn field_type(&self, name: &str) -> Option<TypeRef> {
        self.stack
            .iter()
            .rev()
            .find_map(|scope| scope.fields.get(name).cloned())
    }

    fn receiver_of(
        &self,
        node: Node<'_>,
        locals: &HashMap<String, TypeRef>,
    ) -> (Receiver, Option<TypeRef>) {
        match node.kind() {
            "this" => (Receiver::This, None),
            "super" => (Receiver::Super, None),
            "identifier" => {
                let name = node_text(node, self.source);
                if self.lambda_param(&name).is_some() {
                    return (Receiver::Expr, None);
                }
                if let Some(ty) = locals.get(&name).cloned().or_else(|| self.field_type(&name)) {
                    return (Receiver::Expr, Some(ty));
                }
                if name.starts_with(char::is_uppercase) {
                    return (Receiver::Type, Some(self.type_ref_from_name(&name)));
                }
                (Receiver::Expr, None)
            }
            "field_access" => {
                let object = node.child_by_field_name("object");
                let field = node.child_by_field_name("field");
                if let (Some(object), Some(field)) = (object, field) {
                    if object.kind() == "this" {
                        let ty = self.field_type(&node_text(field, self.source));
                        return (Receiver::Expr, ty);
                    }
                }
                let text = compact(&node_text(node, self.source));
                let dotted = text
                    .split('.')
                    .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$'));
                if dotted && last_segment(&text).starts_with(char::is_uppercase) {
                    return (Receiver::Type, Some(self.type_ref_from_name(&text)));
                }
                (Receiver::Expr, None)
            }
            "object_creation_expression" => (
                Receiver::Expr,
                node.child_by_field_name("type").map(|t| self.type_ref(t)),
            ),
            "cast_expression" => (
                Receiver::Expr,
                node.child_by_field_name("type").map(|t| self.type_ref(t)),
            ),
            "parenthesized_expression" => match node.named_child(0) {
                Some(inner) => self.receiver_of(inner, locals),
                None => (Receiver::Expr, None),
            },
            "string_literal" => (
                Receiver::Expr,
                Some(TypeRef::new("String", Some("java.lang.String".to_string()))),
            ),
            kind if is_type_node(kind) => (Receiver::Type, Some(self.type_ref(node))),
            _ => (Receiver::Expr, None),
        }
    }

    /// Receiver kind and type, plus a chain for the index to follow when the
    /// type is not visible here.
    fn receiver(
        &self,
        object: Node<'_>,
        locals: &HashMap<String, TypeRef>,
    ) -> (Receiver, Option<TypeRef>, Option<ReceiverChain>) {
        let (receiver, ty) = self.receiver_of(object, locals);
        let chain = match (receiver, &ty) {
            (Receiver::Expr, None) => self.chain_of(object, locals),
            _ => None,
        };
        (receiver, ty, chain)
    }

    fn chain_of(&self, node: Node<'_>, locals: &HashMap<String, TypeRef>) -> Option<ReceiverChain> {
        match node.kind() {
            "this" => Some(ReceiverChain::new(ChainRoot::This)),
            "identifier" => {
                let name = node_text(node, self.source);
                if let Some(chain) = self.lambda_param(&name) {
                    return Some(chain.clone());
                }
                if let Some(ty) = locals.get(&name).cloned().or_else(|| self.field_type(&name)) {
                    return Some(ReceiverChain::new(ChainRoot::Typed(ty)));
                }
                if name.starts_with(char::is_uppercase) {
                    return Some(ReceiverChain::new(ChainRoot::Typed(
                        self.type_ref_from_name(&name),
                    )));
                }
                // inherited field
                Some(ReceiverChain::new(ChainRoot::Implicit).then(ChainStep::Field { name }))
            }
            "field_access" => {
                if let (_, Some(ty)) = self.receiver_of(node, locals) {
                    return Some(ReceiverChain::new(ChainRoot::Typed(ty)));
                }
                let object = node.child_by_field_name("object")?;
                let field = node.child_by_field_name("field")?;
                let base = self.chain_of(object, locals)?;
                Some(base.then(ChainStep::Field {
                    name: node_text(field, self.source),
                }))
            }
            "method_invocation" => {
                let name = node.child_by_field_name("name")?;
                let args = node
                    .child_by_field_name("arguments")
                    .map(count_args)
                    .unwrap_or(0);
                let base = match node.child_by_field_name("object") {
                    Some(object) => self.chain_of(object, locals)?,
                    None => ReceiverChain::new(ChainRoot::Implicit),
                };
                Some(base.then(ChainStep::Call {
                    name: node_text(name, self.source),
                    args,
                }))
            }
            "parenthesized_expression" => self.chain_of(node.named_child(0)?, locals),
            _ => match self.receiver_of(node, locals) {
                (_, Some(ty)) => Some(ReceiverChain::new(ChainRoot::Typed(ty))),
                _ => None,
            },
        }
    }

    fn lambda_param(&self, name: &str) -> Option<&ReceiverChain> {
        self.lambda_params
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
    }

    /// Typed parameters keep their type. Inferred ones are described through
    /// the receiver of the call the lambda is passed to.
    fn lambda_scope(
        &self,
        lambda: Node<'_>,
        locals: &HashMap<String, TypeRef>,
    ) -> HashMap<String, ReceiverChain> {
        let mut scope = HashMap::new();
        let Some(params) = lambda.child_by_field_name("parameters") else {
            return scope;
        };
        let names: Vec<String> = match params.kind() {
            "identifier" => vec![node_text(params, self.source)],
            "inferred_parameters" => {
                let mut cursor = params.walk();
                params
                    .named_children(&mut cursor)
                    .filter(|n| n.kind() == "identifier")
                    .map(|n| node_text(n, self.source))
                    .collect()
            }
            "formal_parameters" => {
                for param in self.parameters(params) {
                    scope.insert(param.name, ReceiverChain::new(ChainRoot::Typed(param.ty)));
                }
                return scope;
            }
            _ => return scope,
        };
        let object = lambda
            .parent()
            .filter(|p| p.kind() == "argument_list")
            .and_then(|args| args.parent())
            .filter(|call| call.kind() == "method_invocation")
            .and_then(|call| call.child_by_field_name("object"));
        let Some(base) = object.and_then(|object| self.chain_of(object, locals)) else {
            return scope;
        };
        let arity = names.len();
        for (index, name) in names.into_iter().enumerate() {
            scope.insert(
                name,
                base.clone().then(ChainStep::LambdaParam { index, arity }),
            );
        }
        scope
    }

    fn type_ref(&self, node: Node<'_>) -> TypeRef {
        TypeRef::new(compact(&node_text(node, self.source)), self.canonical(node))
    }

    fn type_ref_from_name(&self, name: &str) -> TypeRef {
        TypeRef::new(name, self.resolve_dotted(name))
    }

    fn is_type_param(&self, name: &str) -> bool {
        self.method_type_params.contains(name)
            || self.stack.iter().any(|scope| scope.type_params.contains(name))
    }

    fn resolve_simple(&self, name: &str) -> Option<String> {
        if self.is_type_param(name) {
            return Some(name.to_string());
        }
        if let Some(qualname) = self.known.get(name) {
            return Some(qualname.clone());
        }
        if let Some(qualname) = self.imports.get(name) {
            return Some(qualname.clone());
        }
        if JAVA_LANG.contains(&name) {
            return Some(format!("java.lang.{name}"));
        }
        // Without wildcard imports an unqualified type can only live in this package.
        if self.wildcards.is_empty() {
            return Some(self.qualify(name));
        }
        None
    }

    fn resolve_dotted(&self, text: &str) -> Option<String> {
        let Some((first, rest)) = text.split_once('.') else {
            return self.resolve_simple(text);
        };
        if let Some(qualname) = self.known.get(text) {
            return Some(qualname.clone());
        }
        if first.starts_with(char::is_uppercase) {
            return self
                .resolve_simple(first)
                .map(|outer| format!("{outer}.{rest}"));
        }
        Some(text.to_string())
    }

    fn canonical(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            "integral_type" | "floating_point_type" | "boolean_type" | "void_type" => {
                Some(node_text(node, self.source))
            }
            "type_identifier" | "identifier" => self.resolve_simple(&node_text(node, self.source)),
            "scoped_type_identifier" | "scoped_identifier" => {
                self.resolve_dotted(&compact(&node_text(node, self.source)).replace(' ', ""))
            }
            "generic_type" => {
                let base = self.canonical(node.named_child(0)?)?;
                let mut cursor = node.walk();
                let Some(args) = node
                    .named_children(&mut cursor)
                    .find(|c| c.kind() == "type_arguments")
                else {
                    return Some(base);
                };
                let mut inner = args.walk();
                let rendered: Vec<String> = args
                    .named_children(&mut inner)
                    .filter(|n| !n.is_extra())
                    .map(|arg| self.canonical_argument(arg))
                    .collect();
                Some(format!("{base}<{}>", rendered.join(",")))
            }
            "array_type" => {
                let element = self.canonical(node.child_by_field_name("element")?)?;
                let dims = node
                    .child_by_field_name("dimensions")
                    .map(|d| compact(&node_text(d, self.source)).replace(' ', ""))
                    .unwrap_or_default();
                Some(format!("{element}{dims}"))
            }
            "annotated_type" => {
                let count = node.named_child_count();
                self.canonical(node.named_child(count.checked_sub(1)?)?)
            }
            _ => None,
        }
    }

    fn canonical_argument(&self, arg: Node<'_>) -> String {
        if arg.kind() != "wildcard" {
            return self
                .canonical(arg)
                .unwrap_or_else(|| compact(&node_text(arg, self.source)));
        }
        let text = node_text(arg, self.source);
        let count = arg.named_child_count();
        let bound = count
            .checked_sub(1)
            .and_then(|idx| arg.named_child(idx))
            .filter(|n| is_type_node(n.kind()));
        match bound {
            Some(bound) => {
                let keyword = if text.contains("super") { "super" } else { "extends" };
                let rendered = self
                    .canonical(bound)
                    .unwrap_or_else(|| compact(&node_text(bound, self.source)));
                format!("? {keyword} {rendered}")
            }
            None => "?".to_string(),
        }
    }
}

fn parse_import(node: Node<'_>, source: &str) -> Option<ImportDecl> {
    let mut path = None;
    let mut wildcard = false;
    let mut is_static = false;
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "static" => is_static = true,
            "asterisk" => wildcard = true,
            "scoped_identifier" | "identifier" => path = Some(node_text(child, source)),
            _ => {}
        }
    }
    Some(ImportDecl {
        path: path?,
        wildcard,
        is_static,
        line: start_line(node),
    })
}

fn type_parameters(node: Node<'_>, source: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let Some(params) = node.child_by_field_name("type_parameters") else {
        return out;
    };
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        if param.kind() != "type_parameter" {
            continue;
        }
        let mut inner = param.walk();
        let name = param
            .named_children(&mut inner)
            .find(|c| matches!(c.kind(), "type_identifier" | "identifier"));
        if let Some(name) = name {
            out.insert(node_text(name, source));
        }
    }
    out
}

fn type_list(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    let mut out = Vec::new();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "type_list" {
            let mut inner = child.walk();
            out.extend(child.named_children(&mut inner).filter(|n| !n.is_extra()));
        } else if is_type_node(child.kind()) {
            out.push(child);
        }
    }
    out
}

fn is_type_node(kind: &str) -> bool {
    matches!(
        kind,
        "type_identifier"
            | "scoped_type_identifier"
            | "generic_type"
            | "array_type"
            | "integral_type"
            | "floating_point_type"
            | "boolean_type"
            | "void_type"
            | "annotated_type"
    )
}

fn with_dimensions(ty: &TypeRef, suffix: &str) -> TypeRef {
    TypeRef::new(
        format!("{}{}", ty.text, suffix),
        ty.resolved.as_ref().map(|r| format!("{r}{suffix}")),
    )
}

fn count_args(arguments: Node<'_>) -> i64 {
    let mut cursor = arguments.walk();
    arguments
        .named_children(&mut cursor)
        .filter(|n| !n.is_extra())
        .count() as i64
}

fn call_text(node: Node<'_>, source: &str) -> String {
    let raw = source.get(node.start_byte()..node.end_byte()).unwrap_or("");
    util::truncate_chars(raw, CALL_TEXT_LIMIT)
}

/// Text of the nearest enclosing method call, if any.
fn enclosing_call_text(node: Node<'_>, source: &str) -> Option<String> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if matches!(
            parent.kind(),
            "method_invocation" | "explicit_constructor_invocation"
        ) {
            return Some(call_text(parent, source));
        }
        current = parent.parent();
    }
    None
}

fn simple_type_name(text: &str) -> &str {
    let end = text.find(['<', '[']).unwrap_or(text.len());
    last_segment(text[..end].trim())
}

fn last_segment(text: &str) -> &str {
    text.rsplit('.').next().unwrap_or(text)
}

fn compact(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn node_text(node: Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn start_line(node: Node<'_>) -> i64 {
    node.start_position().row as i64 + 1
}

fn end_line(node: Node<'_>) -> i64 {
    node.end_position().row as i64 + 1
}

fn collect_syntax_errors(root: Node<'_>, source: &str) -> Vec<Marker> {
    let mut markers: Vec<Marker> = Vec::new();
    if !root.has_error() {
        return markers;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_missing() || node.is_error() {
            let line = start_line(node);
            if markers.iter().any(|m| m.line == line) {
                continue;
            }
            let message = if node.is_missing() {
                format!("'{}' expected", node.kind())
            } else {
                let snippet = util::truncate_chars(&compact(&node_text(node, source)), 40);
                if snippet.is_empty() {
                    "illegal start of expression".to_string()
                } else {
                    format!("illegal start of expression near '{snippet}'")
                }
            };
            markers.push(Marker {
                severity: Severity::Error,
                line,
                start_byte: node.start_byte() as i64,
                end_byte: node.end_byte() as i64,
                message,
            });
            continue;
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    markers.sort_by_key(|m| (m.line, m.start_byte));
    markers
}

fn duplicate_members(extracted: &ExtractedFile, source: &str) -> Vec<Marker> {
    let mut markers = Vec::new();
    let mut seen: HashSet<(usize, MemberKind, String)> = HashSet::new();
    for member in &extracted.members {
        let Some(owner) = extracted.declarations.get(member.decl_index) else {
            continue;
        };
        let signature = match member.kind {
            MemberKind::Field => member.name.clone(),
            MemberKind::Method | MemberKind::Constructor => {
                let erased: Vec<String> = member
                    .params
                    .iter()
                    .map(|p| erase_generics(&util::presentable_type(&p.ty.text)))
                    .collect();
                format!("{}({})", member.name, erased.join(","))
            }
        };
        let key_kind = match member.kind {
            MemberKind::Field => MemberKind::Field,
            _ => MemberKind::Method,
        };
        if seen.insert((member.decl_index, key_kind, signature.clone())) {
            continue;
        }
        let what = match member.kind {
            MemberKind::Field => "variable",
            MemberKind::Method => "method",
            MemberKind::Constructor => "constructor",
        };
        let line = util::line_of_byte(source, member.start_byte as usize);
        markers.push(Marker {
            severity: Severity::Error,
            line,
            start_byte: member.start_byte,
            end_byte: member.end_byte,
            message: format!(
                "{what} {signature} is already defined in {} {}",
                owner.kind.as_str(),
                owner.name
            ),
        });
    }
    markers
}

fn erase_generics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

fn unused_imports(root: Node<'_>, source: &str) -> Vec<Marker> {
    let mut used = HashSet::new();
    let mut imports = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_declaration" => {
                imports.push(node);
                continue;
            }
            "package_declaration" => continue,
            "type_identifier" | "identifier" => {
                used.insert(node_text(node, source));
            }
            _ => {}
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }

    let mut markers = Vec::new();
    for node in imports {
        let Some(import) = parse_import(node, source) else {
            continue;
        };
        if import.wildcard || import.is_static {
            continue;
        }
        if used.contains(last_segment(&import.path)) {
            continue;
        }
        markers.push(Marker {
            severity: Severity::Warning,
            line: import.line,
            start_byte: node.start_byte() as i64,
            end_byte: node.end_byte() as i64,
            message: "Unused import statement".to_string(),
        });
    }
    markers
}

pub fn is_primitive(text: &str) -> bool {
    PRIMITIVES.contains(&text)
}
