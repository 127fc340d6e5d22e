//! Structured description of a type, from live sources or compiled artifacts.

use crate::error::{ProbeError, ProbeResult};
use crate::host::{SymbolIndex, TypeResolver};
use crate::model::{
    ArtifactInfo, DeclKind, Declaration, FieldInfo, IndexState, MemberKind, MemberRecord,
    MethodInfo, ParamInfo, Provenance, Resolution, Span, StructuredInfo, TypeRef,
};
use crate::resolve::{self, Query};
use crate::txn::{Coordinator, ProjectModel};
use anyhow::Result;
use tracing::debug;

pub const UNKNOWN_TYPE: &str = "unknown";
const OBJECT: &str = "java.lang.Object";
const ENUM: &str = "java.lang.Enum";

/// Canonical rendering, else the presentable one, else `"unknown"`.
pub fn type_name(resolver: &impl TypeResolver, ty: &TypeRef) -> String {
    match resolver.canonical_text(ty) {
        Ok(text) => text,
        Err(canonical_err) => match resolver.presentable_text(ty) {
            Ok(text) => {
                debug!(ty = %ty.text, "canonical type unavailable: {canonical_err:#}");
                text
            }
            Err(_) => UNKNOWN_TYPE.to_string(),
        },
    }
}

pub fn introspect<M: ProjectModel>(
    coordinator: &Coordinator<M>,
    input: &str,
) -> ProbeResult<StructuredInfo> {
    let project = coordinator.project()?;
    if project.engine().index_state() == IndexState::Building {
        return Err(ProbeError::IndexBuilding);
    }

    let live = coordinator.run_read(|txn| -> ProbeResult<Option<StructuredInfo>> {
        match resolve::resolve(txn, input)? {
            Resolution::Single(decl) => Ok(Some(describe(txn, &decl)?)),
            Resolution::Ambiguous(matches) => Err(ProbeError::ambiguous(input, matches)),
            Resolution::NotFound => Ok(None),
        }
    })??;
    if let Some(info) = live {
        return Ok(info);
    }

    let query = Query::parse(input);
    if !query.is_qualified() {
        return Err(ProbeError::not_found(input));
    }
    match project.artifacts().load_artifact(query.base)? {
        Some(artifact) => Ok(from_artifact(artifact)),
        None => Err(ProbeError::not_found(input)),
    }
}

/// Describe one live declaration.
pub fn describe<V>(view: &V, decl: &Declaration) -> Result<StructuredInfo>
where
    V: SymbolIndex + TypeResolver,
{
    let super_class = match &decl.superclass {
        Some(ty) => type_name(view, ty),
        None => implicit_super(decl.kind, &decl.qualname).to_string(),
    };
    let interfaces = decl.interfaces.iter().map(|ty| type_name(view, ty)).collect();

    let mut fields = Vec::new();
    let mut methods = Vec::new();
    let mut constructors = Vec::new();
    for member in view.members_of(decl)? {
        match member.kind {
            MemberKind::Field => fields.push(field_info(view, &member)),
            MemberKind::Method => methods.push(method_info(view, &member)),
            MemberKind::Constructor => constructors.push(method_info(view, &member)),
        }
    }
    let inner_classes = view
        .nested_types(decl)?
        .into_iter()
        .map(|nested| nested.qualname)
        .collect();

    Ok(StructuredInfo {
        name: decl.qualname.clone(),
        simple_name: decl.name.clone(),
        package: package_of(decl),
        kind: decl.kind,
        modifiers: decl.modifiers.clone(),
        super_class,
        interfaces,
        fields,
        methods,
        constructors,
        inner_classes,
        annotations: decl.annotations.clone(),
        file: Some(decl.unit.path.clone()),
        source: Provenance::Source,
    })
}

pub fn from_artifact(artifact: ArtifactInfo) -> StructuredInfo {
    let (package, simple_name) = split_qualname(&artifact.qualname);
    StructuredInfo {
        simple_name: simple_name.to_string(),
        package: package.to_string(),
        kind: artifact.kind,
        modifiers: artifact.modifiers,
        super_class: artifact.super_class.unwrap_or_default(),
        interfaces: artifact.interfaces,
        fields: artifact.fields,
        methods: artifact.methods,
        constructors: artifact.constructors,
        inner_classes: artifact.inner_classes,
        annotations: artifact.annotations,
        file: Some(artifact.location),
        source: Provenance::Compiled,
        name: artifact.qualname,
    }
}

fn implicit_super(kind: DeclKind, qualname: &str) -> &'static str {
    match kind {
        DeclKind::Class if qualname != OBJECT => OBJECT,
        DeclKind::Enum => ENUM,
        _ => "",
    }
}

fn package_of(decl: &Declaration) -> String {
    if !decl.package.is_empty() {
        return decl.package.clone();
    }
    split_qualname(&decl.qualname).0.to_string()
}

fn split_qualname(qualname: &str) -> (&str, &str) {
    qualname.rsplit_once('.').unwrap_or(("", qualname))
}

fn member_span(member: &MemberRecord) -> Span {
    Span {
        file: member.file_name.clone(),
        start_line: member.start_line,
        end_line: member.end_line,
    }
}

fn field_info(resolver: &impl TypeResolver, member: &MemberRecord) -> FieldInfo {
    FieldInfo {
        name: member.name.clone(),
        ty: member
            .ty
            .as_ref()
            .map(|ty| type_name(resolver, ty))
            .unwrap_or_else(|| UNKNOWN_TYPE.to_string()),
        modifiers: member.modifiers.clone(),
        annotations: member.annotations.clone(),
        has_initializer: member.has_initializer,
        span: Some(member_span(member)),
    }
}

fn method_info(resolver: &impl TypeResolver, member: &MemberRecord) -> MethodInfo {
    MethodInfo {
        name: member.name.clone(),
        return_type: member
            .ty
            .as_ref()
            .map(|ty| type_name(resolver, ty))
            .unwrap_or_else(|| "void".to_string()),
        parameters: member
            .params
            .iter()
            .map(|param| ParamInfo {
                name: param.name.clone(),
                ty: type_name(resolver, &param.ty),
            })
            .collect(),
        modifiers: member.modifiers.clone(),
        exceptions: member
            .throws
            .iter()
            .map(|ty| type_name(resolver, ty))
            .collect(),
        annotations: member.annotations.clone(),
        is_constructor: member.kind == MemberKind::Constructor,
        has_body: member.has_body,
        span: Some(member_span(member)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Tiered;

    impl TypeResolver for Tiered {
        fn canonical_text(&self, ty: &TypeRef) -> Result<String> {
            match &ty.resolved {
                Some(resolved) => Ok(resolved.clone()),
                None => bail!("unresolved"),
            }
        }

        fn presentable_text(&self, ty: &TypeRef) -> Result<String> {
            if ty.text.is_empty() {
                bail!("empty");
            }
            Ok(crate::util::presentable_type(&ty.text))
        }
    }

    #[test]
    fn type_names_fall_back_through_three_tiers() {
        let resolved = TypeRef::new("List<String>", Some("java.util.List<java.lang.String>".into()));
        assert_eq!(type_name(&Tiered, &resolved), "java.util.List<java.lang.String>");
        let unresolved = TypeRef::new("com.x.Thing<T>", None);
        assert_eq!(type_name(&Tiered, &unresolved), "Thing<T>");
        let broken = TypeRef::new("", None);
        assert_eq!(type_name(&Tiered, &broken), "unknown");
    }

    #[test]
    fn implicit_supertypes_follow_kind() {
        assert_eq!(implicit_super(DeclKind::Class, "com.acme.Widget"), OBJECT);
        assert_eq!(implicit_super(DeclKind::Class, OBJECT), "");
        assert_eq!(implicit_super(DeclKind::Enum, "com.acme.Color"), ENUM);
        assert_eq!(implicit_super(DeclKind::Interface, "com.acme.Shape"), "");
        assert_eq!(implicit_super(DeclKind::Annotation, "com.acme.Marker"), "");
    }

    #[test]
    fn artifact_conversion_keeps_shape() {
        let artifact = ArtifactInfo {
            qualname: "com.lib.Codec".to_string(),
            kind: DeclKind::Interface,
            modifiers: Default::default(),
            super_class: None,
            interfaces: vec!["java.io.Closeable".to_string()],
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            inner_classes: Vec::new(),
            annotations: vec!["FunctionalInterface".to_string()],
            location: "/libs/codec.jar!/com/lib/Codec.class".to_string(),
        };
        let info = from_artifact(artifact);
        assert_eq!(info.name, "com.lib.Codec");
        assert_eq!(info.simple_name, "Codec");
        assert_eq!(info.package, "com.lib");
        assert_eq!(info.super_class, "");
        assert_eq!(info.source, Provenance::Compiled);
    }
}
