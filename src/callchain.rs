//! One-hop caller search for a method, across every declaration the class
//! name may refer to.

use crate::error::{ProbeError, ProbeResult};
use crate::host::{ReferenceSearch, Scope, SymbolIndex, TypeResolver};
use crate::introspect::UNKNOWN_TYPE;
use crate::model::{
    CallChainReport, CallSite, ClassCallers, Declaration, IndexState, MemberKind, MemberRecord,
    OverloadCallers, ReferenceSite, TypeRef,
};
use crate::resolve;
use crate::txn::{Coordinator, ProjectModel};
use anyhow::{Result, anyhow};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

pub fn trace<M: ProjectModel>(
    coordinator: &Coordinator<M>,
    input: &str,
    method: &str,
) -> ProbeResult<CallChainReport> {
    let started = Instant::now();
    let project = coordinator.project()?;
    if project.engine().index_state() == IndexState::Building {
        return Err(ProbeError::IndexBuilding);
    }

    let mut report = coordinator.run_read(|txn| -> ProbeResult<CallChainReport> {
        let decls = resolve::resolve_all(txn, input)?;
        if decls.is_empty() {
            return Err(ProbeError::not_found(input));
        }
        let classes = callers_per_class(txn, &decls, method);
        Ok(CallChainReport {
            input: input.to_string(),
            method: method.to_string(),
            matches: decls.iter().map(|d| d.qualname.clone()).collect(),
            found_any_method: classes.iter().any(|c| c.method_found || c.note.is_some()),
            classes,
            elapsed_ms: 0,
        })
    })??;
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        input,
        method,
        classes = report.classes.len(),
        elapsed_ms = report.elapsed_ms,
        "call chain traced"
    );
    Ok(report)
}

/// One entry per declaration. A class that cannot be searched is reported
/// with a note.
pub fn callers_per_class<V>(view: &V, decls: &[Declaration], method: &str) -> Vec<ClassCallers>
where
    V: SymbolIndex + ReferenceSearch + TypeResolver,
{
    decls
        .iter()
        .map(|decl| {
            class_callers(view, decl, method).unwrap_or_else(|err| {
                warn!(class = %decl.qualname, "caller search failed: {err:#}");
                ClassCallers {
                    class: decl.qualname.clone(),
                    method_found: false,
                    overloads: Vec::new(),
                    note: Some(format!("could not search {}: {err:#}", decl.qualname)),
                }
            })
        })
        .collect()
}

/// Callers of every overload of `method` declared directly in `decl`.
pub fn class_callers<V>(view: &V, decl: &Declaration, method: &str) -> Result<ClassCallers>
where
    V: SymbolIndex + ReferenceSearch + TypeResolver,
{
    let targets: Vec<MemberRecord> = view
        .members_of(decl)?
        .into_iter()
        .filter(|member| is_target(member, decl, method))
        .collect();

    let overloads = targets
        .iter()
        .map(|target| OverloadCallers {
            signature: signature(view, target),
            callers: callers_of(view, target),
        })
        .collect();
    Ok(ClassCallers {
        class: decl.qualname.clone(),
        method_found: !targets.is_empty(),
        overloads,
        note: None,
    })
}

fn is_target(member: &MemberRecord, decl: &Declaration, method: &str) -> bool {
    match member.kind {
        MemberKind::Method => member.name == method,
        MemberKind::Constructor => decl.name == method,
        MemberKind::Field => false,
    }
}

/// Rendered call sites in first-seen order. Failures become note lines.
fn callers_of<V>(view: &V, target: &MemberRecord) -> Vec<String>
where
    V: SymbolIndex + ReferenceSearch,
{
    let sites = match view.find_references(target, Scope::Project) {
        Ok(sites) => sites,
        Err(err) => {
            debug!(member = %target.name, "reference search failed: {err:#}");
            return vec![format!("reference search failed: {err:#}")];
        }
    };
    let mut seen = HashSet::new();
    let mut callers = Vec::new();
    for site in &sites {
        let line = match describe_site(view, site) {
            Ok(call_site) => call_site.render(),
            Err(err) => format!(
                "could not describe reference at {}:{}: {err:#}",
                site.file_name, site.line
            ),
        };
        if seen.insert(line.clone()) {
            callers.push(line);
        }
    }
    callers
}

fn describe_site(view: &impl ReferenceSearch, site: &ReferenceSite) -> Result<CallSite> {
    let caller = view
        .enclosing_declaration(site)?
        .ok_or_else(|| anyhow!("no enclosing type"))?;
    let member = view.enclosing_member(site)?;
    Ok(CallSite {
        caller: caller.qualname,
        member: member.map(|m| m.name),
        file: site.file_name.clone(),
        line: site.line,
        call_text: site.call_text.clone(),
        unresolved_receiver: site.unresolved_receiver,
    })
}

/// `"returnType name(ParamType param, ...)"` with unqualified type names.
pub fn signature(resolver: &impl TypeResolver, member: &MemberRecord) -> String {
    let params = member
        .params
        .iter()
        .map(|param| format!("{} {}", short_type(resolver, &param.ty), param.name))
        .collect::<Vec<_>>()
        .join(", ");
    let ret = member
        .ty
        .as_ref()
        .map(|ty| short_type(resolver, ty))
        .unwrap_or_else(|| "void".to_string());
    format!("{ret} {}({params})", member.name)
}

fn short_type(resolver: &impl TypeResolver, ty: &TypeRef) -> String {
    resolver
        .presentable_text(ty)
        .or_else(|_| resolver.canonical_text(ty))
        .unwrap_or_else(|_| UNKNOWN_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeclKind, Modifiers, Origin, Param, SourceUnit};

    struct Plain;

    impl TypeResolver for Plain {
        fn canonical_text(&self, ty: &TypeRef) -> Result<String> {
            ty.resolved.clone().ok_or_else(|| anyhow!("unresolved"))
        }

        fn presentable_text(&self, ty: &TypeRef) -> Result<String> {
            Ok(crate::util::presentable_type(&ty.text))
        }
    }

    fn member(kind: MemberKind, name: &str, ty: Option<&str>, params: &[(&str, &str)]) -> MemberRecord {
        MemberRecord {
            id: 0,
            kind,
            name: name.to_string(),
            owner: "com.acme.Widget".to_string(),
            ty: ty.map(|t| TypeRef::new(t, None)),
            modifiers: Modifiers::new(),
            params: params
                .iter()
                .map(|(name, ty)| Param {
                    name: name.to_string(),
                    ty: TypeRef::new(*ty, None),
                    varargs: false,
                })
                .collect(),
            throws: Vec::new(),
            annotations: Vec::new(),
            has_body: true,
            has_initializer: false,
            file_name: "Widget.java".to_string(),
            start_line: 1,
            end_line: 1,
        }
    }

    /// Index where one class cannot list its members.
    struct OneBrokenClass;

    impl SymbolIndex for OneBrokenClass {
        fn find_by_qualified_name(&self, _: &str, _: Scope) -> Result<Option<Declaration>> {
            Ok(None)
        }
        fn find_by_simple_name(&self, _: &str, _: Scope) -> Result<Vec<Declaration>> {
            Ok(Vec::new())
        }
        fn all_simple_names(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn find_source_units_by_filename(&self, _: &str) -> Result<Vec<SourceUnit>> {
            Ok(Vec::new())
        }
        fn declarations_in_unit(&self, _: &SourceUnit) -> Result<Vec<Declaration>> {
            Ok(Vec::new())
        }
        fn members_of(&self, decl: &Declaration) -> Result<Vec<MemberRecord>> {
            if decl.qualname == "com.broken.Widget" {
                return Err(anyhow!("database disk image is malformed"));
            }
            Ok(vec![member(MemberKind::Method, "reset", None, &[])])
        }
        fn nested_types(&self, _: &Declaration) -> Result<Vec<Declaration>> {
            Ok(Vec::new())
        }
        fn all_declarations(&self, _: Scope) -> Result<Vec<Declaration>> {
            Ok(Vec::new())
        }
    }

    impl ReferenceSearch for OneBrokenClass {
        fn find_references(&self, _: &MemberRecord, _: Scope) -> Result<Vec<ReferenceSite>> {
            Ok(Vec::new())
        }
        fn enclosing_member(&self, _: &ReferenceSite) -> Result<Option<MemberRecord>> {
            Ok(None)
        }
        fn enclosing_declaration(&self, _: &ReferenceSite) -> Result<Option<Declaration>> {
            Ok(None)
        }
    }

    impl TypeResolver for OneBrokenClass {
        fn canonical_text(&self, ty: &TypeRef) -> Result<String> {
            Plain.canonical_text(ty)
        }
        fn presentable_text(&self, ty: &TypeRef) -> Result<String> {
            Plain.presentable_text(ty)
        }
    }

    fn decl(qualname: &str) -> Declaration {
        let (package, name) = qualname.rsplit_once('.').unwrap();
        Declaration {
            id: 0,
            qualname: qualname.to_string(),
            name: name.to_string(),
            kind: DeclKind::Class,
            modifiers: Modifiers::new(),
            package: package.to_string(),
            superclass: None,
            interfaces: Vec::new(),
            annotations: Vec::new(),
            outer: None,
            unit: SourceUnit {
                path: format!("src/{name}.java"),
                name: format!("{name}.java"),
                exists: true,
            },
            origin: Origin::Project,
            start_line: 1,
            end_line: 5,
        }
    }

    #[test]
    fn failing_class_is_noted_and_the_rest_still_searched() {
        let decls = vec![decl("com.broken.Widget"), decl("com.acme.Widget")];
        let classes = callers_per_class(&OneBrokenClass, &decls, "reset");

        assert_eq!(classes.len(), 2);
        assert!(!classes[0].method_found);
        let note = classes[0].note.as_deref().unwrap();
        assert!(note.starts_with("could not search com.broken.Widget"));
        assert!(note.contains("malformed"));

        assert_eq!(classes[1].class, "com.acme.Widget");
        assert!(classes[1].method_found);
        assert_eq!(classes[1].note, None);
        assert_eq!(classes[1].overloads[0].signature, "void reset()");
        assert!(classes[1].overloads[0].callers.is_empty());
    }

    #[test]
    fn signatures_use_presentable_types() {
        let m = member(
            MemberKind::Method,
            "merge",
            Some("java.util.Map<String,Integer>"),
            &[("left", "java.util.List<String>"), ("n", "int")],
        );
        assert_eq!(
            signature(&Plain, &m),
            "Map<String,Integer> merge(List<String> left, int n)"
        );
        let ctor = member(MemberKind::Constructor, "Widget", None, &[]);
        assert_eq!(signature(&Plain, &ctor), "void Widget()");
    }
}
