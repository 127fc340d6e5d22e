//! Name resolution: qualified names, simple names, source file names and a
//! fuzzy fallback, tried in that order.

use crate::host::{Scope, SymbolIndex};
use crate::model::{Declaration, Resolution};
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::debug;

pub const SOURCE_SUFFIXES: &[&str] = &[".java", ".kt"];

/// A user-supplied name split into the forms the stages look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query<'a> {
    /// Input with any source suffix removed.
    pub base: &'a str,
    pub had_suffix: bool,
}

impl<'a> Query<'a> {
    pub fn parse(input: &'a str) -> Self {
        let trimmed = input.trim();
        for suffix in SOURCE_SUFFIXES {
            if let Some(base) = trimmed.strip_suffix(suffix) {
                if !base.is_empty() {
                    return Self {
                        base,
                        had_suffix: true,
                    };
                }
            }
        }
        Self {
            base: trimmed,
            had_suffix: false,
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.base.contains('.')
    }
}

pub fn resolve(index: &impl SymbolIndex, input: &str) -> Result<Resolution> {
    let mut found = resolve_all(index, input)?;
    Ok(match found.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Single(found.remove(0)),
        _ => Resolution::Ambiguous(found.into_iter().map(|d| d.qualname).collect()),
    })
}

/// Every declaration the input may name, one per qualified name, sorted.
pub fn resolve_all(index: &impl SymbolIndex, input: &str) -> Result<Vec<Declaration>> {
    let query = Query::parse(input);
    if query.base.is_empty() {
        return Ok(Vec::new());
    }

    if query.is_qualified() {
        if let Some(decl) = index.find_by_qualified_name(query.base, Scope::All)? {
            return Ok(vec![decl]);
        }
    }

    let simple = query.base;
    let mut found = Matches::default();
    found.extend(index.find_by_simple_name(simple, Scope::All)?);
    if !found.is_empty() {
        return Ok(found.into_sorted());
    }

    for suffix in SOURCE_SUFFIXES {
        let file_name = format!("{simple}{suffix}");
        let units = match index.find_source_units_by_filename(&file_name) {
            Ok(units) => units,
            Err(err) => {
                debug!(file_name = %file_name, "source unit lookup failed: {err:#}");
                continue;
            }
        };
        for unit in units {
            match index.declarations_in_unit(&unit) {
                Ok(decls) => found.extend(decls.into_iter().filter(|d| d.name == simple)),
                Err(err) => debug!(path = %unit.path, "skip unit: {err:#}"),
            }
        }
    }
    if !found.is_empty() {
        return Ok(found.into_sorted());
    }

    let needle = simple.to_lowercase();
    for name in index.all_simple_names()? {
        if name.to_lowercase().contains(&needle) {
            found.extend(index.find_by_simple_name(&name, Scope::Project)?);
        }
    }
    Ok(found.into_sorted())
}

#[derive(Default)]
struct Matches {
    by_qualname: BTreeMap<String, Declaration>,
}

impl Matches {
    fn extend(&mut self, decls: impl IntoIterator<Item = Declaration>) {
        for decl in decls {
            self.by_qualname.entry(decl.qualname.clone()).or_insert(decl);
        }
    }

    fn is_empty(&self) -> bool {
        self.by_qualname.is_empty()
    }

    fn into_sorted(self) -> Vec<Declaration> {
        self.by_qualname.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeclKind, MemberRecord, Modifiers, Origin, SourceUnit};
    use anyhow::anyhow;
    use std::cell::RefCell;

    fn decl(qualname: &str, path: &str, origin: Origin) -> Declaration {
        let name = qualname.rsplit('.').next().unwrap().to_string();
        Declaration {
            id: 0,
            qualname: qualname.to_string(),
            name,
            kind: DeclKind::Class,
            modifiers: Modifiers::new(),
            package: String::new(),
            superclass: None,
            interfaces: Vec::new(),
            annotations: Vec::new(),
            outer: None,
            unit: SourceUnit {
                path: path.to_string(),
                name: crate::util::file_name_of(path),
                exists: true,
            },
            origin,
            start_line: 1,
            end_line: 1,
        }
    }

    /// In-memory index that records which lookups ran.
    #[derive(Default)]
    struct FakeIndex {
        decls: Vec<Declaration>,
        broken_units: Vec<String>,
        /// Qualified names the simple-name lookup does not see yet.
        hidden: Vec<String>,
        calls: RefCell<Vec<&'static str>>,
    }

    impl FakeIndex {
        fn visible(&self, scope: Scope) -> impl Iterator<Item = &Declaration> {
            self.decls
                .iter()
                .filter(move |d| scope == Scope::All || d.origin == Origin::Project)
        }
    }

    impl SymbolIndex for FakeIndex {
        fn find_by_qualified_name(&self, qualname: &str, scope: Scope) -> Result<Option<Declaration>> {
            self.calls.borrow_mut().push("qualified");
            Ok(self.visible(scope).find(|d| d.qualname == qualname).cloned())
        }

        fn find_by_simple_name(&self, name: &str, scope: Scope) -> Result<Vec<Declaration>> {
            self.calls.borrow_mut().push("simple");
            Ok(self
                .visible(scope)
                .filter(|d| d.name == name && !self.hidden.contains(&d.qualname))
                .cloned()
                .collect())
        }

        fn all_simple_names(&self) -> Result<Vec<String>> {
            self.calls.borrow_mut().push("names");
            let mut names: Vec<String> = self.decls.iter().map(|d| d.name.clone()).collect();
            names.sort();
            names.dedup();
            Ok(names)
        }

        fn find_source_units_by_filename(&self, file_name: &str) -> Result<Vec<SourceUnit>> {
            self.calls.borrow_mut().push("units");
            let mut units: Vec<SourceUnit> = self
                .decls
                .iter()
                .filter(|d| d.unit.name == file_name)
                .map(|d| d.unit.clone())
                .collect();
            units.dedup();
            Ok(units)
        }

        fn declarations_in_unit(&self, unit: &SourceUnit) -> Result<Vec<Declaration>> {
            if self.broken_units.contains(&unit.path) {
                return Err(anyhow!("unreadable"));
            }
            Ok(self
                .decls
                .iter()
                .filter(|d| d.unit.path == unit.path)
                .cloned()
                .collect())
        }

        fn members_of(&self, _decl: &Declaration) -> Result<Vec<MemberRecord>> {
            Ok(Vec::new())
        }

        fn nested_types(&self, _decl: &Declaration) -> Result<Vec<Declaration>> {
            Ok(Vec::new())
        }

        fn all_declarations(&self, scope: Scope) -> Result<Vec<Declaration>> {
            Ok(self.visible(scope).cloned().collect())
        }
    }

    fn widgets() -> FakeIndex {
        FakeIndex {
            decls: vec![
                decl("com.other.Widget", "src/com/other/Widget.java", Origin::Project),
                decl("com.acme.Widget", "src/com/acme/Widget.java", Origin::Project),
                decl("com.acme.App", "src/com/acme/App.java", Origin::Project),
                decl("lib.Gadget", "/deps/lib/Gadget.java", Origin::Library),
            ],
            ..FakeIndex::default()
        }
    }

    #[test]
    fn qualified_name_short_circuits() {
        let index = widgets();
        let found = resolve(&index, "com.acme.Widget").unwrap();
        match found {
            Resolution::Single(decl) => assert_eq!(decl.qualname, "com.acme.Widget"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*index.calls.borrow(), vec!["qualified"]);
    }

    #[test]
    fn simple_name_collisions_are_sorted() {
        let index = widgets();
        assert_eq!(
            resolve(&index, "Widget").unwrap(),
            Resolution::Ambiguous(vec![
                "com.acme.Widget".to_string(),
                "com.other.Widget".to_string()
            ])
        );
    }

    #[test]
    fn file_name_input_strips_suffix() {
        let index = widgets();
        let found = resolve(&index, "App.java").unwrap();
        assert!(matches!(found, Resolution::Single(ref d) if d.qualname == "com.acme.App"));
    }

    #[test]
    fn dependency_declarations_resolve_by_simple_name() {
        let index = widgets();
        let found = resolve(&index, "Gadget").unwrap();
        assert!(matches!(found, Resolution::Single(ref d) if d.qualname == "lib.Gadget"));
    }

    #[test]
    fn unit_scan_recovers_declarations_missing_from_name_lookup() {
        let mut index = FakeIndex::default();
        index
            .decls
            .push(decl("com.acme.Fresh", "src/com/acme/Fresh.java", Origin::Project));
        index.hidden.push("com.acme.Fresh".to_string());

        let found = resolve_all(&index, "Fresh").unwrap();
        let names: Vec<&str> = found.iter().map(|d| d.qualname.as_str()).collect();
        assert_eq!(names, vec!["com.acme.Fresh"]);
        assert!(index.calls.borrow().contains(&"units"));
        assert!(!index.calls.borrow().contains(&"names"));
    }

    #[test]
    fn broken_units_do_not_fail_resolution() {
        let mut index = FakeIndex::default();
        index.broken_units.push("src/a/Thing.java".to_string());
        index
            .decls
            .push(decl("a.Unrelated", "src/a/Thing.java", Origin::Project));
        index
            .decls
            .push(decl("b.Thing2", "src/b/Thing.java", Origin::Project));

        // "Thing" has no exact match; the unit scan fails for one file and
        // finds nothing named Thing in the other, so fuzzy matching runs.
        let found = resolve_all(&index, "Thing").unwrap();
        let names: Vec<&str> = found.iter().map(|d| d.qualname.as_str()).collect();
        assert_eq!(names, vec!["b.Thing2"]);
        assert!(index.calls.borrow().contains(&"units"));
        assert!(index.calls.borrow().contains(&"names"));
    }

    #[test]
    fn fuzzy_fallback_is_case_insensitive_and_project_scoped() {
        let index = widgets();
        let found = resolve_all(&index, "widg").unwrap();
        let names: Vec<&str> = found.iter().map(|d| d.qualname.as_str()).collect();
        assert_eq!(names, vec!["com.acme.Widget", "com.other.Widget"]);

        assert!(resolve_all(&index, "gadg").unwrap().is_empty());
    }

    #[test]
    fn unknown_and_empty_inputs_are_not_found() {
        let index = widgets();
        assert_eq!(resolve(&index, "Nothing").unwrap(), Resolution::NotFound);
        assert_eq!(resolve(&index, "  ").unwrap(), Resolution::NotFound);
    }

    #[test]
    fn query_parsing() {
        assert_eq!(
            Query::parse(" Widget.java "),
            Query {
                base: "Widget",
                had_suffix: true
            }
        );
        assert!(Query::parse("com.acme.Widget").is_qualified());
        assert!(!Query::parse("Widget.kt").is_qualified());
        assert_eq!(Query::parse(".java").base, ".java");
    }
}
