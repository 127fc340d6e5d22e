//! Compiled-artifact lookup over a classpath of directories and jars.

use crate::host::ArtifactLoader;
use crate::model::{ArtifactInfo, DeclKind, FieldInfo, MethodInfo, ParamInfo};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

pub mod classfile;

use classfile::{ACC_ANNOTATION, ACC_ENUM, ACC_INTERFACE, ParsedClass};

/// Build output directories probed under the project root.
const DEFAULT_OUTPUT_DIRS: &[&str] = &["target/classes", "build/classes/java/main"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Dir(PathBuf),
    Jar(PathBuf),
}

impl Entry {
    fn path(&self) -> &Path {
        match self {
            Entry::Dir(path) | Entry::Jar(path) => path,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classpath {
    entries: Vec<Entry>,
}

impl Classpath {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let entries = paths
            .into_iter()
            .map(|path| {
                if is_archive(&path) {
                    Entry::Jar(path)
                } else {
                    Entry::Dir(path)
                }
            })
            .collect();
        Self { entries }
    }

    /// The project's default build outputs followed by `extra`.
    pub fn for_project(root: &Path, extra: &[PathBuf]) -> Self {
        let mut paths: Vec<PathBuf> = DEFAULT_OUTPUT_DIRS.iter().map(|dir| root.join(dir)).collect();
        paths.extend(extra.iter().cloned());
        Self::new(paths)
    }

    pub fn display_entries(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| crate::util::normalize_path(entry.path()))
            .collect()
    }

    pub fn load(&self, qualname: &str) -> Result<Option<ArtifactInfo>> {
        for internal in candidate_names(qualname) {
            let Some((bytes, location)) = self.read_class(&internal)? else {
                continue;
            };
            let parsed = classfile::parse_class(&bytes)
                .with_context(|| format!("parse class file {location}"))?;
            debug!(qualname, location = %location, "loaded compiled artifact");
            return Ok(Some(to_artifact(qualname, parsed, location)));
        }
        Ok(None)
    }

    fn read_class(&self, internal: &str) -> Result<Option<(Vec<u8>, String)>> {
        let entry_name = format!("{internal}.class");
        for entry in &self.entries {
            match entry {
                Entry::Dir(dir) => {
                    let path = dir.join(&entry_name);
                    if !path.is_file() {
                        continue;
                    }
                    let bytes =
                        std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
                    return Ok(Some((bytes, crate::util::normalize_path(&path))));
                }
                Entry::Jar(jar) => {
                    if !jar.is_file() {
                        continue;
                    }
                    if let Some(bytes) = read_jar_entry(jar, &entry_name)? {
                        let location =
                            format!("{}!/{}", crate::util::normalize_path(jar), entry_name);
                        return Ok(Some((bytes, location)));
                    }
                }
            }
        }
        Ok(None)
    }
}

impl ArtifactLoader for Classpath {
    fn load_artifact(&self, qualname: &str) -> Result<Option<ArtifactInfo>> {
        self.load(qualname)
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("zip"))
}

fn read_jar_entry(jar: &Path, entry_name: &str) -> Result<Option<Vec<u8>>> {
    let file = File::open(jar).with_context(|| format!("open {}", jar.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("read archive {}", jar.display()))?;
    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {entry_name} in {}", jar.display())),
    };
    let mut buffer = Vec::new();
    entry
        .read_to_end(&mut buffer)
        .with_context(|| format!("read {entry_name} in {}", jar.display()))?;
    Ok(Some(buffer))
}

/// Internal names to try for a dotted name: the plain path first, then with
/// trailing segments joined as nested classes (`a/b/Outer$Inner`).
fn candidate_names(qualname: &str) -> Vec<String> {
    let segments: Vec<&str> = qualname.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Vec::new();
    }
    (1..=segments.len())
        .map(|nested| {
            let split = segments.len() - nested;
            let outer = segments[..split].join("/");
            let inner = segments[split..].join("$");
            if outer.is_empty() {
                inner
            } else {
                format!("{outer}/{inner}")
            }
        })
        .collect()
}

fn to_artifact(qualname: &str, parsed: ParsedClass, location: String) -> ArtifactInfo {
    let flags = parsed.declared_flags();
    let kind = if flags & ACC_ANNOTATION != 0 {
        DeclKind::Annotation
    } else if flags & ACC_INTERFACE != 0 {
        DeclKind::Interface
    } else if flags & ACC_ENUM != 0 {
        DeclKind::Enum
    } else {
        DeclKind::Class
    };
    let super_class = match kind {
        DeclKind::Interface | DeclKind::Annotation => None,
        DeclKind::Class | DeclKind::Enum => parsed.super_class.clone(),
    };
    let simple_name = qualname.rsplit('.').next().unwrap_or(qualname).to_string();

    let fields = parsed
        .fields
        .iter()
        .map(|field| FieldInfo {
            name: field.name.clone(),
            ty: field.ty.clone(),
            modifiers: field.modifiers.clone(),
            annotations: field.annotations.clone(),
            has_initializer: field.has_constant,
            span: None,
        })
        .collect();

    let mut methods = Vec::new();
    let mut constructors = Vec::new();
    for method in &parsed.methods {
        let is_constructor = method.is_constructor();
        let info = MethodInfo {
            name: if is_constructor {
                simple_name.clone()
            } else {
                method.name.clone()
            },
            return_type: if is_constructor {
                "void".to_string()
            } else {
                method.return_type.clone()
            },
            parameters: method
                .params
                .iter()
                .map(|(name, ty)| ParamInfo {
                    name: name.clone(),
                    ty: ty.clone(),
                })
                .collect(),
            modifiers: method.modifiers.clone(),
            exceptions: method.exceptions.clone(),
            annotations: method.annotations.clone(),
            is_constructor,
            has_body: method.has_code,
            span: None,
        };
        if is_constructor {
            constructors.push(info);
        } else {
            methods.push(info);
        }
    }

    let inner_classes = parsed
        .member_types()
        .into_iter()
        .map(|(_, simple)| format!("{qualname}.{simple}"))
        .collect();

    ArtifactInfo {
        qualname: qualname.to_string(),
        kind,
        modifiers: classfile::modifiers_from_flags(flags),
        super_class,
        interfaces: parsed.interfaces,
        fields,
        methods,
        constructors,
        inner_classes,
        annotations: parsed.annotations,
        location,
    }
}
