//! Plain-text renderings of the probe reports, for `format: "text"` and
//! `format: "simple"` requests and the one-shot CLI commands.

use crate::model::{
    CallChainReport, Diagnostic, DiagnosticsReport, FieldInfo, MethodInfo, Modifiers, Provenance,
    StructuredInfo, modifiers_text,
};
use std::fmt::Write;

const RULE_WIDTH: usize = 50;
const SECTION_RULE: &str = "=========================";

fn list_or_none(items: &[String], sep: &str) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(sep)
    }
}

/// `"public static "` or `""` when there are no modifiers.
fn prefix(modifiers: &Modifiers) -> String {
    let text = modifiers_text(modifiers);
    if text.is_empty() {
        text
    } else {
        format!("{text} ")
    }
}

fn field_line(field: &FieldInfo) -> String {
    format!("{}{} {}", prefix(&field.modifiers), field.ty, field.name)
}

fn method_line(method: &MethodInfo) -> String {
    let params = method
        .parameters
        .iter()
        .map(|p| format!("{} {}", p.ty, p.name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut line = if method.is_constructor {
        format!("{}{}({params})", prefix(&method.modifiers), method.name)
    } else {
        format!(
            "{}{} {}({params})",
            prefix(&method.modifiers),
            method.return_type,
            method.name
        )
    };
    if !method.exceptions.is_empty() {
        let _ = write!(line, " throws {}", method.exceptions.join(", "));
    }
    line
}

pub fn class_report(info: &StructuredInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Class report: {}", info.name);
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "Package: {}", info.package);
    let _ = writeln!(out, "Kind: {}", info.kind.as_str());
    let _ = writeln!(out, "Modifiers: {}", modifiers_text(&info.modifiers));
    let super_class = if info.super_class.is_empty() {
        "none"
    } else {
        info.super_class.as_str()
    };
    let _ = writeln!(out, "Superclass: {super_class}");
    let _ = writeln!(out, "Interfaces: {}", list_or_none(&info.interfaces, ", "));
    if !info.annotations.is_empty() {
        let _ = writeln!(out, "Annotations: @{}", info.annotations.join(" @"));
    }
    let source = match info.source {
        Provenance::Source => "source",
        Provenance::Compiled => "compiled",
    };
    let _ = writeln!(out, "Source: {source}");
    if let Some(file) = &info.file {
        let _ = writeln!(out, "File: {file}");
    }

    let sections: [(&str, Vec<String>); 4] = [
        ("Fields", info.fields.iter().map(field_line).collect()),
        (
            "Constructors",
            info.constructors.iter().map(method_line).collect(),
        ),
        ("Methods", info.methods.iter().map(method_line).collect()),
        ("Inner classes", info.inner_classes.clone()),
    ];
    for (title, lines) in sections {
        if lines.is_empty() {
            continue;
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{title} ({}):", lines.len());
        for line in lines {
            let _ = writeln!(out, "  {line}");
        }
    }
    out
}

/// One line per member, terminated like a declaration.
pub fn class_simple(info: &StructuredInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", info.name);
    for field in &info.fields {
        let _ = writeln!(out, "- {};", field_line(field));
    }
    for method in info.constructors.iter().chain(info.methods.iter()) {
        let _ = writeln!(out, "- {};", method_line(method));
    }
    out
}

pub fn call_chain_report(report: &CallChainReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Call chain for {}.{}", report.input, report.method);
    if report.matches.len() > 1 {
        let _ = writeln!(out, "Matched {} classes:", report.matches.len());
        for name in &report.matches {
            let _ = writeln!(out, "  - {name}");
        }
    }
    let _ = writeln!(out, "{SECTION_RULE}");

    for class in &report.classes {
        let _ = writeln!(out);
        let _ = writeln!(out, "[class {}]", class.class);
        if let Some(note) = &class.note {
            let _ = writeln!(out, "{note}");
            continue;
        }
        if !class.method_found {
            let _ = writeln!(
                out,
                "method {} not found in {}",
                report.method, class.class
            );
            continue;
        }
        for (index, overload) in class.overloads.iter().enumerate() {
            let _ = writeln!(out, "[overload {}] {}", index + 1, overload.signature);
            if overload.callers.is_empty() {
                let _ = writeln!(out, "  no callers found");
                continue;
            }
            let _ = writeln!(out, "  {} caller(s):", overload.callers.len());
            for (n, caller) in overload.callers.iter().enumerate() {
                let _ = writeln!(out, "  {}. {caller}", n + 1);
            }
        }
    }

    if !report.found_any_method {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Hint: check the method name; method names are case-sensitive."
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Finished in {} ms", report.elapsed_ms);
    out
}

fn diagnostic_block(out: &mut String, diagnostic: &Diagnostic) {
    let _ = writeln!(out, "  - line {}: {}", diagnostic.line, diagnostic.message);
    for line in &diagnostic.context {
        let marker = if line.marked { ">>> " } else { "    " };
        let _ = writeln!(out, "    {marker}{}: {}", line.line, line.text);
    }
}

pub fn error_report(report: &DiagnosticsReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Diagnostics for {}", report.class);
    let _ = writeln!(out, "File: {}", report.file_name);
    let _ = writeln!(out, "Path: {}", report.path);
    let _ = writeln!(out, "State: {}", report.state.as_str());
    let _ = writeln!(out);

    if report.errors.is_empty() && report.warning_count == 0 {
        let _ = writeln!(out, "No errors or warnings found.");
    } else {
        if !report.errors.is_empty() {
            let _ = writeln!(out, "{} error(s):", report.errors.len());
            for diagnostic in &report.errors {
                diagnostic_block(&mut out, diagnostic);
            }
        }
        if report.warning_count > 0 {
            let _ = writeln!(out, "{} warning(s)", report.warning_count);
        }
    }
    if report.info_count > 0 {
        let _ = writeln!(out, "{} info message(s)", report.info_count);
    }
    if !report.notes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Notes:");
        for note in &report.notes {
            let _ = writeln!(out, "  - {note}");
        }
    }
    if let Some(caveat) = &report.caveat {
        let _ = writeln!(out);
        let _ = writeln!(out, "Caveat: {caveat}");
    }
    out
}
