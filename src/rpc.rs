//! JSONL request/response dispatch over stdio.

use crate::check::{self, CheckOptions};
use crate::config::Config;
use crate::error::{ProbeError, ProbeResult};
use crate::model::Declaration;
use crate::project::{self, Project, ProjectOptions};
use crate::txn::{Coordinator, ProjectModel};
use crate::watch;
use crate::{callchain, introspect, render, resolve};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    message: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ResolveParams {
    #[serde(alias = "class", alias = "input")]
    name: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct DescribeParams {
    #[serde(alias = "name", alias = "input")]
    class: String,
    /// json (default), text or simple.
    format: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CallersParams {
    #[serde(alias = "name", alias = "input")]
    class: String,
    #[serde(alias = "method_name")]
    method: String,
    format: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CheckErrorsParams {
    #[serde(alias = "name", alias = "input")]
    class: String,
    format: Option<String>,
    /// Overrides the configured stability timeout.
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct EditParams {
    /// Repo-relative path of an indexed source file.
    path: String,
    text: String,
}

#[derive(Debug, Deserialize, Default, schemars::JsonSchema)]
struct ListMethodsParams {
    format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Text,
    Simple,
}

impl Format {
    fn parse(raw: Option<&str>) -> ProbeResult<Self> {
        let raw = raw.unwrap_or("json").trim().to_ascii_lowercase();
        match raw.as_str() {
            "" | "json" => Ok(Format::Json),
            "text" => Ok(Format::Text),
            "simple" => Ok(Format::Simple),
            other => Err(ProbeError::InvalidRequest(format!(
                "unknown format '{other}' (expected json, text or simple)"
            ))),
        }
    }
}

struct MethodDoc {
    name: &'static str,
    summary: &'static str,
    key_params: &'static [&'static str],
}

const METHOD_DOCS: &[MethodDoc] = &[
    MethodDoc {
        name: "list_methods",
        summary: "List supported methods with short descriptions.",
        key_params: &["format (details|names)"],
    },
    MethodDoc {
        name: "resolve",
        summary: "Resolve a qualified name, simple name or file name to declarations.",
        key_params: &["name"],
    },
    MethodDoc {
        name: "describe",
        summary: "Describe a type from source, or from compiled classes for qualified names.",
        key_params: &["class", "format (json|text|simple)"],
    },
    MethodDoc {
        name: "callers",
        summary: "List the call sites of every overload of a method.",
        key_params: &["class", "method", "format (json|text)"],
    },
    MethodDoc {
        name: "check_errors",
        summary: "Open a unit, wait for analysis to settle and report its errors.",
        key_params: &["class", "format (json|text)", "timeout_ms"],
    },
    MethodDoc {
        name: "project_info",
        summary: "Project name, root, index state and counts.",
        key_params: &[],
    },
    MethodDoc {
        name: "list_declarations",
        summary: "Every project declaration with package and kind.",
        key_params: &[],
    },
    MethodDoc {
        name: "status",
        summary: "Server uptime, index state and open units.",
        key_params: &[],
    },
    MethodDoc {
        name: "reindex",
        summary: "Queue a full reindex.",
        key_params: &[],
    },
    MethodDoc {
        name: "edit",
        summary: "Replace a unit's text with an unsaved buffer.",
        key_params: &["path", "text"],
    },
];

fn method_names() -> Vec<&'static str> {
    METHOD_DOCS.iter().map(|doc| doc.name).collect()
}

fn schema_value<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let raw = serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}));
    simplify_schema(raw)
}

/// Simplified JSON Schema for the params of `method`.
pub fn method_param_schema(method: &str) -> Value {
    match method {
        "list_methods" => schema_value::<ListMethodsParams>(),
        "resolve" => schema_value::<ResolveParams>(),
        "describe" => schema_value::<DescribeParams>(),
        "callers" => schema_value::<CallersParams>(),
        "check_errors" => schema_value::<CheckErrorsParams>(),
        "edit" => schema_value::<EditParams>(),
        _ => json!({"type": "object"}),
    }
}

/// Inline definitions and drop root-level noise from schemars output.
fn simplify_schema(mut schema: Value) -> Value {
    let definitions = schema
        .get("definitions")
        .cloned()
        .unwrap_or_else(|| json!({}));
    inline_refs(&mut schema, &definitions);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("definitions");
        obj.remove("title");
    }
    schema
}

/// Inline `$ref`s and collapse `Option<T>` to the inner schema.
fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            let name = map
                .get("$ref")
                .and_then(|r| r.as_str())
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .map(str::to_string);
            if let Some(name) = name {
                if let Some(def) = definitions.get(&name) {
                    let mut inlined = def.clone();
                    inline_refs(&mut inlined, definitions);
                    *value = inlined;
                    return;
                }
            }
            if let Some(types) = map.get("type").and_then(|t| t.as_array()).cloned() {
                let concrete: Vec<&Value> = types.iter().filter(|t| t.as_str() != Some("null")).collect();
                if concrete.len() == 1 {
                    map.insert("type".to_string(), concrete[0].clone());
                }
            }
            for (_, child) in map.iter_mut() {
                inline_refs(child, definitions);
            }
            if map.get("type").and_then(|t| t.as_str()) == Some("integer") {
                map.remove("format");
                map.remove("minimum");
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

fn method_list(params: Value) -> ProbeResult<Value> {
    let params: ListMethodsParams = if params.is_null() {
        ListMethodsParams::default()
    } else {
        parse_params(params)?
    };
    let format = params
        .format
        .as_deref()
        .unwrap_or("details")
        .trim()
        .to_ascii_lowercase();
    if format == "names" || format == "name" || format == "list" {
        return Ok(json!(method_names()));
    }
    let methods: Vec<Value> = METHOD_DOCS
        .iter()
        .map(|doc| {
            json!({
                "name": doc.name,
                "summary": doc.summary,
                "key_params": doc.key_params,
                "params": method_param_schema(doc.name),
            })
        })
        .collect();
    Ok(json!({
        "methods": methods,
        "names": method_names(),
    }))
}

pub struct App {
    coordinator: Coordinator<Project>,
    started: Instant,
}

impl App {
    pub fn open(repo_root: PathBuf, db_path: PathBuf, options: ProjectOptions) -> Result<Self> {
        let project = Project::open(repo_root, db_path, options)?;
        Ok(Self {
            coordinator: Coordinator::with_project(project),
            started: Instant::now(),
        })
    }

    /// Open with a bootstrap reindex and wait for it, for one-shot commands.
    pub fn open_ready(repo_root: PathBuf, db_path: PathBuf, options: ProjectOptions) -> Result<Self> {
        let app = Self::open(
            repo_root,
            db_path,
            ProjectOptions {
                bootstrap: true,
                ..options
            },
        )?;
        let timeout = Config::get().ready_timeout();
        let project = app.coordinator.project()?;
        if !project.engine_handle().wait_until_ready(timeout) {
            warn!(
                timeout_secs = timeout.as_secs(),
                "index still building; requests will report INDEX_BUILDING"
            );
        }
        Ok(app)
    }

    pub fn coordinator(&self) -> &Coordinator<Project> {
        &self.coordinator
    }

    fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let started = Instant::now();
        let id = req.id.clone();
        let result = handle_method(self, &req.method, req.params);
        debug!(
            method = %req.method,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request handled"
        );
        match result {
            Ok(value) => RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => error_response(id, &err),
        }
    }
}

pub fn serve(
    repo_root: PathBuf,
    db_path: PathBuf,
    options: ProjectOptions,
    watch_config: watch::WatchConfig,
) -> Result<()> {
    let app = Arc::new(App::open(
        repo_root,
        db_path,
        ProjectOptions {
            bootstrap: true,
            ..options
        },
    )?);
    let project = app.coordinator.project()?;
    let _watcher = watch::start(
        project.root().to_path_buf(),
        watch_config,
        project.engine_handle().commands(),
    )?;
    drop(project);
    info!("serving JSONL requests on stdin");

    let stdout = Arc::new(Mutex::new(io::stdout()));
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                warn!("stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let app = Arc::clone(&app);
        let stdout = Arc::clone(&stdout);
        workers.retain(|worker| !worker.is_finished());
        workers.push(thread::spawn(move || {
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => app.handle_request(request),
                Err(err) => error_response(
                    Value::Null,
                    &ProbeError::InvalidRequest(err.to_string()),
                ),
            };
            if let Err(err) = write_response(&stdout, &response) {
                warn!("write response failed: {err:#}");
            }
        }));
    }
    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}

fn write_response(stdout: &Mutex<io::Stdout>, response: &RpcResponse) -> Result<()> {
    let line = serde_json::to_string(response)?;
    let mut out = stdout.lock().unwrap_or_else(|e| e.into_inner());
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

pub fn call(
    repo_root: PathBuf,
    db_path: PathBuf,
    options: ProjectOptions,
    method: String,
    params_raw: &str,
    id_raw: &str,
) -> Result<String> {
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let app = App::open_ready(repo_root, db_path, options)?;
    let response = app.handle_request(RpcRequest { id, method, params });
    Ok(serde_json::to_string(&response)?)
}

pub fn handle_method(app: &App, method: &str, params: Value) -> ProbeResult<Value> {
    let coordinator = &app.coordinator;
    let value = match method {
        "list_methods" => method_list(params)?,
        "resolve" => {
            let params: ResolveParams = parse_params(params)?;
            let decls = coordinator.run_read(|txn| resolve::resolve_all(txn, &params.name))??;
            resolution_json(&params.name, decls)
        }
        "describe" => {
            let params: DescribeParams = parse_params(params)?;
            let format = Format::parse(params.format.as_deref())?;
            let info = introspect::introspect(coordinator, &params.class)?;
            match format {
                Format::Json => to_json(&info)?,
                Format::Text => Value::String(render::class_report(&info)),
                Format::Simple => Value::String(render::class_simple(&info)),
            }
        }
        "callers" => {
            let params: CallersParams = parse_params(params)?;
            let format = Format::parse(params.format.as_deref())?;
            let report = callchain::trace(coordinator, &params.class, &params.method)?;
            match format {
                Format::Json => to_json(&report)?,
                Format::Text | Format::Simple => {
                    Value::String(render::call_chain_report(&report))
                }
            }
        }
        "check_errors" => {
            let params: CheckErrorsParams = parse_params(params)?;
            let format = Format::parse(params.format.as_deref())?;
            let mut options = CheckOptions::from_config(Config::get());
            if let Some(ms) = params.timeout_ms {
                options.timeout = Duration::from_millis(ms);
            }
            let report = check::check_errors(coordinator, &params.class, options)?;
            match format {
                Format::Json => to_json(&report)?,
                Format::Text | Format::Simple => Value::String(render::error_report(&report)),
            }
        }
        "project_info" => to_json(&project::project_info(coordinator)?)?,
        "list_declarations" => {
            let declarations = project::list_declarations(coordinator)?;
            json!({
                "count": declarations.len(),
                "declarations": declarations,
            })
        }
        "status" => {
            let project = coordinator.project()?;
            json!({
                "status": "running",
                "project": project.name(),
                "index_state": project.engine().index_state(),
                "open_units": project.engine_handle().open_paths(),
                "uptime_ms": app.started.elapsed().as_millis() as u64,
            })
        }
        "reindex" => {
            let project = coordinator.project()?;
            project.engine_handle().reindex()?;
            json!({ "queued": true })
        }
        "edit" => {
            let params: EditParams = parse_params(params)?;
            let project = coordinator.project()?;
            project.engine_handle().edit(&params.path, params.text)?;
            json!({ "queued": true, "path": params.path })
        }
        other => {
            return Err(ProbeError::InvalidRequest(format!(
                "unknown method '{other}'; see list_methods"
            )));
        }
    };
    Ok(value)
}

fn resolution_json(input: &str, decls: Vec<Declaration>) -> Value {
    let resolution = match decls.len() {
        0 => "not_found",
        1 => "single",
        _ => "ambiguous",
    };
    json!({
        "input": input,
        "resolution": resolution,
        "matches": decls,
    })
}

fn parse_params<T: DeserializeOwned>(params: Value) -> ProbeResult<T> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|err| ProbeError::InvalidRequest(format!("invalid params: {err}")))
}

fn to_json<T: Serialize>(value: &T) -> ProbeResult<Value> {
    Ok(serde_json::to_value(value).context("serialize result")?)
}

fn error_response(id: Value, err: &ProbeError) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            message: err.to_string(),
            code: err.code(),
            details: err.details(),
        }),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!(Format::parse(None).unwrap(), Format::Json);
        assert_eq!(Format::parse(Some(" Text ")).unwrap(), Format::Text);
        assert_eq!(Format::parse(Some("simple")).unwrap(), Format::Simple);
        let err = Format::parse(Some("yaml")).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn request_ids_fall_back_to_strings() {
        assert_eq!(parse_value("7"), json!(7));
        assert_eq!(parse_value("abc"), json!("abc"));
    }

    #[test]
    fn param_schemas_are_inlined_objects() {
        let schema = method_param_schema("callers");
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["class"].is_object());
        assert!(schema["properties"]["method"].is_object());
        assert!(schema.get("$schema").is_none());
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"class"));
        assert!(!required.contains(&"format"));
    }

    #[test]
    fn errors_carry_code_and_details() {
        let err = ProbeError::ambiguous(
            "Widget",
            vec!["com.acme.Widget".to_string(), "com.other.Widget".to_string()],
        );
        let response = serde_json::to_value(error_response(json!(3), &err)).unwrap();
        assert_eq!(response["id"], 3);
        assert!(response.get("result").is_none());
        assert_eq!(response["error"]["code"], "MULTIPLE_MATCHES");
        assert_eq!(response["error"]["details"]["matches"][0], "com.acme.Widget");
    }

    #[test]
    fn missing_params_are_invalid_requests() {
        let err = parse_params::<DescribeParams>(Value::Null).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        let parsed: CallersParams =
            parse_params(json!({"name": "Widget", "method_name": "reset"})).unwrap();
        assert_eq!((parsed.class.as_str(), parsed.method.as_str()), ("Widget", "reset"));
    }

    #[test]
    fn method_list_names_every_method() {
        let names = method_list(json!({"format": "names"})).unwrap();
        assert!(names.as_array().unwrap().contains(&json!("check_errors")));
        let details = method_list(Value::Null).unwrap();
        assert_eq!(
            details["methods"].as_array().unwrap().len(),
            METHOD_DOCS.len()
        );
    }
}
