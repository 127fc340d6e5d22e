use codeprobe::project::ProjectOptions;
use codeprobe::rpc;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn temp_repo_dir(label: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    dir.push(format!("codeprobe-{label}-{nanos}-{counter}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn copy_dir(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&path, &target);
        } else {
            std::fs::copy(&path, &target).unwrap();
        }
    }
}

fn setup_repo(fixture: &str) -> (PathBuf, PathBuf) {
    let src = fixture_path(fixture);
    let repo_root = temp_repo_dir(fixture);
    copy_dir(&src, &repo_root);
    let db_path = repo_root.join(".codeprobe").join("index.sqlite");
    (repo_root, db_path)
}

#[test]
fn describe_and_resolve_through_dispatch() {
    let (repo_root, db_path) = setup_repo("java_basic");
    let app = rpc::App::open_ready(repo_root.clone(), db_path, ProjectOptions::default()).unwrap();

    let info = rpc::handle_method(&app, "describe", json!({"class": "com.acme.Widget"})).unwrap();
    assert_eq!(info["name"], "com.acme.Widget");
    assert_eq!(info["type"], "class");
    assert_eq!(info["modifiers"], json!(["public"]));
    assert_eq!(info["fields"][0]["type"], "int");
    assert_eq!(info["source"], "source");

    let text = rpc::handle_method(
        &app,
        "describe",
        json!({"class": "Widget.java", "format": "text"}),
    );
    let err = text.unwrap_err();
    assert_eq!(err.code(), "MULTIPLE_MATCHES");

    let text = rpc::handle_method(
        &app,
        "describe",
        json!({"name": "com.acme.App", "format": "text"}),
    )
    .unwrap();
    let Value::String(report) = text else {
        panic!("text format should render a string");
    };
    assert!(report.starts_with("Class report: com.acme.App\n"));
    assert!(report.contains("Methods (1):"));

    let resolved = rpc::handle_method(&app, "resolve", json!({"name": "Widget"})).unwrap();
    assert_eq!(resolved["resolution"], "ambiguous");
    assert_eq!(resolved["matches"][0]["qualname"], "com.acme.Widget");
    assert_eq!(resolved["matches"][1]["qualname"], "com.other.Widget");

    let resolved = rpc::handle_method(&app, "resolve", json!({"name": "Missing"})).unwrap();
    assert_eq!(resolved["resolution"], "not_found");

    let _ = std::fs::remove_dir_all(&repo_root);
}

#[test]
fn callers_status_and_unknown_methods() {
    let (repo_root, db_path) = setup_repo("java_basic");
    let app = rpc::App::open_ready(repo_root.clone(), db_path, ProjectOptions::default()).unwrap();

    let report = rpc::handle_method(
        &app,
        "callers",
        json!({"class": "com.acme.Widget", "method_name": "reset"}),
    )
    .unwrap();
    assert_eq!(
        report["classes"][0]["overloads"][0]["callers"],
        json!(["com.acme.App.main (App.java:10) -> w.reset()"])
    );

    let status = rpc::handle_method(&app, "status", Value::Null).unwrap();
    assert_eq!(status["index_state"], "ready");

    let info = rpc::handle_method(&app, "project_info", Value::Null).unwrap();
    assert_eq!(info["files"], 4);

    let err = rpc::handle_method(&app, "frobnicate", Value::Null).unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    let err = rpc::handle_method(&app, "callers", json!({"class": "Widget"})).unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    let _ = std::fs::remove_dir_all(&repo_root);
}

#[test]
fn call_wraps_failures_in_error_responses() {
    let (repo_root, db_path) = setup_repo("java_basic");

    let line = rpc::call(
        repo_root.clone(),
        db_path,
        ProjectOptions::default(),
        "describe".to_string(),
        r#"{"class":"com.acme.Nope"}"#,
        "42",
    )
    .unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["id"], 42);
    assert!(response.get("result").is_none());
    assert_eq!(response["error"]["code"], "CLASS_NOT_FOUND");
    assert_eq!(response["error"]["details"]["input"], "com.acme.Nope");

    let _ = std::fs::remove_dir_all(&repo_root);
}
