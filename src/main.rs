use anyhow::{Result, anyhow};
use clap::Parser;
use codeprobe::config::Config;
use codeprobe::error::ProbeError;
use codeprobe::project::ProjectOptions;
use codeprobe::{cli, indexer, rpc, watch};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn default_db_path(repo: &Path) -> PathBuf {
    repo.join(".codeprobe").join("index.sqlite")
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("CODEPROBE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the db path and merge CLI paths after the configured ones.
fn project_options(args: cli::ProjectArgs) -> (PathBuf, PathBuf, ProjectOptions) {
    let config = Config::get();
    let db_path = args.db.unwrap_or_else(|| default_db_path(&args.repo));
    let mut classpath = config.classpath.clone();
    classpath.extend(args.classpath);
    let mut library_roots = config.library_roots.clone();
    library_roots.extend(args.library_roots);
    let options = ProjectOptions {
        no_ignore: args.no_ignore,
        classpath,
        library_roots,
        bootstrap: false,
    };
    (args.repo, db_path, options)
}

fn probe_failure(err: ProbeError) -> anyhow::Error {
    match err.details() {
        Some(details) => anyhow!("{err} [{}]\n{details:#}", err.code()),
        None => anyhow!("{err} [{}]", err.code()),
    }
}

/// Run one method against a freshly indexed project and print its result.
fn run_once(project: cli::ProjectArgs, method: &str, params: Value) -> Result<()> {
    let (repo, db_path, options) = project_options(project);
    let app = rpc::App::open_ready(repo, db_path, options)?;
    let value = rpc::handle_method(&app, method, params).map_err(probe_failure)?;
    match value {
        Value::String(text) => print!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Serve {
            project,
            watch: watch_mode,
            watch_debounce_ms,
        } => {
            let watch_config =
                watch::WatchConfig::new(watch_mode, watch_debounce_ms, project.no_ignore);
            let (repo, db_path, options) = project_options(project);
            rpc::serve(repo, db_path, options, watch_config)
        }
        cli::Command::Reindex { project } => {
            let (repo, db_path, options) = project_options(project);
            let mut indexer = indexer::Indexer::new_with_options(
                repo,
                db_path,
                indexer::scan::ScanOptions::new(options.no_ignore),
                options.library_roots,
            )?;
            let stats = indexer.reindex()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        cli::Command::Request {
            project,
            method,
            params,
            params_file,
            id,
        } => {
            let (repo, db_path, options) = project_options(project);
            let params_raw = if let Some(path) = params_file {
                std::fs::read_to_string(&path)?
            } else {
                params
            };
            let response = rpc::call(repo, db_path, options, method, &params_raw, &id)?;
            println!("{response}");
            Ok(())
        }
        cli::Command::Describe {
            project,
            class,
            format,
        } => run_once(
            project,
            "describe",
            json!({ "class": class, "format": format }),
        ),
        cli::Command::Callers {
            project,
            class,
            method,
            format,
        } => run_once(
            project,
            "callers",
            json!({ "class": class, "method": method, "format": format }),
        ),
        cli::Command::Check {
            project,
            class,
            format,
            timeout_ms,
        } => run_once(
            project,
            "check_errors",
            json!({ "class": class, "format": format, "timeout_ms": timeout_ms }),
        ),
    }
}
