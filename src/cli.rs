use crate::watch::WatchMode;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "codeprobe",
    version,
    about = "Symbol resolution, call chains and live diagnostics for Java projects",
    after_help = r#"Examples:
  codeprobe reindex --repo .
  codeprobe describe --repo . com.example.Main --format text
  codeprobe callers --repo . Widget reset
  codeprobe check --repo . Widget.java
  codeprobe request --method resolve --params '{"name":"Widget"}'
  codeprobe serve --repo . --watch auto
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Where the project lives and how it is indexed.
#[derive(ClapArgs, Clone)]
pub struct ProjectArgs {
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Include files ignored by .gitignore.
    #[arg(long)]
    pub no_ignore: bool,
    /// Compiled class directory or jar; repeatable. Added after CODEPROBE_CLASSPATH.
    #[arg(long = "classpath", value_name = "PATH")]
    pub classpath: Vec<PathBuf>,
    /// Dependency source root; repeatable. Added after CODEPROBE_LIBRARY_ROOTS.
    #[arg(long = "library-root", value_name = "PATH")]
    pub library_roots: Vec<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[command(flatten)]
        project: ProjectArgs,
        /// File watch mode: auto|on|off.
        #[arg(long, default_value = "auto")]
        watch: WatchMode,
        /// Debounce window for filesystem events in milliseconds.
        #[arg(long, default_value_t = 300)]
        watch_debounce_ms: u64,
    },
    /// Reindex repository once and exit.
    Reindex {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Run a single JSONL request and exit.
    Request {
        #[command(flatten)]
        project: ProjectArgs,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
    /// Describe a type.
    Describe {
        #[command(flatten)]
        project: ProjectArgs,
        /// Qualified name, simple name or source file name.
        class: String,
        /// Output format: json|text|simple.
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the callers of a method.
    Callers {
        #[command(flatten)]
        project: ProjectArgs,
        class: String,
        method: String,
        /// Output format: json|text.
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Report the errors of one source unit.
    Check {
        #[command(flatten)]
        project: ProjectArgs,
        class: String,
        /// Output format: json|text.
        #[arg(long, default_value = "text")]
        format: String,
        /// Stability timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}
