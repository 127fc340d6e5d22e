// Configuration module for codeprobe
// Reads from environment variables with sensible defaults

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection pool size (CODEPROBE_POOL_SIZE)
    pub pool_size: u32,

    /// Database connection pool minimum idle connections (CODEPROBE_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Upper bound on the diagnostics stability poll (CODEPROBE_CHECK_TIMEOUT_MS)
    pub check_timeout_ms: u64,

    /// Sleep between diagnostics polls (CODEPROBE_CHECK_POLL_MS)
    pub check_poll_ms: u64,

    /// Wait after asking the engine to open a unit (CODEPROBE_OPEN_DELAY_MS)
    pub open_delay_ms: u64,

    /// Wait after triggering analysis (CODEPROBE_TRIGGER_DELAY_MS)
    pub trigger_delay_ms: u64,

    /// How long an edit buffer stays uncommitted (CODEPROBE_COMMIT_DELAY_MS)
    pub commit_delay_ms: u64,

    /// One-shot commands wait this long for the first index (CODEPROBE_READY_TIMEOUT_SECS)
    pub ready_timeout_secs: u64,

    /// Compiled class roots and jars (CODEPROBE_CLASSPATH, platform path list)
    pub classpath: Vec<PathBuf>,

    /// Dependency source roots, indexed outside project scope (CODEPROBE_LIBRARY_ROOTS)
    pub library_roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_min_idle: 2,
            check_timeout_ms: 5000,
            check_poll_ms: 250,
            open_delay_ms: 300,
            trigger_delay_ms: 100,
            commit_delay_ms: 150,
            ready_timeout_secs: 120,
            classpath: Vec::new(),
            library_roots: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        read_var("CODEPROBE_POOL_SIZE", &mut config.pool_size);
        read_var("CODEPROBE_POOL_MIN_IDLE", &mut config.pool_min_idle);
        read_var("CODEPROBE_CHECK_TIMEOUT_MS", &mut config.check_timeout_ms);
        read_var("CODEPROBE_CHECK_POLL_MS", &mut config.check_poll_ms);
        read_var("CODEPROBE_OPEN_DELAY_MS", &mut config.open_delay_ms);
        read_var("CODEPROBE_TRIGGER_DELAY_MS", &mut config.trigger_delay_ms);
        read_var("CODEPROBE_COMMIT_DELAY_MS", &mut config.commit_delay_ms);
        read_var("CODEPROBE_READY_TIMEOUT_SECS", &mut config.ready_timeout_secs);

        if let Some(val) = env::var_os("CODEPROBE_CLASSPATH") {
            config.classpath = env::split_paths(&val).filter(|p| !p.as_os_str().is_empty()).collect();
        }
        if let Some(val) = env::var_os("CODEPROBE_LIBRARY_ROOTS") {
            config.library_roots = env::split_paths(&val).filter(|p| !p.as_os_str().is_empty()).collect();
        }

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn check_poll(&self) -> Duration {
        Duration::from_millis(self.check_poll_ms.max(1))
    }

    pub fn open_delay(&self) -> Duration {
        Duration::from_millis(self.open_delay_ms)
    }

    pub fn trigger_delay(&self) -> Duration {
        Duration::from_millis(self.trigger_delay_ms)
    }

    pub fn commit_delay(&self) -> Duration {
        Duration::from_millis(self.commit_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

fn read_var<T>(key: &str, slot: &mut T)
where
    T: FromStr + Display,
{
    let Ok(val) = env::var(key) else {
        return;
    };
    match val.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("invalid {key} value: {val}, using default: {slot}"),
    }
}
