//! Process lifecycle: operating mode, default logger configuration, the
//! closer registry, and the default validator registry.
//!
//! These are the framework's acknowledged pieces of global state. They are
//! meant to be configured once at startup, before any request is served;
//! all of them sit behind reader-writer locks so production code that does
//! reconfigure late stays safe, if not fast.

use std::error::Error as StdError;
use std::io::IsTerminal;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing_subscriber::EnvFilter;

use crate::error::ValidationError;

/// Environment variable consulted for the initial operating mode.
pub const MODE_ENV_VAR: &str = "TRELLIS_MODE";

/// The framework's self-configuration profile.
///
/// Precedence: programmatic [`set_mode`] > the [`MODE_ENV_VAR`] environment
/// variable (case-insensitive) > the built-in default, [`Mode::Debug`].
///
/// Mode affects the default log level, ANSI color and caller info, and
/// whether the global error handler includes diagnostic fields in response
/// bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Debug,
    Test,
    Release,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Test => "test",
            Self::Release => "release",
        }
    }

    fn from_env() -> Self {
        match std::env::var(MODE_ENV_VAR) {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "debug" => Self::Debug,
                "test" => Self::Test,
                "release" => Self::Release,
                other => {
                    tracing::warn!(value = other, "unrecognized {MODE_ENV_VAR} — using debug");
                    Self::Debug
                }
            },
            Err(_) => Self::Debug,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static MODE: Lazy<RwLock<Mode>> = Lazy::new(|| RwLock::new(Mode::from_env()));

/// Returns the current operating mode.
pub fn mode() -> Mode {
    *MODE.read()
}

/// Overrides the operating mode. Call before serving requests.
pub fn set_mode(mode: Mode) {
    *MODE.write() = mode;
}

/// Log output format for [`init_logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the default logger.
#[derive(Debug, Clone, Default)]
pub struct LoggerConfig {
    pub format: LogFormat,
    /// Overrides the mode-derived default level filter (`debug` in debug
    /// mode, `info` otherwise). `RUST_LOG` wins over both.
    pub level: Option<String>,
}

/// Installs the process-wide tracing subscriber according to the operating
/// mode: debug level, ANSI color, and caller info in debug mode on a TTY;
/// info level otherwise. A second call is a no-op (the first subscriber
/// stays installed).
pub fn init_logging(config: LoggerConfig) {
    let mode = mode();
    let default_level = config.level.unwrap_or_else(|| {
        match mode {
            Mode::Debug => "debug",
            Mode::Test | Mode::Release => "info",
        }
        .to_owned()
    });
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let on_tty = std::io::stdout().is_terminal();
    let decorate = mode == Mode::Debug && on_tty;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(decorate)
        .with_file(decorate)
        .with_line_number(decorate);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("logging already initialized — keeping existing subscriber");
    }
}

type CloseFn = Box<dyn FnOnce() -> Result<(), Box<dyn StdError + Send + Sync>> + Send>;

static CLOSERS: Lazy<Mutex<Vec<(String, CloseFn)>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Registers a named close callback run during graceful shutdown.
///
/// Components that allocate background resources (janitor tasks, connection
/// pools) register here so shutdown can tear them down.
pub fn register_closer(
    name: impl Into<String>,
    close: impl FnOnce() -> Result<(), Box<dyn StdError + Send + Sync>> + Send + 'static,
) {
    CLOSERS.lock().push((name.into(), Box::new(close)));
}

/// Runs all registered closers in LIFO order, draining the registry.
/// A failing closer is logged and never aborts the remainder.
pub fn run_closers() {
    let mut closers = std::mem::take(&mut *CLOSERS.lock());
    while let Some((name, close)) = closers.pop() {
        match close() {
            Ok(()) => tracing::debug!(closer = %name, "closed"),
            Err(error) => tracing::error!(closer = %name, %error, "closer failed"),
        }
    }
}

/// Number of closers currently registered. Exposed for shutdown diagnostics.
pub fn closer_count() -> usize {
    CLOSERS.lock().len()
}

/// Capability interface for payload validation, consulted by
/// [`Context::bind_and_validate`](crate::Context::bind_and_validate).
pub trait Validator: Send + Sync {
    fn validate(&self, value: &serde_json::Value) -> Result<(), ValidationError>;
}

static VALIDATOR: Lazy<RwLock<Option<Arc<dyn Validator>>>> = Lazy::new(|| RwLock::new(None));

/// Installs the process-default validator.
pub fn set_default_validator(validator: Arc<dyn Validator>) {
    *VALIDATOR.write() = Some(validator);
}

/// Returns the process-default validator, if one is installed.
pub fn default_validator() -> Option<Arc<dyn Validator>> {
    VALIDATOR.read().clone()
}
