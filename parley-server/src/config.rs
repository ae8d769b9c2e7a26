//! Configuration system for the Parley server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/parley-server/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use crate::generator::{
    AnyGenerator, DEFAULT_GEMINI_MODEL, DEFAULT_GENERATOR_TIMEOUT, EchoGenerator, GeminiGenerator,
};
use crate::sequence::{DEFAULT_SEQUENCE_RETRIES, SequenceAssigner};
use crate::service::MessageLimits;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The generator kind is not one of the supported values.
    #[error("unknown generator kind {0:?} (expected \"echo\" or \"gemini\")")]
    UnknownGenerator(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    messages: MessagesFileConfig,
    generator: GeneratorFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    log_level: Option<String>,
}

/// `[messages]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MessagesFileConfig {
    max_text_chars: Option<usize>,
    fetch_default_limit: Option<usize>,
    fetch_max_limit: Option<usize>,
    history_window: Option<usize>,
    sequence_retries: Option<u32>,
}

/// `[generator]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct GeneratorFileConfig {
    kind: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Parley message log server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "PARLEY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/parley-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Reply generator: `echo` or `gemini`.
    #[arg(long, env = "PARLEY_GENERATOR")]
    pub generator: Option<String>,

    /// Gemini model name.
    #[arg(long, env = "GEMINI_MODEL")]
    pub model: Option<String>,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "PARLEY_LOG")]
    pub log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Which reply generator to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    /// Offline echo generator.
    Echo,
    /// Google Gemini.
    Gemini,
}

impl std::str::FromStr for GeneratorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::UnknownGenerator(other.to_string())),
        }
    }
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `127.0.0.1:8000`).
    pub bind_addr: String,
    /// Message length, paging, and history limits.
    pub limits: MessageLimits,
    /// Retries after a sequence conflict.
    pub sequence_retries: u32,
    /// Which generator to run.
    pub generator: GeneratorKind,
    /// Gemini model name.
    pub model: String,
    /// Gemini API key.
    pub api_key: Option<String>,
    /// Upstream generator timeout.
    pub generator_timeout: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            limits: MessageLimits::default(),
            sequence_retries: DEFAULT_SEQUENCE_RETRIES,
            generator: GeneratorKind::Echo,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key: None,
            generator_timeout: DEFAULT_GENERATOR_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or the generator kind is unknown.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let messages = &file.messages;

        let generator = match cli.generator.as_deref().or(file.generator.kind.as_deref()) {
            Some(kind) => kind.parse()?,
            None => defaults.generator,
        };

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            limits: MessageLimits {
                max_text_chars: messages
                    .max_text_chars
                    .unwrap_or(defaults.limits.max_text_chars),
                fetch_default_limit: messages
                    .fetch_default_limit
                    .unwrap_or(defaults.limits.fetch_default_limit),
                fetch_max_limit: messages
                    .fetch_max_limit
                    .unwrap_or(defaults.limits.fetch_max_limit),
                history_window: messages
                    .history_window
                    .unwrap_or(defaults.limits.history_window),
            },
            sequence_retries: messages
                .sequence_retries
                .unwrap_or(defaults.sequence_retries),
            generator,
            model: cli
                .model
                .clone()
                .or_else(|| file.generator.model.clone())
                .unwrap_or(defaults.model),
            api_key: cli.api_key.clone(),
            generator_timeout: file
                .generator
                .timeout_secs
                .map_or(defaults.generator_timeout, Duration::from_secs),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.server.log_level.clone())
                .unwrap_or(defaults.log_level),
        })
    }

    /// Sequence assigner built from the configured retry budget.
    #[must_use]
    pub const fn assigner(&self) -> SequenceAssigner {
        SequenceAssigner::new(self.sequence_retries)
    }

    /// Reply generator built from the configured kind.
    #[must_use]
    pub fn build_generator(&self) -> AnyGenerator {
        match self.generator {
            GeneratorKind::Echo => AnyGenerator::Echo(EchoGenerator),
            GeneratorKind::Gemini => AnyGenerator::Gemini(GeminiGenerator::new(
                self.api_key.clone(),
                self.model.clone(),
                self.generator_timeout,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("parley-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
