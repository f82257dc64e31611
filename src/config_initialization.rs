//! Configuration initialization and hierarchy management
//!
//! Precedence, lowest first: built-in defaults, TOML file, environment,
//! command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::toml_config::TomlConfigAdapter;
use crate::domain::model::ColourRange;
use crate::error::{D2vError, D2vResult};
use crate::utils::logging::{LogLevel, LoggingConfig};

/// File picked up from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "d2vindex.toml";

/// How job progress is reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Percentages on stderr
    #[default]
    Console,
    /// One JSON event per line on stderr
    Json,
    /// Progress and messages go through the log
    Log,
    None,
}

impl ProgressMode {
    pub fn parse(value: &str) -> D2vResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(ProgressMode::Console),
            "json" => Ok(ProgressMode::Json),
            "log" => Ok(ProgressMode::Log),
            "none" | "quiet" => Ok(ProgressMode::None),
            other => Err(D2vError::ConfigError {
                message: format!("Invalid progress mode '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    pub input_range: ColourRange,
    pub verify_keyframes: bool,
    /// Write input names relative to the D2V file
    pub relative_paths: bool,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            input_range: ColourRange::Limited,
            verify_keyframes: true,
            relative_paths: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSection {
    pub mode: ProgressMode,
}

/// Complete indexer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub logging: LoggingConfig,
    pub index: IndexSection,
    pub progress: ProgressSection,
    /// TOML file the configuration was read from, if any
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

/// Values given on the command line; `None` leaves the lower layers alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    pub input_range: Option<ColourRange>,
    pub progress: Option<ProgressMode>,
    pub quiet: bool,
    pub no_verify: bool,
    pub relative_paths: bool,
}

/// Environment variables read by [`apply_environment`]
pub const ENV_LOG_LEVEL: &str = "D2VINDEX_LOG_LEVEL";
pub const ENV_INPUT_RANGE: &str = "D2VINDEX_INPUT_RANGE";
pub const ENV_PROGRESS: &str = "D2VINDEX_PROGRESS";

/// Build the effective configuration
pub fn initialize_configuration_hierarchy(cli: &CliOverrides) -> D2vResult<IndexerConfig> {
    let mut config = load_config_file(cli.config_file.as_deref())?;
    apply_environment(&mut config, |key| std::env::var(key).ok())?;
    apply_cli_overrides(&mut config, cli);
    debug!(?config, "Configuration hierarchy initialized");
    Ok(config)
}

/// Explicit file must exist; the default file is optional. Nothing is
/// logged here since logging is configured from the result.
fn load_config_file(explicit: Option<&Path>) -> D2vResult<IndexerConfig> {
    let adapter = TomlConfigAdapter::new();

    let path = match explicit {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Path::new(DEFAULT_CONFIG_FILE),
        None => return Ok(IndexerConfig::default()),
    };

    let mut config = adapter.load(path)?;
    config.loaded_from = Some(path.to_path_buf());
    Ok(config)
}

/// Apply `D2VINDEX_*` overrides, looked up through `lookup`
pub fn apply_environment<F>(config: &mut IndexerConfig, lookup: F) -> D2vResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let mut overrides = 0;

    if let Some(value) = lookup(ENV_LOG_LEVEL) {
        config.logging.level = LogLevel::parse(&value)?;
        overrides += 1;
    }
    if let Some(value) = lookup(ENV_INPUT_RANGE) {
        config.index.input_range =
            ColourRange::parse(&value).ok_or_else(|| D2vError::ConfigError {
                message: format!("Invalid input range '{}' in {}", value, ENV_INPUT_RANGE),
            })?;
        overrides += 1;
    }
    if let Some(value) = lookup(ENV_PROGRESS) {
        config.progress.mode = ProgressMode::parse(&value)?;
        overrides += 1;
    }

    if overrides > 0 {
        debug!("Applied {} environment variable overrides", overrides);
    }
    Ok(())
}

pub fn apply_cli_overrides(config: &mut IndexerConfig, cli: &CliOverrides) {
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(range) = cli.input_range {
        config.index.input_range = range;
    }
    if let Some(mode) = cli.progress {
        config.progress.mode = mode;
    }
    if cli.quiet {
        config.progress.mode = ProgressMode::None;
    }
    if cli.no_verify {
        config.index.verify_keyframes = false;
    }
    if cli.relative_paths {
        config.index.relative_paths = true;
    }
}
