// TOML config adapter - Indexer configuration stored in TOML files

use std::path::Path;

use tracing::info;

use crate::config_initialization::IndexerConfig;
use crate::error::{D2vError, D2vResult};

/// Reads and writes [`IndexerConfig`] as TOML
#[derive(Debug, Default, Clone)]
pub struct TomlConfigAdapter;

impl TomlConfigAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Parse a TOML document. Missing sections and keys keep their defaults.
    pub fn parse(&self, toml_content: &str) -> D2vResult<IndexerConfig> {
        toml::from_str(toml_content).map_err(|e| D2vError::ConfigError {
            message: format!("Failed to parse TOML config: {}", e),
        })
    }

    pub fn serialize(&self, config: &IndexerConfig) -> D2vResult<String> {
        toml::to_string_pretty(config).map_err(|e| D2vError::ConfigError {
            message: format!("Failed to serialize config: {}", e),
        })
    }

    pub fn load(&self, path: &Path) -> D2vResult<IndexerConfig> {
        if !path.exists() {
            return Err(D2vError::ConfigError {
                message: format!("Config file does not exist: {}", path.display()),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| D2vError::ConfigError {
            message: format!("Failed to read config file: {}", e),
        })?;

        self.parse(&content)
    }

    pub fn save(&self, config: &IndexerConfig, path: &Path) -> D2vResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| D2vError::ConfigError {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = self.serialize(config)?;
        std::fs::write(path, content).map_err(|e| D2vError::ConfigError {
            message: format!("Failed to write config file: {}", e),
        })?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_initialization::ProgressMode;
    use crate::domain::model::ColourRange;
    use crate::utils::logging::LogLevel;
    use tempfile::TempDir;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = TomlConfigAdapter::new()
            .parse("[index]\ninput_range = \"full\"\n\n[progress]\nmode = \"none\"\n")
            .unwrap();

        assert_eq!(config.index.input_range, ColourRange::Full);
        assert!(config.index.verify_keyframes);
        assert_eq!(config.progress.mode, ProgressMode::None);
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("d2vindex.toml");
        let adapter = TomlConfigAdapter::new();

        let mut config = IndexerConfig::default();
        config.index.relative_paths = true;
        config.logging.level = LogLevel::Debug;

        adapter.save(&config, &path).unwrap();
        assert_eq!(adapter.load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = TomlConfigAdapter::new()
            .parse("[index]\ninput_range = \"sideways\"")
            .unwrap_err();
        assert!(matches!(err, D2vError::ConfigError { .. }));
    }
}
