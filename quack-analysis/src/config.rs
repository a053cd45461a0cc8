use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::arguments::MappingOptions;
use crate::error::ConfigError;

/// How much of the program the evaluator may look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMode {
    /// Function bodies may be walked: return inference, flow and usage hints.
    #[default]
    FullTree,
    /// Only declarations from the symbol index; unannotated returns stay unknown.
    IndexOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub mode: AnalysisMode,
    pub language: LanguageConfig,
    pub providers: ProviderConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Treat `f(*[a, b])` as `f(a, b)`.
    pub splice_literal_star_args: bool,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            splice_literal_star_args: true,
        }
    }
}

impl LanguageConfig {
    pub fn mapping_options(&self) -> MappingOptions {
        MappingOptions {
            splice_literal_star_args: self.splice_literal_star_args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub parameter_usage: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            parameter_usage: true,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = AnalyzerConfig::from_yaml_str("mode: index-only\n").expect("config");
        assert_eq!(config.mode, AnalysisMode::IndexOnly);
        assert!(config.language.splice_literal_star_args);
        assert!(config.providers.parameter_usage);
    }

    #[test]
    fn nested_sections_override_defaults() {
        let text = "language:\n  splice_literal_star_args: false\nproviders:\n  parameter_usage: false\n";
        let config = AnalyzerConfig::from_yaml_str(text).expect("config");
        assert_eq!(config.mode, AnalysisMode::FullTree);
        assert!(!config.language.splice_literal_star_args);
        assert!(!config.providers.parameter_usage);
    }

    #[test]
    fn empty_document_is_the_default_config() {
        assert_eq!(
            AnalyzerConfig::from_yaml_str("").expect("config"),
            AnalyzerConfig::default()
        );
    }

    #[test]
    fn rejects_unknown_modes() {
        assert!(matches!(
            AnalyzerConfig::from_yaml_str("mode: sometimes\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn reads_config_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("quack.yaml");
        fs::write(&path, "mode: index-only\n").expect("write");
        let config = AnalyzerConfig::from_path(&path).expect("config");
        assert_eq!(config.mode, AnalysisMode::IndexOnly);

        let missing = AnalyzerConfig::from_path(&dir.path().join("absent.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
