use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostics::Diagnostic;

/// Failure to bring a source file into a [`crate::Program`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {message}", path.display())]
    Syntax {
        path: PathBuf,
        message: String,
        diagnostics: Vec<Diagnostic>,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid analyzer config")]
    Yaml(#[from] serde_yaml::Error),
}
