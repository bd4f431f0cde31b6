//! Error types shared by the screener crates.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the common error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while loading or checking configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Loaded but rejected by validation
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Path of the offending file, when the error came from reading one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_names_path() {
        let err = Error::Read {
            path: PathBuf::from("/etc/leader/config.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Failed to read config from /etc/leader/config.json: denied");
        assert_eq!(err.path(), Some(std::path::Path::new("/etc/leader/config.json")));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_has_no_path() {
        let err = Error::Config("schedule.run_cron: invalid".into());
        assert!(err.path().is_none());
        assert!(err.to_string().starts_with("Configuration error"));
    }
}
