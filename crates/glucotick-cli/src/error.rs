use thiserror::Error;

use glucotick_core::SourceError;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] glucotick_core::CoreError),

    #[error("provider is not configured; set nightscoutUrl/apiToken or librelink credentials")]
    NotConfigured,

    #[error("fetch failed: {0}")]
    Fetch(SourceError),

    #[error("config key '{0}' is not set")]
    MissingKey(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<SourceError> for CliError {
    fn from(error: SourceError) -> Self {
        Self::Fetch(error)
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Core(_) => 2,
            Self::NotConfigured => 2,
            Self::MissingKey(_) => 2,
            Self::Fetch(_) => 3,
            Self::Serialization(_) => 4,
            Self::Watch(_) => 6,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_exit_with_three() {
        let error = CliError::from(SourceError::network("timeout"));
        assert_eq!(error.exit_code(), 3);
        assert!(error.to_string().contains("source.network"));
    }

    #[test]
    fn configuration_problems_exit_with_two() {
        assert_eq!(CliError::NotConfigured.exit_code(), 2);
        assert_eq!(CliError::MissingKey(String::from("units")).exit_code(), 2);
    }
}
