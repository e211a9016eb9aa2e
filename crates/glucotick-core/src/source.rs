use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used in configuration and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[default]
    Nightscout,
    Librelink,
}

impl ProviderId {
    pub const ALL: [Self; 2] = [Self::Nightscout, Self::Librelink];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nightscout => "nightscout",
            Self::Librelink => "librelink",
        }
    }

    /// Resolves a configured provider name, falling back to Nightscout for
    /// anything unrecognized.
    pub fn from_config_value(value: &str) -> Self {
        value.parse().unwrap_or_else(|error| {
            tracing::warn!(%error, "unknown provider, falling back to nightscout");
            Self::Nightscout
        })
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nightscout" => Ok(Self::Nightscout),
            "librelink" | "libre" | "librelinkup" => Ok(Self::Librelink),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}
