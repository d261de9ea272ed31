//! Live-query configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! coalesce_reruns = true
//! skip_empty_deltas = true
//! log_profile = "development"
//! ```

use livesql_errors::{ExError, ExErrorKind, LiveError, Result};
use livesql_logging::Profile;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveConfig {
    /// Queue at most one pending re-run per live query
    pub coalesce_reruns: bool,
    /// Skip callbacks for keyed re-runs that changed no row
    pub skip_empty_deltas: bool,
    /// Logging profile used by binaries embedding the layer
    pub log_profile: Profile,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            coalesce_reruns: true,
            skip_empty_deltas: true,
            log_profile: Profile::default(),
        }
    }
}

impl LiveConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// `Config` when the document is malformed or names an unknown key.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| {
            LiveError::InvalidConfig {
                reason: e.message().to_string(),
            }
            .into()
        })
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read, `Config` when it does not parse.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("load_config")
                .with_message(format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}
