//! # Application Configuration
//!
//! Optional `lldsync.toml`:
//!
//! ```toml
//! [store]
//! path = "lldsync.redb"
//! backend = "redb"   # or "file"
//!
//! [discovery]
//! lifetime_days = 30
//! ```
//!
//! Precedence: command line flags, then this file, then built-in defaults.

use lldsync_core::{Lifetime, LldError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Store path used when neither flag nor file names one.
pub const DEFAULT_DATABASE: &str = "lldsync.redb";

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// FILE MODEL
// =============================================================================

/// Storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Postcard snapshot of the whole catalog, rewritten after each command.
    File,
    /// ACID redb database.
    #[default]
    Redb,
}

impl Backend {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Redb => "redb",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
    pub backend: Option<Backend>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySection {
    /// Fallback lifetime for rules that do not set their own.
    pub lifetime_days: Option<u16>,
}

/// Parsed `lldsync.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub store: StoreSection,
    pub discovery: DiscoverySection,
}

impl AppConfig {
    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, LldError> {
        let config: Self =
            toml::from_str(text).map_err(|e| LldError::InvalidConfig(e.to_string()))?;
        if let Some(days) = config.discovery.lifetime_days {
            Lifetime::try_days(days)?;
        }
        Ok(config)
    }

    /// Read a config file. The path must name an existing regular file.
    pub fn load(path: &Path) -> Result<Self, LldError> {
        let bytes = crate::cli::read_input(path, MAX_CONFIG_FILE_SIZE)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| LldError::InvalidConfig("config file is not UTF-8".to_string()))?;
        Self::from_toml(&text)
    }
}

// =============================================================================
// RESOLVED SETTINGS
// =============================================================================

/// Effective settings after applying flags over the file over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database: PathBuf,
    pub backend: Backend,
    /// Lifetime for rules without their own.
    pub lifetime: Lifetime,
}

impl Settings {
    #[must_use]
    pub fn resolve(
        config: &AppConfig,
        database: Option<PathBuf>,
        backend: Option<Backend>,
    ) -> Self {
        Self {
            database: database
                .or_else(|| config.store.path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            backend: backend.or(config.store.backend).unwrap_or_default(),
            lifetime: config
                .discovery
                .lifetime_days
                .map_or_else(Lifetime::default, Lifetime::days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let config = AppConfig::from_toml(
            r#"
            [store]
            path = "from-file.db"
            backend = "file"
            "#,
        )
        .expect("parse");

        let settings = Settings::resolve(&config, Some("flag.db".into()), None);
        assert_eq!(settings.database, PathBuf::from("flag.db"));
        assert_eq!(settings.backend, Backend::File);
    }

    #[test]
    fn defaults_apply_without_file() {
        let settings = Settings::resolve(&AppConfig::default(), None, None);
        assert_eq!(settings.database, PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(settings.backend, Backend::Redb);
        assert_eq!(settings.lifetime, Lifetime::default());
    }
}
