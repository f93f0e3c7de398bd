//! rusty-booru/crates/configs/src/lib.rs
//!
//! Settings loading for the catalog binary. Values come from `BOORU_`-
//! prefixed environment variables (a `.env` file is honored in
//! development); the database URL is wrapped in `secrecy` so it never
//! lands in debug output or logs.

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Address the API listens on.
    pub bind_addr: String,
    /// `sqlite::memory:` by default; any sqlx SQLite URL works with the
    /// `db-sqlite` feature enabled.
    pub database_url: SecretString,
    /// Page size used when a search request does not specify one.
    pub default_page_size: u32,
    /// Hard cap on requested page sizes.
    pub max_page_size: u32,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl Settings {
    pub fn load() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        let settings: Settings = config::Config::builder()
            .set_default("bind_addr", "127.0.0.1:8080")?
            .set_default("database_url", "sqlite::memory:")?
            .set_default("default_page_size", 20_i64)?
            .set_default("max_page_size", 320_i64)?
            .set_default("log_json", false)?
            .add_source(config::Environment::with_prefix("BOORU").try_parsing(true))
            .build()?
            .try_deserialize()?;
        debug!(bind_addr = %settings.bind_addr, "settings loaded");
        Ok(settings)
    }

    /// Clamp a requested page size into the configured window.
    pub fn page_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_environment() {
        let settings = Settings::load().expect("defaults should load");
        assert_eq!(settings.default_page_size, 20);
        assert_eq!(settings.max_page_size, 320);
    }

    #[test]
    fn page_limit_clamps() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings.page_limit(None), 20);
        assert_eq!(settings.page_limit(Some(0)), 1);
        assert_eq!(settings.page_limit(Some(10_000)), 320);
    }
}
