use std::fmt::Display;
use std::str::FromStr;

use config::{Config, File, FileFormat};

use crate::error::{ConfigError, Result};

/// Key-value view over the layered sources: environment first, then the
/// `config.ini` defaults (environment always wins).
#[derive(Debug)]
pub struct Settings {
    file: Config,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let file = Config::builder()
            .add_source(File::with_name(path).format(FileFormat::Ini).required(false))
            .build()?;
        Ok(Self { file })
    }

    /// An in-memory source with no file defaults; env still applies.
    pub fn empty() -> Self {
        Self {
            file: Config::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Ok(value) = std::env::var(key) {
            if !value.is_empty() {
                return Some(value);
            }
        }
        let lower = key.to_lowercase();
        self.file
            .get_string(&lower)
            .or_else(|_| self.file.get_string(&format!("default.{lower}")))
            .ok()
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    pub fn parse<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.require(key)?;
        value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        })
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_missing_file() {
        std::env::set_var("REELGRID_TEST_KEY_A", "from-env");
        let settings = Settings::empty();
        assert_eq!(settings.get("REELGRID_TEST_KEY_A").as_deref(), Some("from-env"));
        std::env::remove_var("REELGRID_TEST_KEY_A");
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let settings = Settings::empty();
        assert!(matches!(
            settings.require("REELGRID_TEST_KEY_B"),
            Err(ConfigError::MissingKey(_))
        ));
    }

    #[test]
    fn parse_or_falls_back_to_default() {
        let settings = Settings::empty();
        assert_eq!(settings.parse_or("REELGRID_TEST_KEY_C", 42u16).unwrap(), 42);
        std::env::set_var("REELGRID_TEST_KEY_C", "7");
        assert_eq!(settings.parse_or("REELGRID_TEST_KEY_C", 42u16).unwrap(), 7);
        std::env::set_var("REELGRID_TEST_KEY_C", "not-a-number");
        assert!(settings.parse_or("REELGRID_TEST_KEY_C", 42u16).is_err());
        std::env::remove_var("REELGRID_TEST_KEY_C");
    }
}
