use std::env;

use thiserror::Error;

use crate::rounding::RoundingMode;

const DEFAULT_DATABASE: &str = "OpenSplit";
const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("You need to add {0} to the env")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Process configuration, read from the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub mongodb_uri: String,
    pub bot_token: String,
    pub database: String,
    pub bind: String,
    pub rounding: RoundingMode,
    /// CORS origin allowed to call the API; any origin when unset.
    pub allowed_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let rounding = match lookup("OPENSPLIT_ROUNDING") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                name: "OPENSPLIT_ROUNDING",
                reason,
            })?,
            None => RoundingMode::default(),
        };

        Ok(Self {
            mongodb_uri: required("MONGODB_URI")?,
            bot_token: required("BOT_API_TOKEN")?,
            database: lookup("OPENSPLIT_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            bind: lookup("OPENSPLIT_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            rounding,
            allowed_origin: lookup("OPENSPLIT_ALLOWED_ORIGIN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_optional_values_are_missing() {
        let config = config(&[
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("BOT_API_TOKEN", "secret"),
        ])
        .unwrap();
        assert_eq!(config.database, "OpenSplit");
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.rounding, RoundingMode::HalfEven);
        assert_eq!(config.allowed_origin, None);
    }

    #[test]
    fn required_values_must_be_present() {
        assert_eq!(
            config(&[("BOT_API_TOKEN", "secret")]).unwrap_err(),
            ConfigError::Missing("MONGODB_URI")
        );
        assert_eq!(
            config(&[("MONGODB_URI", "mongodb://db"), ("BOT_API_TOKEN", " ")]).unwrap_err(),
            ConfigError::Missing("BOT_API_TOKEN")
        );
    }

    #[test]
    fn rounding_mode_is_configurable() {
        let config_result = config(&[
            ("MONGODB_URI", "mongodb://db"),
            ("BOT_API_TOKEN", "secret"),
            ("OPENSPLIT_ROUNDING", "half_away_from_zero"),
        ]);
        assert_eq!(config_result.unwrap().rounding, RoundingMode::HalfAwayFromZero);

        let err = config(&[
            ("MONGODB_URI", "mongodb://db"),
            ("BOT_API_TOKEN", "secret"),
            ("OPENSPLIT_ROUNDING", "up"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
