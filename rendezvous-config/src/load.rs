use std::collections::HashMap;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Prefix for environment variable configuration.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Environment variables could not be merged into the configuration.
    #[error("failed to load configuration from environment variables: {0}")]
    EnvironmentVariables(#[source] config::ConfigError),

    /// An explicit override could not be applied.
    #[error("failed to apply override for `{key}`: {source}")]
    Override {
        key: String,
        source: config::ConfigError,
    },

    /// The configuration sources were merged but deserialization failed.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),
}

/// Explicit values that take precedence over environment variables.
///
/// Typically built from parsed command line flags. Absent options are skipped
/// so that the environment (or the field's serde default) still applies.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    values: Vec<(String, config::Value)>,
}

impl ConfigOverrides {
    /// Creates an empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    pub fn set<V>(mut self, key: &str, value: V) -> Self
    where
        V: Into<config::Value>,
    {
        self.values.push((key.to_owned(), value.into()));
        self
    }

    /// Sets `key` to `value` when it is present.
    pub fn set_option<V>(self, key: &str, value: Option<V>) -> Self
    where
        V: Into<config::Value>,
    {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// Returns whether no override was recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Loads configuration from `APP_`-prefixed environment variables and explicit overrides.
///
/// Nested keys use double underscores (`APP_SECTION__KEY`). Overrides win
/// over environment variables.
pub fn load_config<T>(overrides: ConfigOverrides) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    load_config_from(None, overrides)
}

/// Same as [`load_config`] but reads variables from `environment` instead of the
/// process environment when it is provided.
pub fn load_config_from<T>(
    environment: Option<HashMap<String, String>>,
    overrides: ConfigOverrides,
) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(environment);

    let mut builder = config::Config::builder().add_source(environment_source);

    for (key, value) in overrides.values {
        builder = builder
            .set_override(key.as_str(), value)
            .map_err(|source| LoadConfigError::Override { key, source })?;
    }

    let settings = builder
        .build()
        .map_err(LoadConfigError::EnvironmentVariables)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        port: u16,
        #[serde(default)]
        name: Option<String>,
    }

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn reads_prefixed_environment_variables() {
        let sample: Sample = load_config_from(
            env(&[("APP_PORT", "4000"), ("OTHER_NAME", "other")]),
            ConfigOverrides::new(),
        )
        .unwrap();

        assert_eq!(sample.port, 4000);
        assert!(sample.name.is_none());
    }

    #[test]
    fn overrides_win_over_environment() {
        let sample: Sample = load_config_from(
            env(&[("APP_PORT", "4000"), ("APP_NAME", "env")]),
            ConfigOverrides::new()
                .set("port", 5000u64)
                .set_option::<String>("name", None),
        )
        .unwrap();

        assert_eq!(sample.port, 5000);
        assert_eq!(sample.name.as_deref(), Some("env"));
    }

    #[test]
    fn missing_required_field_fails_deserialization() {
        let err =
            load_config_from::<Sample>(env(&[]), ConfigOverrides::new()).unwrap_err();

        assert!(matches!(err, LoadConfigError::Deserialization(_)));
    }
}
