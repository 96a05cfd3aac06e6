use serde::Deserialize;

/// Bind parameter ceiling used when none is configured (SQLite's historical limit).
pub const DEFAULT_MAX_BIND_PARAMETERS: usize = 999;

/// What to do with a method parameter the query never references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnusedParameterPolicy {
    /// Log a warning and keep compiling.
    #[default]
    Warn,
    /// Reject the definition with `Error::UnusedParameter`.
    Fail,
}

/// Settings consulted by the binder while compiling and binding queries.
///
/// # Examples
///
/// ```
/// use sqlx_named_query::config::{BinderConfig, UnusedParameterPolicy};
///
/// let config = BinderConfig::from_toml_str(
///     r#"
///     max_bind_parameters = 65535
///     unused_parameters = "fail"
///     "#,
/// )?;
/// assert_eq!(config.max_bind_parameters, 65535);
/// assert_eq!(config.unused_parameters, UnusedParameterPolicy::Fail);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    /// Maximum number of `?` markers a single statement may carry.
    pub max_bind_parameters: usize,
    pub unused_parameters: UnusedParameterPolicy,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            max_bind_parameters: DEFAULT_MAX_BIND_PARAMETERS,
            unused_parameters: UnusedParameterPolicy::default(),
        }
    }
}

/// Failure to load a [`BinderConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid binder configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("max_bind_parameters must be greater than zero")]
    ZeroCeiling,
}

impl BinderConfig {
    /// Parses a configuration from TOML. Missing keys fall back to defaults.
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, ConfigError> {
        let config: BinderConfig = toml::from_str(source)?;
        if config.max_bind_parameters == 0 {
            return Err(ConfigError::ZeroCeiling);
        }
        Ok(config)
    }

    /// Sets the bind parameter ceiling.
    pub fn with_max_bind_parameters(mut self, limit: usize) -> Self {
        self.max_bind_parameters = limit;
        self
    }

    /// Sets the unused parameter policy.
    pub fn with_unused_parameters(mut self, policy: UnusedParameterPolicy) -> Self {
        self.unused_parameters = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BinderConfig::default();
        assert_eq!(config.max_bind_parameters, 999);
        assert_eq!(config.unused_parameters, UnusedParameterPolicy::Warn);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = BinderConfig::from_toml_str("unused_parameters = \"fail\"").unwrap();
        assert_eq!(config.max_bind_parameters, DEFAULT_MAX_BIND_PARAMETERS);
        assert_eq!(config.unused_parameters, UnusedParameterPolicy::Fail);

        let config = BinderConfig::from_toml_str("").unwrap();
        assert_eq!(config, BinderConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_zero_ceiling() {
        let err = BinderConfig::from_toml_str("max_bind_parameters = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCeiling));
    }

    #[test]
    fn test_from_toml_rejects_unknown_policy() {
        let err = BinderConfig::from_toml_str("unused_parameters = \"ignore\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
