use crate::logic::{FetchOptions, DEFAULT_NOT_FOUND_TEXT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub schema: SchemaConfig,
    pub fetch: FetchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// API description (JSON) to load.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub not_found_text: String,
    pub prefetch_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: "openapi.json".to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            not_found_text: DEFAULT_NOT_FOUND_TEXT.to_string(),
            prefetch_only: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Environment variables such as ADMIN_FETCH__NOT_FOUND_TEXT
        config = config.add_source(
            config::Environment::with_prefix("ADMIN")
                .separator("__")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            prefetch_only: self.fetch.prefetch_only,
            not_found_text: self.fetch.not_found_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.schema.path, "openapi.json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.fetch_options(), FetchOptions::default());
    }
}
