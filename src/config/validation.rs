//! Configuration validation.

use crate::config::{Config, ConfigError};

const VALID_INTEREST_LEVELS: &[&str] = &["none", "locks_only", "direct", "all"];
const VALID_EMBEDDING_PROVIDERS: &[&str] = &["local", "openai"];

#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, config: &Config) -> Result<(), ConfigError> {
        if config.general.project.trim().is_empty() {
            return Err(ConfigError::Validation("general.project must not be empty".to_string()));
        }
        if config.general.local_agent_id.trim().is_empty() {
            return Err(ConfigError::Validation("general.local_agent_id must not be empty".to_string()));
        }
        if !VALID_INTEREST_LEVELS.contains(&config.interest.default_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "interest.default_level must be one of {VALID_INTEREST_LEVELS:?}, got {:?}",
                config.interest.default_level
            )));
        }
        if !VALID_EMBEDDING_PROVIDERS.contains(&config.embedding.provider.as_str()) {
            return Err(ConfigError::Validation(format!(
                "embedding.provider must be one of {VALID_EMBEDDING_PROVIDERS:?}, got {:?}",
                config.embedding.provider
            )));
        }
        if !(0.0..=1.0).contains(&config.event.similarity_threshold) {
            return Err(ConfigError::Validation("event.similarity_threshold must be in [0.0, 1.0]".to_string()));
        }
        if config.event.max_events_per_file > config.event.max_size {
            return Err(ConfigError::Validation(
                "event.max_events_per_file must not exceed event.max_size".to_string(),
            ));
        }
        if config.queue.base_delay > config.queue.max_delay {
            return Err(ConfigError::Validation("queue.base_delay must not exceed queue.max_delay".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let validator = ConfigValidator::new();
        assert!(validator.validate(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_unknown_embedding_provider() {
        let mut config = Config::default();
        config.embedding.provider = "bedrock".to_string();
        let validator = ConfigValidator::new();
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn rejects_per_file_cap_above_total_cap() {
        let mut config = Config::default();
        config.event.max_events_per_file = config.event.max_size + 1;
        let validator = ConfigValidator::new();
        assert!(validator.validate(&config).is_err());
    }
}
