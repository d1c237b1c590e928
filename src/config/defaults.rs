//! Default values for every [`super::Config`] section.

use super::*;

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            store: StoreConfig::default(),
            queue: QueueConfig::default(),
            lock: LockConfig::default(),
            interest: InterestConfig::default(),
            event: EventConfig::default(),
            audit: AuditConfig::default(),
            embedding: EmbeddingConfig::default(),
            logging: crate::logging::LogConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            local_agent_id: gethostname::gethostname().to_string_lossy().to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { watch_buffer: 100 }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            negotiation_window: Duration::from_millis(500),
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            default_level: "direct".to_string(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_events_per_file: 500,
            max_size: 5000,
            similarity_threshold: 0.75,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            channel_capacity: 1024,
            batch_size: 64,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.general.project, config.general.project);
        assert_eq!(parsed.lock.default_ttl, config.lock.default_ttl);
    }
}
