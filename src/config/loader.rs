//! Hierarchical config file discovery, with a default-config fallback.

use crate::config::{Config, ConfigError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub loaded_from: PathBuf,
    pub fallback_used: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { search_paths: Vec::new() }
    }

    /// Standard search order: user config dir, cwd, nearest `.git` ancestor.
    pub fn with_standard_search_paths() -> Self {
        let mut search_paths = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("agent-collab").join("config.toml"));
        }
        search_paths.push(PathBuf::from("agent-collab.toml"));
        if let Ok(cwd) = std::env::current_dir() {
            if let Some(root) = find_project_root(&cwd) {
                search_paths.push(root.join("agent-collab.toml"));
            }
        }
        Self { search_paths }
    }

    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    pub fn load_with_fallback(&self) -> Result<ConfigLoadResult, ConfigError> {
        for path in &self.search_paths {
            if !path.exists() {
                debug!(path = %path.display(), "config file not present");
                continue;
            }
            match self.load_from_file(path) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded config");
                    return Ok(ConfigLoadResult {
                        config,
                        loaded_from: path.clone(),
                        fallback_used: false,
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, trying next search path");
                }
            }
        }
        warn!("no usable config file found, using defaults");
        Ok(ConfigLoadResult {
            config: Config::default(),
            loaded_from: PathBuf::from("<default>"),
            fallback_used: true,
        })
    }

    pub fn load_from_file(&self, path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_to_file(&self, config: &Config, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::with_standard_search_paths()
    }
}

fn find_project_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        if current.join(".git").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_search_paths_fall_back_to_defaults() {
        let loader = ConfigLoader {
            search_paths: vec![PathBuf::from("/nonexistent/agent-collab.toml")],
        };
        let result = loader.load_with_fallback().unwrap();
        assert!(result.fallback_used);
        assert_eq!(result.config.general.project, "default");
    }

    #[test]
    fn loads_from_first_existing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent-collab.toml");
        let mut config = Config::default();
        config.general.project = "acme".to_string();
        let loader = ConfigLoader::new();
        loader.save_to_file(&config, &path).unwrap();

        let loader = ConfigLoader {
            search_paths: vec![path],
        };
        let result = loader.load_with_fallback().unwrap();
        assert!(!result.fallback_used);
        assert_eq!(result.config.general.project, "acme");
    }
}
