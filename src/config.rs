// vim: cc=81
use crate::error::ConfigError;
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

pub const AGENT_CAPABILITIES: [&str; 5] = [
    "DisplayOnly",
    "DisplayYesNo",
    "KeyboardOnly",
    "NoInputNoOutput",
    "KeyboardDisplay",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Seconds between full reloads
    pub refresh_interval_secs: u64,
    /// Upper bound on a single bus call, pairing included
    pub call_timeout_secs: u64,
    pub color: bool,
    pub log_file: Option<PathBuf>,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub path: String,
    pub capability: String,
    pub answer_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15,
            call_timeout_secs: 60,
            color: true,
            log_file: None,
            agent: AgentConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            path: "/org/bluedeck/agent".to_string(),
            capability: "KeyboardDisplay".to_string(),
            answer_timeout_ms: 2000,
        }
    }
}

/// <config dir>/bluedeck/config.toml
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "bluedeck")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Reads the config at path. A missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "refresh_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "call_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if !self.agent.path.starts_with('/') {
            return Err(ConfigError::Validation {
                field: "agent.path",
                reason: format!("{:?} is not an object path", self.agent.path),
            });
        }
        if !AGENT_CAPABILITIES.contains(&self.agent.capability.as_str()) {
            return Err(ConfigError::Validation {
                field: "agent.capability",
                reason: format!(
                    "{:?} is not one of {}",
                    self.agent.capability,
                    AGENT_CAPABILITIES.join(", ")
                ),
            });
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn answer_timeout(&self) -> Duration {
        Duration::from_millis(self.agent.answer_timeout_ms)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("bluedeck.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("bluedeck-test-{}-{name}.toml", std::process::id()));
        fs::write(&path, content).expect("scratch file is writable");
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = Path::new("/nonexistent/bluedeck/config.toml");
        assert_eq!(Config::load(path).expect("defaults"), Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = scratch(
            "partial",
            "refresh_interval_secs = 5\n\n[agent]\ncapability = \"DisplayYesNo\"\n",
        );
        let config = Config::load(&path).expect("valid config");
        let _ = fs::remove_file(&path);
        assert_eq!(config.refresh_interval(), Duration::from_secs(5));
        assert_eq!(config.agent.capability, "DisplayYesNo");
        assert_eq!(config.agent.path, "/org/bluedeck/agent");
        assert_eq!(config.call_timeout_secs, 60);
        assert!(config.color);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = scratch("malformed", "refresh_interval_secs = \"soon\"\n");
        let result = Config::load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = Config {
            refresh_interval_secs: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "refresh_interval_secs",
                ..
            })
        ));
        let mut config = Config::default();
        config.agent.capability = "Telepathy".into();
        assert!(config.validate().is_err());
    }
}
