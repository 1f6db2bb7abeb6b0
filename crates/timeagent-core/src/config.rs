use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MAX_LIMIT_SEARCH: i64 = 100;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONFIG_FILE: &str = "timeagent.toml";

/// Top-level config (timeagent.toml + TIMEAGENT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeAgentConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identity of this process. Every record is keyed by it.
    pub name: String,
    /// Upper bound for the page size of `/info/search`.
    #[serde(default = "default_max_limit_search")]
    pub max_limit_search: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_limit_search() -> i64 {
    DEFAULT_MAX_LIMIT_SEARCH
}
fn default_db_path() -> String {
    "timeagent.db".to_string()
}
fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Values supplied on the command line; they win over file and env.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayOverride>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOverride {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayOverride {
    pub port: u16,
}

impl TimeAgentConfig {
    /// Load config from a TOML file with TIMEAGENT_* env var overrides,
    /// then apply `overrides` from the command line.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `TIMEAGENT_AGENT__MAX_LIMIT_SEARCH=50`. A missing file is not an error.
    pub fn load_with(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        let config: TimeAgentConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TIMEAGENT_").split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runner cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.agent.name.trim().is_empty() {
            return Err(crate::error::CoreError::Config(
                "agent.name must not be empty".to_string(),
            ));
        }
        if self.agent.max_limit_search <= 0 {
            return Err(crate::error::CoreError::Config(format!(
                "agent.max_limit_search must be positive, got {}",
                self.agent.max_limit_search
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, max: i64) -> TimeAgentConfig {
        TimeAgentConfig {
            agent: AgentConfig {
                name: name.to_string(),
                max_limit_search: max,
            },
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
        }
    }

    #[test]
    fn validate_accepts_sane_config() {
        assert!(config("agent", 20).validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_name() {
        assert!(config("  ", 20).validate().is_err());
    }

    #[test]
    fn validate_rejects_non_positive_limit() {
        assert!(config("agent", 0).validate().is_err());
    }

    #[test]
    fn toml_fills_defaults() {
        let config: TimeAgentConfig = Figment::new()
            .merge(Toml::string("[agent]\nname = \"my-first-agent\"\n"))
            .extract()
            .unwrap();
        assert_eq!(config.agent.name, "my-first-agent");
        assert_eq!(config.agent.max_limit_search, DEFAULT_MAX_LIMIT_SEARCH);
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.database.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn load_with_missing_file_takes_name_from_overrides() {
        let overrides = ConfigOverrides {
            agent: Some(AgentOverride {
                name: "cli-agent".to_string(),
            }),
            gateway: None,
        };
        let config =
            TimeAgentConfig::load_with(Some("/nonexistent/timeagent.toml"), overrides).unwrap();
        assert_eq!(config.agent.name, "cli-agent");
        assert_eq!(config.agent.max_limit_search, DEFAULT_MAX_LIMIT_SEARCH);
    }

    #[test]
    fn load_with_rejects_invalid_values() {
        let overrides = ConfigOverrides {
            agent: Some(AgentOverride {
                name: " ".to_string(),
            }),
            gateway: None,
        };
        let err =
            TimeAgentConfig::load_with(Some("/nonexistent/timeagent.toml"), overrides).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Config(_)));
    }

    #[test]
    fn overrides_win_over_file() {
        let overrides = ConfigOverrides {
            agent: Some(AgentOverride {
                name: "from-cli".to_string(),
            }),
            gateway: Some(GatewayOverride { port: 9999 }),
        };
        let config: TimeAgentConfig = Figment::new()
            .merge(Toml::string("[agent]\nname = \"from-file\"\n"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .unwrap();
        assert_eq!(config.agent.name, "from-cli");
        assert_eq!(config.gateway.port, 9999);
    }
}
