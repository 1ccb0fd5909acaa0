use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use nestql::database::postgres::PoolConfig;
use nestql::eav::EavStatements;
use nestql::ResolveOptions;

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceConfig {
    pub database: PoolConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub resolve: ResolveSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub eav: EavSection,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4567,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolveSection {
    /// Upper bound for one request, in seconds. Unbounded when absent.
    pub timeout_secs: Option<u64>,
}

impl ResolveSection {
    pub fn options(&self) -> ResolveOptions {
        ResolveOptions {
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// Per-target overrides, e.g. `nestql = "debug"`.
    pub targets: BTreeMap<String, String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct EavSection {
    #[serde(flatten)]
    pub statements: EavStatements,
    /// Service that answers a request with a `contentData` document, for `ingest --url`.
    #[serde(default)]
    pub service_url: Option<String>,
}

const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: ServiceConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(anyhow::anyhow!("database.url cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("database.max_connections must be at least 1"));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(anyhow::anyhow!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            ));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.resolve.timeout_secs == Some(0) {
            return Err(anyhow::anyhow!("resolve.timeout_secs must be positive"));
        }

        let levels = std::iter::once(("*", &self.logging.level))
            .chain(self.logging.targets.iter().map(|(t, l)| (t.as_str(), l)));
        for (target, level) in levels {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(anyhow::anyhow!(
                    "Invalid log level '{}' for '{}'. Must be one of: {}",
                    level,
                    target,
                    VALID_LEVELS.join(", ")
                ));
            }
        }

        for (name, sql) in [
            ("eav.insert_value", &self.eav.statements.insert_value),
            ("eav.insert_metadata", &self.eav.statements.insert_metadata),
        ] {
            if sql.trim().is_empty() {
                return Err(anyhow::anyhow!("{} cannot be empty", name));
            }
        }
        if let Some(url) = &self.eav.service_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow::anyhow!(
                    "eav.service_url must be an http(s) URL, got '{}'",
                    url
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            [database]
            url = "postgres://localhost/nestql"
            "#,
        )
        .unwrap();

        assert_eq!(config.server, ServerSection::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.resolve.options(), ResolveOptions::default());
        assert_eq!(config.eav.statements, EavStatements::default());
        assert!(config.eav.service_url.is_none());
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn example_config_parses() {
        let config = ServiceConfig::from_toml(include_str!("../nestql.example.toml")).unwrap();
        assert_eq!(config.server.port, 4567);
        assert_eq!(
            config.resolve.options().timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.logging.targets["nestql"], "debug");
        assert_eq!(
            config.eav.service_url.as_deref(),
            Some("http://127.0.0.1:8080/content")
        );
    }

    #[test]
    fn eav_section_keeps_statements_beside_the_url() {
        let config = ServiceConfig::from_toml(
            r#"
            [database]
            url = "postgres://localhost/nestql"

            [eav]
            insert_value = "INSERT INTO facts VALUES ($1, $2, $3)"
            service_url = "https://content.local/export"
            "#,
        )
        .unwrap();

        assert_eq!(config.eav.statements.insert_value, "INSERT INTO facts VALUES ($1, $2, $3)");
        assert_eq!(
            config.eav.statements.insert_metadata,
            EavStatements::default().insert_metadata
        );
        assert_eq!(config.eav.service_url.as_deref(), Some("https://content.local/export"));
    }

    #[test]
    fn rejects_invalid_settings() {
        for toml in [
            "[database]\nurl = \"\"",
            "[database]\nurl = \"postgres://x\"\nmax_connections = 0",
            "[database]\nurl = \"postgres://x\"\n[server]\nport = 0",
            "[database]\nurl = \"postgres://x\"\n[resolve]\ntimeout_secs = 0",
            "[database]\nurl = \"postgres://x\"\n[logging]\nlevel = \"loud\"",
            "[server]\nport = 80",
            "[database]\nurl = \"postgres://x\"\n[eav]\nservice_url = \"content.local\"",
        ] {
            assert!(ServiceConfig::from_toml(toml).is_err(), "{toml}");
        }
    }
}
