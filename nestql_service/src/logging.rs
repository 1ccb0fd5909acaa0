use std::collections::BTreeMap;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

fn build_env_filter(level: &str, target_levels: &BTreeMap<String, String>) -> anyhow::Result<EnvFilter> {
    let mut directives = vec![level.to_string()];

    // Driver and server internals stay quiet unless asked for
    let noisy: &[(&str, &str)] = &[
        ("sqlx", "warn"),
        ("sqlparser", "warn"),
        ("hyper", "warn"),
        ("h2", "warn"),
        ("tower", "warn"),
    ];
    for (target, lvl) in noisy {
        directives.push(format!("{}={}", target, lvl));
    }

    for (target, lvl) in target_levels {
        directives.push(format!("{}={}", target, lvl));
    }

    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str)
        .map_err(|e| anyhow::anyhow!("Invalid tracing filter '{}': {}", filter_str, e))
}

/// Install the global subscriber. `RUST_LOG` wins over the configured levels.
pub fn init(config: &LoggingSection) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_env_filter(&config.level, &config.targets)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_includes_level_noise_and_overrides() {
        let targets = BTreeMap::from([("nestql::engine".to_string(), "trace".to_string())]);
        let filter = build_env_filter("debug", &targets)
            .unwrap()
            .to_string()
            .to_lowercase();

        assert!(filter.contains("debug"));
        assert!(filter.contains("sqlx=warn"));
        assert!(filter.contains("nestql::engine=trace"));
    }

    #[test]
    fn rejects_unknown_target_level() {
        let targets = BTreeMap::from([("nestql".to_string(), "loud".to_string())]);
        assert!(build_env_filter("info", &targets).is_err());
    }
}
