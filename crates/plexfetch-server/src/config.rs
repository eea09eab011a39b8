use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Process configuration, read from `PLEXFETCH_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub session_ttl_hours: i64,
    pub sweep_interval_secs: u64,
    pub identity_url: String,
    pub product: String,
    /// Connect timeout only; a long download must never be cut off.
    pub upstream_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let config = Self {
            host: get("PLEXFETCH_HOST", "0.0.0.0"),
            port: get("PLEXFETCH_PORT", "3000").parse().context("PLEXFETCH_PORT")?,
            db_path: get("PLEXFETCH_DB_PATH", "plexfetch.db").into(),
            session_ttl_hours: get("PLEXFETCH_SESSION_TTL_HOURS", "24")
                .parse()
                .context("PLEXFETCH_SESSION_TTL_HOURS")?,
            sweep_interval_secs: get("PLEXFETCH_SWEEP_INTERVAL_SECS", "3600")
                .parse()
                .context("PLEXFETCH_SWEEP_INTERVAL_SECS")?,
            identity_url: get("PLEXFETCH_IDENTITY_URL", "https://plex.tv"),
            product: get("PLEXFETCH_PRODUCT", "plexfetch"),
            upstream_timeout_secs: get("PLEXFETCH_UPSTREAM_TIMEOUT_SECS", "30")
                .parse()
                .context("PLEXFETCH_UPSTREAM_TIMEOUT_SECS")?,
        };

        anyhow::ensure!(config.session_ttl_hours > 0, "PLEXFETCH_SESSION_TTL_HOURS must be positive");
        anyhow::ensure!(config.sweep_interval_secs > 0, "PLEXFETCH_SWEEP_INTERVAL_SECS must be positive");
        Ok(config)
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
        assert_eq!(config.db_path, PathBuf::from("plexfetch.db"));
        assert_eq!(config.session_ttl_hours, 24);
        assert_eq!(config.sweep_interval_secs, 3600);
        assert_eq!(config.identity_url, "https://plex.tv");
        assert_eq!(config.upstream_timeout_secs, 30);
    }

    #[test]
    fn overrides_and_blank_values() {
        let config = config(&[("PLEXFETCH_PORT", "8080"), ("PLEXFETCH_HOST", "  ")]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(config(&[("PLEXFETCH_PORT", "http")]).is_err());
        assert!(config(&[("PLEXFETCH_SESSION_TTL_HOURS", "0")]).is_err());
    }
}
