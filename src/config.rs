use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::EngineSettings;
use crate::model::Ms;

/// Server settings read from `STAYBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    /// Unpaid bookings older than this many seconds are swept. 0 disables the sweep.
    pub pending_ttl_secs: u64,
    pub currency: String,
    /// Without a key the in-memory sandbox processor is used.
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| setting(&lookup, name);

        Self {
            port: parsed(&lookup, "PORT").unwrap_or(5433),
            bind: var("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: var("DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: var("PASSWORD").unwrap_or_else(|| "staybook".into()),
            max_connections: parsed(&lookup, "MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "COMPACT_THRESHOLD").unwrap_or(1000),
            tls_cert: var("TLS_CERT"),
            tls_key: var("TLS_KEY"),
            metrics_port: parsed(&lookup, "METRICS_PORT"),
            pending_ttl_secs: parsed(&lookup, "PENDING_TTL_SECS").unwrap_or(24 * 60 * 60),
            currency: var("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|| "usd".into()),
            stripe_secret_key: var("STRIPE_SECRET_KEY"),
            stripe_api_base: var("STRIPE_API_BASE"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("staybook.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let pending_ttl = (self.pending_ttl_secs > 0)
            .then(|| (self.pending_ttl_secs as Ms).saturating_mul(1000));
        EngineSettings {
            currency: self.currency.clone(),
            pending_ttl,
        }
    }
}

fn setting(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(&format!("STAYBOOK_{name}")).filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    setting(lookup, name).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.port, 5433);
        assert_eq!(c.bind, "0.0.0.0");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.currency, "usd");
        assert!(c.stripe_secret_key.is_none());
        assert_eq!(c.wal_path(), PathBuf::from("./data/staybook.wal"));
        assert_eq!(c.engine_settings().pending_ttl, Some(86_400_000));
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let c = config(&[
            ("STAYBOOK_PORT", "6000"),
            ("STAYBOOK_MAX_CONNECTIONS", "lots"),
            ("STAYBOOK_CURRENCY", "EUR"),
            ("STAYBOOK_STRIPE_SECRET_KEY", "sk_test_1"),
            ("STAYBOOK_METRICS_PORT", "9090"),
        ]);
        assert_eq!(c.port, 6000);
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.currency, "eur");
        assert_eq!(c.stripe_secret_key.as_deref(), Some("sk_test_1"));
        assert_eq!(c.metrics_port, Some(9090));
    }

    #[test]
    fn numeric_settings_parse_to_their_own_types() {
        let c = config(&[
            ("STAYBOOK_PORT", "7000"),
            ("STAYBOOK_MAX_CONNECTIONS", "12"),
            ("STAYBOOK_COMPACT_THRESHOLD", " 5000000000 "),
            ("STAYBOOK_PENDING_TTL_SECS", "90"),
            ("STAYBOOK_METRICS_PORT", "70000"),
        ]);
        assert_eq!(c.port, 7000u16);
        assert_eq!(c.max_connections, 12usize);
        assert_eq!(c.compact_threshold, 5_000_000_000u64);
        assert_eq!(c.engine_settings().pending_ttl, Some(90_000));
        // Out of range for u16.
        assert_eq!(c.metrics_port, None);
    }

    #[test]
    fn zero_ttl_disables_sweep() {
        let c = config(&[("STAYBOOK_PENDING_TTL_SECS", "0")]);
        assert_eq!(c.engine_settings().pending_ttl, None);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let c = config(&[("STAYBOOK_TLS_CERT", "  "), ("STAYBOOK_PASSWORD", "")]);
        assert!(c.tls_cert.is_none());
        assert_eq!(c.password, "staybook");
    }
}
