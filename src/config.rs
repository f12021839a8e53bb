use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::DEFAULT_LOCK_TIMEOUT;

/// Process settings, read from `HOSTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub lock_timeout: Duration,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            sweep_interval: Duration::from_secs(60),
            compact_threshold: 1000,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("HOSTBOOK_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "HOSTBOOK_PORT").unwrap_or(defaults.port),
            data_dir: lookup("HOSTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "HOSTBOOK_METRICS_PORT"),
            lock_timeout: parsed(&lookup, "HOSTBOOK_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            sweep_interval: parsed(&lookup, "HOSTBOOK_SWEEP_INTERVAL_SECS")
                .filter(|&s: &u64| s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            compact_threshold: parsed(&lookup, "HOSTBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("hostbook.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(from(&[]), Config::default());
        assert_eq!(Config::default().lock_timeout, Duration::from_millis(2_000));
    }

    #[test]
    fn reads_overrides() {
        let cfg = from(&[
            ("HOSTBOOK_BIND", "127.0.0.1"),
            ("HOSTBOOK_PORT", "9000"),
            ("HOSTBOOK_DATA_DIR", "/var/lib/hostbook"),
            ("HOSTBOOK_METRICS_PORT", "9100"),
            ("HOSTBOOK_LOCK_TIMEOUT_MS", "250"),
            ("HOSTBOOK_SWEEP_INTERVAL_SECS", "5"),
            ("HOSTBOOK_COMPACT_THRESHOLD", "50"),
        ]);
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/hostbook/hostbook.wal"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.compact_threshold, 50);
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = from(&[("HOSTBOOK_PORT", "eighty"), ("HOSTBOOK_SWEEP_INTERVAL_SECS", "0")]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
    }
}
