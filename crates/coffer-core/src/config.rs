use serde::{Deserialize, Serialize};

/// Top-level configuration (loaded from coffer.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CofferConfig {
    pub kdf: KdfConfig,
    pub history: HistoryConfig,
    pub broker: BrokerConfig,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Argon2id cost defaults for newly created databases
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
    /// Wall-clock target for `--decryption-time` benchmarking, in ms
    pub benchmark_target_ms: u64,
}

/// Entry history retention. Applied only through an explicit prune —
/// nothing drops snapshots implicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Keep at most this many snapshots per entry (0 = unlimited)
    pub max_items: usize,
    /// Drop snapshots older than this many days (0 = unlimited)
    pub max_age_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Buffered capacity of the broker event channel
    pub event_capacity: usize,
}

impl Default for CofferConfig {
    fn default() -> Self {
        Self {
            kdf: KdfConfig::default(),
            history: HistoryConfig::default(),
            broker: BrokerConfig::default(),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
            benchmark_target_ms: 1000,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_items: 10,
            max_age_days: 365,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { event_capacity: 64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
log_level = "debug"
log_format = "text"

[kdf]
mem_cost_kib = 131072
time_cost = 4
parallelism = 8
benchmark_target_ms = 500

[history]
max_items = 20
max_age_days = 90

[broker]
event_capacity = 128
"#;
        let config: CofferConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.kdf.mem_cost_kib, 131072);
        assert_eq!(config.kdf.time_cost, 4);
        assert_eq!(config.kdf.benchmark_target_ms, 500);
        assert_eq!(config.history.max_items, 20);
        assert_eq!(config.history.max_age_days, 90);
        assert_eq!(config.broker.event_capacity, 128);
    }

    #[test]
    fn test_parse_defaults() {
        let config: CofferConfig = toml::from_str("").unwrap();

        assert_eq!(config.kdf.mem_cost_kib, 65536);
        assert_eq!(config.kdf.time_cost, 3);
        assert_eq!(config.kdf.parallelism, 4);
        assert_eq!(config.history.max_items, 10);
        assert_eq!(config.history.max_age_days, 365);
        assert_eq!(config.broker.event_capacity, 64);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, "text");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[history]
max_items = 5
"#;
        let config: CofferConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.history.max_items, 5);
        // Defaults
        assert_eq!(config.history.max_age_days, 365);
        assert_eq!(config.kdf.time_cost, 3);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CofferConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CofferConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.kdf.mem_cost_kib, parsed.kdf.mem_cost_kib);
        assert_eq!(config.history.max_items, parsed.history.max_items);
        assert_eq!(config.broker.event_capacity, parsed.broker.event_capacity);
    }
}
