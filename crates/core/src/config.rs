use serde::Deserialize;

/// Engine configuration. Loaded from environment variables with the prefix
/// `SEGMENTS__`, e.g. `SEGMENTS__STORE__URL=redis://cache:6379`.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentsConfig {
    /// Name of the read-only connection raw-query definitions execute on.
    /// Strongly recommended to point at a read replica.
    #[serde(default = "default_exec_connection")]
    pub exec_connection: String,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Members per SADD when writing a new version.
    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,
    /// How long superseded versions stay readable after a promote.
    #[serde(default = "default_gc_grace_secs")]
    pub gc_grace_secs: u64,
}

impl SegmentsConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("SEGMENTS")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }
}

impl Default for SegmentsConfig {
    fn default() -> Self {
        Self {
            exec_connection: default_exec_connection(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            write_chunk_size: default_write_chunk_size(),
            gc_grace_secs: default_gc_grace_secs(),
        }
    }
}

fn default_exec_connection() -> String {
    "default".to_string()
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_write_chunk_size() -> usize {
    10_000
}

fn default_gc_grace_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SegmentsConfig::default();
        assert_eq!(cfg.exec_connection, "default");
        assert_eq!(cfg.store.url, "redis://localhost:6379");
        assert_eq!(cfg.store.write_chunk_size, 10_000);
        assert_eq!(cfg.store.gc_grace_secs, 30);
    }
}
