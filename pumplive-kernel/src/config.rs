use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub bind: String,
    /// Snapshot JSON du store ; vide = store en mémoire
    pub data_file: Option<String>,
    pub updater: UpdaterConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct UpdaterConf {
    pub interval_secs: u64,
    pub pool_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            data_file: Some("./data/store.json".into()),
            updater: UpdaterConf::default(),
        }
    }
}

impl Default for UpdaterConf {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            pool_size: 25,
            request_timeout_secs: 30,
        }
    }
}

impl UpdaterConf {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.max(1)
    }
}

impl KernelConfig {
    /// Chemin du snapshot, None si le store doit rester en mémoire
    pub fn data_path(&self) -> Option<&str> {
        self.data_file
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("PUMPLIVE_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if !Path::new(&path).exists() {
        tracing::warn!(path = %path, "no config file, using defaults");
        return KernelConfig::default();
    }

    let txt = match fs::read_to_string(&path).await {
        Ok(txt) => txt,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "unreadable config, using defaults");
            return KernelConfig::default();
        }
    };

    parse_config(&txt).unwrap_or_else(|e| {
        tracing::warn!(path = %path, error = %e, "invalid config, using defaults");
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080");
        assert_eq!(cfg.data_path(), Some("./data/store.json"));
        assert_eq!(cfg.updater.interval(), Duration::from_secs(900));
        assert_eq!(cfg.updater.pool_size(), 25);
        assert_eq!(cfg.updater.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let cfg = parse_config("updater:\n  pool_size: 5\ndata_file: \"\"\n").unwrap();
        assert_eq!(cfg.updater.pool_size, 5);
        assert_eq!(cfg.updater.interval_secs, 900);
        assert_eq!(cfg.bind, "0.0.0.0:8080");
        assert_eq!(cfg.data_path(), None);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(parse_config("updater: [1, 2").is_err());
    }
}
