use crate::error::ConfigError;
use crate::model::Interval;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

// CONFIGURATION STRUCTS
// config.json is deserialized straight into these types; every field has a default.

/// Knobs shared by the batch scheduler, fetcher and anomaly detector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub batch_size: usize,         // symbols fetched concurrently per group
    pub inter_batch_delay_ms: u64, // pause between groups
    pub volume_multiplier: f64,    // ratio at which a symbol is anomalous
    pub high_ratio_threshold: f64, // ratio that earns the high-magnitude marker
    pub window_size: usize,        // candles per window, baseline + current
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            inter_batch_delay_ms: 500,
            volume_multiplier: 2.0,
            high_ratio_threshold: 5.0,
            window_size: 21,
        }
    }
}

impl ScanConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_segment_length: usize, // must stay below the transport's own ceiling
    pub max_retries: u32,          // attempts per segment
    pub retry_delay_ms: u64,       // backoff between attempts on one segment
    pub segment_delay_ms: u64,     // spacing between distinct segments
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_segment_length: 4000,
            max_retries: 3,
            retry_delay_ms: 2000,
            segment_delay_ms: 500,
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn segment_delay(&self) -> Duration {
        Duration::from_millis(self.segment_delay_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub run_once: bool,
    pub minute: u32, // minute past each hour (UTC) at which a scan starts
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_once: false,
            minute: 55,
        }
    }
}

/// Per-exchange universe and liquidity policy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExchangeSettings {
    pub enabled: bool,
    pub interval: Interval,
    pub min_quote_volume: f64,
    #[serde(default)]
    pub exclude: Vec<String>, // substrings, e.g. "USDC"
    #[serde(default)]
    pub filters: HashMap<String, String>, // instrument field -> required value
}

impl ExchangeSettings {
    pub fn binance_default() -> Self {
        Self {
            enabled: true,
            interval: Interval::OneDay,
            min_quote_volume: 100_000_000.0,
            exclude: vec!["USDC".to_string()],
            filters: HashMap::from([
                ("status".to_string(), "TRADING".to_string()),
                ("contractType".to_string(), "PERPETUAL".to_string()),
            ]),
        }
    }

    pub fn okx_default() -> Self {
        Self {
            enabled: true,
            interval: Interval::OneHour,
            min_quote_volume: 100_000_000.0,
            exclude: Vec::new(),
            filters: HashMap::from([("state".to_string(), "live".to_string())]),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub proxy: Option<String>, // e.g. "http://127.0.0.1:4780"
    #[serde(default = "ExchangeSettings::binance_default")]
    pub binance: ExchangeSettings,
    #[serde(default = "ExchangeSettings::okx_default")]
    pub okx: ExchangeSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            delivery: DeliveryConfig::default(),
            schedule: ScheduleConfig::default(),
            proxy: None,
            binance: ExchangeSettings::binance_default(),
            okx: ExchangeSettings::okx_default(),
        }
    }
}

impl AppConfig {
    /// Rejects settings the pipeline cannot run with. This is the only fatal error of a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scan = &self.scan;
        if scan.batch_size == 0 {
            return Err(ConfigError::Invalid("scan.batch_size must be at least 1".into()));
        }
        if scan.window_size < 2 {
            return Err(ConfigError::Invalid("scan.window_size must be at least 2".into()));
        }
        if scan.volume_multiplier.is_nan() || scan.volume_multiplier <= 0.0 {
            return Err(ConfigError::Invalid("scan.volume_multiplier must be positive".into()));
        }
        if scan.high_ratio_threshold <= scan.volume_multiplier {
            return Err(ConfigError::Invalid(
                "scan.high_ratio_threshold must exceed scan.volume_multiplier".into(),
            ));
        }
        if self.delivery.max_segment_length == 0 {
            return Err(ConfigError::Invalid(
                "delivery.max_segment_length must be at least 1".into(),
            ));
        }
        if self.delivery.max_retries == 0 {
            return Err(ConfigError::Invalid("delivery.max_retries must be at least 1".into()));
        }
        if self.schedule.minute > 59 {
            return Err(ConfigError::Invalid("schedule.minute must be within 0..=59".into()));
        }
        Ok(())
    }
}

/// Reads a required secret from the environment.
pub fn required_env(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::ConfigurationMissing(name.to_string())),
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path of the storage directory next to the binary
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates the manager rooted at `relative_path` beside the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    /// Creates the manager rooted at an explicit directory, creating it when missing.
    pub async fn new(base_dir: PathBuf) -> anyhow::Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }

        Ok(Self { base_dir })
    }

    /// Serializes `data` to `<filename>.json` via a temp file and rename, so readers never
    /// observe a half-written file.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;

        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));

        // serde_json validates UTF-8 itself, no need for read_to_string
        let content = fs::read(path).await?;

        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Like [`Self::load`], but a missing file yields `None` instead of an error.
    pub async fn load_optional<T: DeserializeOwned>(
        &self,
        filename: &str,
    ) -> anyhow::Result<Option<T>> {
        let path = self.base_dir.join(format!("{}.json", filename));
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        self.load(filename).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{
            "scan": { "batch_size": 10 },
            "okx": { "enabled": false, "interval": "4h", "min_quote_volume": 5.0 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.scan.batch_size, 10);
        assert_eq!(config.scan.window_size, 21);
        assert_eq!(config.delivery, DeliveryConfig::default());
        assert_eq!(config.binance, ExchangeSettings::binance_default());
        assert!(!config.okx.enabled);
        assert_eq!(config.okx.interval, Interval::FourHours);
        assert!(config.okx.filters.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.scan.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.scan.window_size = 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scan.volume_multiplier = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scan.volume_multiplier = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scan.high_ratio_threshold = config.scan.volume_multiplier;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.delivery.max_segment_length = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.delivery.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.schedule.minute = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_required_env_missing() {
        let err = required_env("VOLUME_SENTINEL_TEST_UNSET_VAR").unwrap_err();
        assert_eq!(
            err,
            ConfigError::ConfigurationMissing("VOLUME_SENTINEL_TEST_UNSET_VAR".to_string())
        );
    }

    #[tokio::test]
    async fn test_storage_round_trip() {
        let dir = std::env::temp_dir().join(format!("volume-sentinel-{}", std::process::id()));
        let storage = AsyncStorageManager::new(dir.clone()).await.unwrap();

        assert!(storage.load_optional::<AppConfig>("config").await.unwrap().is_none());

        let config = AppConfig::default();
        storage.save("config", &config).await.unwrap();
        let loaded: Option<AppConfig> = storage.load_optional("config").await.unwrap();
        assert_eq!(loaded, Some(config));

        let _ = std::fs::remove_dir_all(dir);
    }
}
