use crate::volatility::VisWeights;
use anyhow::Context;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

// CONFIGURATION STRUCTS
// `config.json` in the storage directory deserializes straight into these.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,   // chart API root
    pub user_agent: String, // the chart API refuses requests without one
    pub exchange_suffix: String, // e.g. ".NS" for NSE listings
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) equity-screener/0.1".to_string(),
            exchange_suffix: ".NS".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// One CSV file per cache key
    #[default]
    Csv,
    /// One table per cache key in a SQLite file
    Sqlite,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub sqlite_file: String, // relative to the storage directory
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Csv,
            sqlite_file: "stock_data.db".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AlarmConfig {
    pub poll_interval_secs: u64,
    pub quote_period: String,
    pub quote_interval: String,        // batch mode bar size
    pub single_quote_interval: String, // single-ticker mode reads the daily bar
    pub proximity_band: f64, // batch mode alerts when |price - threshold| < band
    pub player: String,      // e.g. "afplay" on macOS, "paplay" or "mpg123" elsewhere
    pub sound_file: PathBuf,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            quote_period: "1d".to_string(),
            quote_interval: "15m".to_string(),
            single_quote_interval: "1d".to_string(),
            proximity_band: 3.0,
            player: "afplay".to_string(),
            sound_file: PathBuf::from("alarm.mp3"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ChartConfig {
    pub font_path: Option<PathBuf>, // TrueType font for chart labels
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub alarm: AlarmConfig,
    pub vis: VisWeights,
    pub charts: ChartConfig,
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Roots the manager at `base_dir`, creating it up front so later writes
    /// never have to check.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .await
                .with_context(|| format!("failed to create {}", base_dir.display()))?;
        }
        Ok(Self { base_dir })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    /// Serializes `data` as pretty JSON into `<filename>.json`.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let json_bytes = serde_json::to_vec_pretty(data)?;
        self.save_bytes(&format!("{}.json", filename), &json_bytes).await
    }

    /// Writes `<file_name>` verbatim (HTML reports and the like).
    pub async fn save_text(&self, file_name: &str, text: &str) -> anyhow::Result<PathBuf> {
        self.save_bytes(file_name, text.as_bytes()).await?;
        Ok(self.path(file_name))
    }

    /// Atomic write: the bytes land in a `.tmp` sibling first and are renamed
    /// over the target, so a crash never leaves a half-written file behind.
    pub async fn save_bytes(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        write_atomic(&self.path(file_name), bytes).await
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.path(&format!("{}.json", filename));
        let content = fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let data = serde_json::from_slice(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(data)
    }

    /// Loads `config.json`, falling back to defaults when the file is absent.
    /// A file that exists but does not parse is an error.
    pub async fn load_config(&self) -> anyhow::Result<AppConfig> {
        let path = self.path("config.json");
        if !path.exists() {
            warn!(path = %path.display(), "no config file, using defaults");
            return Ok(AppConfig::default());
        }
        let config: AppConfig = self.load("config").await?;
        info!(path = %path.display(), cache = ?config.cache.backend, "config loaded");
        Ok(config)
    }
}

/// **Atomic File Write**
/// Readers of `path` see either the old contents or the new ones, never a
/// partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    // 1. Stage the bytes in a `.tmp` sibling on the same filesystem
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;

    // 2. Rename over the target
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_directory_and_round_trips_json() {
        let tmp = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(tmp.path().join("nested/store"))
            .await
            .unwrap();
        assert!(storage.base_dir.is_dir());

        let mut config = AppConfig::default();
        config.alarm.proximity_band = 5.0;
        storage.save("config", &config).await.unwrap();

        let loaded = storage.load_config().await.unwrap();
        assert_eq!(loaded.alarm.proximity_band, 5.0);
        assert!(!storage.path("config.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(tmp.path()).await.unwrap();
        let config = storage.load_config().await.unwrap();
        assert_eq!(config.provider.exchange_suffix, ".NS");
        assert_eq!(config.alarm.poll_interval_secs, 60);
        assert_eq!(config.cache.backend, CacheBackend::Csv);
    }

    #[tokio::test]
    async fn partial_config_fills_in_defaults() {
        let tmp = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(tmp.path()).await.unwrap();
        storage
            .save_text("config.json", r#"{"cache":{"backend":"sqlite"}}"#)
            .await
            .unwrap();

        let config = storage.load_config().await.unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert_eq!(config.cache.sqlite_file, "stock_data.db");
        assert_eq!(config.vis.alpha, 2.0);
    }

    #[tokio::test]
    async fn atomic_write_replaces_existing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.html");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert!(!tmp.path().join("report.html.tmp").exists());

        assert!(write_atomic(&tmp.path().join("missing/report.html"), b"x").await.is_err());
    }

    #[tokio::test]
    async fn malformed_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(tmp.path()).await.unwrap();
        storage.save_text("config.json", "{ nope").await.unwrap();
        assert!(storage.load_config().await.is_err());
    }
}
