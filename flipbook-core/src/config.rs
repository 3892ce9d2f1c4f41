use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::sync::RetryPolicy;

pub const API_URL_ENV: &str = "FLIPBOOK_API_URL";
pub const UPLOAD_PRESET_ENV: &str = "FLIPBOOK_UPLOAD_PRESET";
pub const DEFAULT_MAX_PAGES: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub upload: UploadConfig,
    pub editor: EditorConfig,
    pub sync: RetryPolicy,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Per-request limit. A request that runs over fails as a retryable transport error.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Full upload URL. When unset it is derived from `cloud_name`.
    pub endpoint: Option<String>,
    pub cloud_name: String,
    pub upload_preset: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            cloud_name: "demo".to_string(),
            upload_preset: "flipbook".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl UploadConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://api.cloudinary.com/v1_1/{}/image/upload",
                self.cloud_name
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub default_content_pages: usize,
    pub history_limit: usize,
    /// Upper bound on slots. Remote records at or past it are ignored.
    pub max_pages: usize,
    pub capabilities: Capabilities,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            default_content_pages: 3,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_pages: DEFAULT_MAX_PAGES,
            capabilities: Capabilities::default(),
        }
    }
}

/// Optional editor features. Everything is on unless configured otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub bulk_upload: bool,
    pub text_overlays: bool,
    pub sharing: bool,
    pub analytics: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            bulk_upload: true,
            text_overlays: true,
            sharing: true,
            analytics: true,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "flipbook", "flipbook")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reads `path` if it exists, otherwise starts from defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {:?}", parent))?;
        }
        let payload = toml::to_string_pretty(self)?;
        fs::write(path, payload).with_context(|| format!("failed to write config {:?}", path))?;
        Ok(())
    }

    /// Applies `FLIPBOOK_API_URL` and `FLIPBOOK_UPLOAD_PRESET` when set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            env::var(API_URL_ENV).ok(),
            env::var(UPLOAD_PRESET_ENV).ok(),
        )
    }

    pub fn with_overrides(mut self, api_url: Option<String>, upload_preset: Option<String>) -> Self {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(preset) = upload_preset.filter(|p| !p.trim().is_empty()) {
            self.upload.upload_preset = preset.trim().to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.editor.default_content_pages, 3);
        assert_eq!(config.sync.max_attempts, 5);
    }

    #[test]
    fn partial_file_keeps_unset_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[api]
base_url = "https://books.example.com"

[editor.capabilities]
sharing = false

[upload]
timeout_ms = 5000

[sync]
initial_backoff_ms = 250
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.base_url, "https://books.example.com");
        assert!(!config.editor.capabilities.sharing);
        assert!(config.editor.capabilities.bulk_upload);
        assert_eq!(config.sync.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.sync.max_backoff, Duration::from_millis(1600));
        assert_eq!(config.upload.upload_preset, "flipbook");
        assert_eq!(config.upload.timeout, Duration::from_secs(5));
        assert_eq!(config.api.timeout, Duration::from_secs(30));
        assert_eq!(config.editor.max_pages, DEFAULT_MAX_PAGES);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.editor.history_limit = 12;
        config.upload.endpoint = Some("http://localhost:9000/upload".into());
        config.save(&path).unwrap();

        let restored = Config::load(&path).unwrap();
        assert_eq!(restored, config);
        assert_eq!(restored.upload.endpoint(), "http://localhost:9000/upload");
    }

    #[test]
    fn broken_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nbase_url=").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to parse config file"));
    }

    #[test]
    fn overrides_trim_and_ignore_blank_values() {
        let config = Config::default().with_overrides(Some("http://api.test/ ".into()), Some("  ".into()));
        assert_eq!(config.api.base_url, "http://api.test");
        assert_eq!(config.upload.upload_preset, "flipbook");
        assert_eq!(
            Config::default().upload.endpoint(),
            "https://api.cloudinary.com/v1_1/demo/image/upload"
        );
    }
}
