use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Commands run in-process against the local data folder.
    #[default]
    Embedded,
    /// Commands go to `server_url` over HTTP.
    Http,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportMode,

    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Image server used to display local paths when running embedded.
    #[serde(default = "default_local_service_url")]
    pub local_service_url: String,

    #[serde(default = "default_data_folder")]
    pub data_folder: String,

    #[serde(default = "default_download_folder")]
    pub download_folder: String,

    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:3001".to_string()
}
fn default_local_service_url() -> String {
    "http://127.0.0.1:3001".to_string()
}
fn default_data_folder() -> String {
    "data".to_string()
}
fn default_download_folder() -> String {
    "downloads".to_string()
}
fn default_progress_tick_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            server_url: default_server_url(),
            local_service_url: default_local_service_url(),
            data_folder: default_data_folder(),
            download_folder: default_download_folder(),
            progress_tick_ms: default_progress_tick_ms(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_folder)?;
        fs::create_dir_all(&self.download_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = Config::load_from(&temp_dir.path().join("config.yml"))?;
        assert_eq!(config, Config::default());
        assert_eq!(config.transport, TransportMode::Embedded);
        Ok(())
    }

    #[test]
    fn test_partial_yaml_fills_defaults() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.yml");
        fs::write(&path, "transport: http\nserver_url: http://10.0.0.2:3001\n")?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.transport, TransportMode::Http);
        assert_eq!(config.server_url, "http://10.0.0.2:3001");
        assert_eq!(config.data_folder, "data");
        assert_eq!(config.progress_tick_ms, 500);
        Ok(())
    }
}
