use crate::core::io::{read_json, write_json, Storage};
use crate::core::models::{ApiConfig, GenerationConfig};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use std::sync::Arc;

pub const API_CONFIG_FILE: &str = "config/api_config.json";
pub const GENERATION_CONFIG_FILE: &str = "config/generation_config.json";
pub const KEY_FILE: &str = "config/key.bin";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Provider credentials and generation defaults.
///
/// The API config holds secrets, so it is stored as `nonce || AES-256-GCM
/// ciphertext` under a key kept next to it in `key.bin`.
pub struct SettingsStore {
    storage: Arc<dyn Storage>,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn key(&self) -> Result<[u8; KEY_LEN]> {
        if self.storage.exists(KEY_FILE).await? {
            let stored = self.storage.read(KEY_FILE).await?;
            if let Ok(key) = <[u8; KEY_LEN]>::try_from(stored.as_slice()) {
                return Ok(key);
            }
            warn!("{} has the wrong length, generating a new key", KEY_FILE);
        }

        let key = rand::random::<[u8; KEY_LEN]>();
        self.storage.write(KEY_FILE, &key).await?;
        debug!("Generated a new settings key");
        Ok(key)
    }

    pub async fn load_api_config(&self) -> Result<ApiConfig> {
        if !self.storage.exists(API_CONFIG_FILE).await? {
            bail!("API config has not been saved yet");
        }
        let stored = self.storage.read(API_CONFIG_FILE).await?;
        let key = self.key().await?;

        match decrypt(&stored, &key) {
            Ok(plain) => {
                serde_json::from_slice(&plain).context("Failed to parse decrypted API config")
            }
            // Files written before encryption was added are plain JSON.
            Err(e) => serde_json::from_slice(&stored)
                .map_err(|_| e.context("Failed to decrypt API config")),
        }
    }

    pub async fn save_api_config(&self, config: &ApiConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(config)?;
        let key = self.key().await?;
        let sealed = encrypt(&json, &key)?;
        self.storage.write(API_CONFIG_FILE, &sealed).await
    }

    pub async fn load_generation_config(&self) -> Result<GenerationConfig> {
        if !self.storage.exists(GENERATION_CONFIG_FILE).await? {
            bail!("Generation config has not been saved yet");
        }
        read_json(self.storage.as_ref(), GENERATION_CONFIG_FILE).await
    }

    pub async fn save_generation_config(&self, config: &GenerationConfig) -> Result<()> {
        write_json(self.storage.as_ref(), GENERATION_CONFIG_FILE, config).await
    }
}

fn encrypt(data: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;
    let nonce = rand::random::<[u8; NONCE_LEN]>();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), data)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn decrypt(sealed: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        bail!("Encrypted data is too short");
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::models::ProviderConfig;

    fn sample() -> ApiConfig {
        ApiConfig {
            seedream: ProviderConfig::new("https://a.example", "sk-seedream-secret"),
            banana_pro: ProviderConfig::new("https://b.example", "sk-banana-secret"),
        }
    }

    #[tokio::test]
    async fn test_api_config_is_encrypted_at_rest() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = Arc::new(NativeStorage::new(temp_dir.path()));
        let settings = SettingsStore::new(storage.clone());

        settings.save_api_config(&sample()).await?;

        let raw = storage.read(API_CONFIG_FILE).await?;
        let text = String::from_utf8_lossy(&raw);
        assert!(!text.contains("sk-seedream-secret"));
        assert!(!text.contains("baseUrl"));
        assert_eq!(storage.read(KEY_FILE).await?.len(), KEY_LEN);

        // A fresh store over the same folder reuses the key.
        let reopened = SettingsStore::new(storage);
        assert_eq!(reopened.load_api_config().await?, sample());
        Ok(())
    }

    #[tokio::test]
    async fn test_each_save_uses_a_fresh_nonce() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = Arc::new(NativeStorage::new(temp_dir.path()));
        let settings = SettingsStore::new(storage.clone());

        settings.save_api_config(&sample()).await?;
        let first = storage.read(API_CONFIG_FILE).await?;
        settings.save_api_config(&sample()).await?;
        let second = storage.read(API_CONFIG_FILE).await?;
        assert_ne!(&first[..NONCE_LEN], &second[..NONCE_LEN]);
        Ok(())
    }

    #[tokio::test]
    async fn test_tampered_config_fails_to_load() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = Arc::new(NativeStorage::new(temp_dir.path()));
        let settings = SettingsStore::new(storage.clone());
        settings.save_api_config(&sample()).await?;

        let mut raw = storage.read(API_CONFIG_FILE).await?;
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        storage.write(API_CONFIG_FILE, &raw).await?;
        assert!(settings.load_api_config().await.is_err());

        storage.write(API_CONFIG_FILE, b"abc").await?;
        assert!(settings.load_api_config().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_plain_json_config_still_loads() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = Arc::new(NativeStorage::new(temp_dir.path()));
        write_json(storage.as_ref(), API_CONFIG_FILE, &sample()).await?;

        let settings = SettingsStore::new(storage);
        assert_eq!(settings.load_api_config().await?, sample());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_configs_are_errors() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let settings = SettingsStore::new(Arc::new(NativeStorage::new(temp_dir.path())));
        assert!(settings.load_api_config().await.is_err());
        assert!(settings.load_generation_config().await.is_err());
        Ok(())
    }
}
