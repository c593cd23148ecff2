pub mod banana_pro;
pub mod seedream;

use crate::core::models::{Model, ProviderConfig};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::info;
use std::fmt::Debug;
use std::time::Duration;

pub use banana_pro::BananaProClient;
pub use seedream::SeedreamClient;

/// What a provider needs to produce images.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub count: u32,
    pub size: Option<String>,
    pub sequential_image_generation: Option<String>,
    pub response_format: Option<String>,
    pub watermark: Option<bool>,
    /// Reference images as data URLs or bare base64.
    pub images: Vec<String>,
}

#[async_trait]
pub trait ImageProvider: Send + Sync + Debug {
    /// Image URLs or data URLs.
    async fn generate(&self, request: &ProviderRequest) -> Result<Vec<String>>;
}

pub fn create_provider(model: Model, config: &ProviderConfig) -> Result<Box<dyn ImageProvider>> {
    if config.api_key.trim().is_empty() {
        bail!("API key for {} is not configured", model.display_name());
    }
    if config.base_url.trim().is_empty() {
        bail!("Base URL for {} is not configured", model.display_name());
    }

    info!("Initializing image provider: {}", model);
    match model {
        Model::Seedream => Ok(Box::new(SeedreamClient::new(&config.base_url, &config.api_key))),
        Model::BananaPro => Ok(Box::new(BananaProClient::new(&config.base_url, &config.api_key))),
    }
}

/// Probes `{base_url}/v1/models`. A 401 still proves the service is there.
pub async fn test_connection(config: &ProviderConfig) -> Result<bool> {
    if config.api_key.trim().is_empty() {
        bail!("API key is not configured");
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let url = format!("{}/v1/models", config.base_url.trim_end_matches('/'));

    let response = client
        .get(&url)
        .bearer_auth(&config.api_key)
        .send()
        .await
        .with_context(|| format!("Connection to {} failed", url))?;

    let status = response.status();
    if status.is_success() || status.as_u16() == 401 {
        Ok(true)
    } else {
        Err(anyhow!("Service answered {}", status))
    }
}

/// Splits a data URL into mime type and payload. Bare base64 is PNG.
pub(crate) fn split_inline_image(image: &str) -> (String, String) {
    match image.trim().strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest.split_once(',').unwrap_or(("", rest));
            let mime = meta.split(';').next().filter(|m| !m.is_empty()).unwrap_or("image/png");
            (mime.to_string(), payload.to_string())
        }
        None => ("image/png".to_string(), image.trim().to_string()),
    }
}
