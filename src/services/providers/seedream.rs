use super::{split_inline_image, ImageProvider, ProviderRequest};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

const MODEL_ID: &str = "doubao-seedream-4-0-250828";
const DEFAULT_SIZE: &str = "2K";
const SEQUENTIAL_MAX_IMAGES: u32 = 3;

#[derive(Debug)]
pub struct SeedreamClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SeedreamClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize, Debug)]
struct SeedreamRequest {
    model: String,
    prompt: String,
    size: String,
    sequential_image_generation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequential_image_generation_options: Option<SequentialOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<String>,
    watermark: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image: Vec<String>,
}

#[derive(Serialize, Debug)]
struct SequentialOptions {
    max_images: u32,
}

#[derive(Deserialize)]
struct SeedreamResponse {
    #[serde(default)]
    data: Vec<SeedreamImage>,
    error: Option<SeedreamError>,
}

#[derive(Deserialize)]
struct SeedreamImage {
    url: Option<String>,
    b64_json: Option<String>,
}

#[derive(Deserialize)]
struct SeedreamError {
    message: String,
}

fn build_request(request: &ProviderRequest) -> SeedreamRequest {
    let sequential = request
        .sequential_image_generation
        .clone()
        .unwrap_or_else(|| "auto".to_string());
    let options = (sequential == "auto").then_some(SequentialOptions {
        max_images: SEQUENTIAL_MAX_IMAGES,
    });

    // The endpoint only takes data URIs.
    let image = request
        .images
        .iter()
        .map(|img| {
            let (mime, payload) = split_inline_image(img);
            format!("data:{};base64,{}", mime, payload)
        })
        .collect();

    SeedreamRequest {
        model: MODEL_ID.to_string(),
        prompt: request.prompt.clone(),
        size: request.size.clone().unwrap_or_else(|| DEFAULT_SIZE.to_string()),
        sequential_image_generation: sequential,
        sequential_image_generation_options: options,
        response_format: request.response_format.clone(),
        watermark: request.watermark.unwrap_or(false),
        image,
    }
}

fn parse_response(text: &str) -> Result<Vec<String>> {
    let response: SeedreamResponse = serde_json::from_str(text)
        .map_err(|e| anyhow!("Failed to parse Seedream response: {}. Body: {}", e, text))?;

    if let Some(err) = response.error {
        return Err(anyhow!("Seedream API returned error: {}", err.message));
    }

    let images: Vec<String> = response
        .data
        .into_iter()
        .filter_map(|item| match (item.url, item.b64_json) {
            (Some(url), _) => Some(url),
            (None, Some(b64)) => Some(format!("data:image/png;base64,{}", b64)),
            _ => None,
        })
        .collect();

    if images.is_empty() {
        return Err(anyhow!("Seedream returned no images"));
    }
    Ok(images)
}

#[async_trait]
impl ImageProvider for SeedreamClient {
    async fn generate(&self, request: &ProviderRequest) -> Result<Vec<String>> {
        let url = format!("{}/v1/images/generations", self.base_url);
        let body = build_request(request);
        debug!(
            "Seedream request: size={} sequential={} references={}",
            body.size,
            body.sequential_image_generation,
            body.image.len()
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Seedream request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Seedream API error {}: {}", status, error_text));
        }

        let text = resp.text().await?;
        parse_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::tests::serve_once;

    #[test]
    fn test_request_defaults() {
        let body = build_request(&ProviderRequest {
            prompt: "a cat".to_string(),
            images: vec!["QUJD".to_string()],
            ..Default::default()
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], MODEL_ID);
        assert_eq!(json["size"], "2K");
        assert_eq!(json["sequential_image_generation"], "auto");
        assert_eq!(json["sequential_image_generation_options"]["max_images"], 3);
        assert_eq!(json["watermark"], false);
        assert_eq!(json["image"][0], "data:image/png;base64,QUJD");
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_disabled_sequential_has_no_options() {
        let body = build_request(&ProviderRequest {
            prompt: "a cat".to_string(),
            size: Some("2048x2048".to_string()),
            sequential_image_generation: Some("disabled".to_string()),
            response_format: Some("url".to_string()),
            watermark: Some(true),
            ..Default::default()
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["size"], "2048x2048");
        assert!(json.get("sequential_image_generation_options").is_none());
        assert!(json.get("image").is_none());
        assert_eq!(json["watermark"], true);
    }

    #[test]
    fn test_parse_response() {
        let images = parse_response(r#"{"data":[{"url":"https://cdn/1.png"},{"b64_json":"QUJD"}]}"#).unwrap();
        assert_eq!(images, vec!["https://cdn/1.png", "data:image/png;base64,QUJD"]);
        assert!(parse_response(r#"{"data":[]}"#).is_err());
        let err = parse_response(r#"{"error":{"message":"quota"}}"#).unwrap_err();
        assert!(err.to_string().contains("quota"));
    }

    #[tokio::test]
    async fn test_generate_posts_with_bearer() {
        let (base, handle) = serve_once(200, r#"{"data":[{"url":"https://cdn/x.png"}]}"#).await;
        let client = SeedreamClient::new(&base, "secret");
        let images = client
            .generate(&ProviderRequest { prompt: "p".to_string(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(images, vec!["https://cdn/x.png"]);

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /v1/images/generations "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
    }
}
