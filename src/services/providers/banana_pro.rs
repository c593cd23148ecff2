use super::{split_inline_image, ImageProvider, ProviderRequest};
use crate::services::params::gcd;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

const MODEL_ID: &str = "gemini-3.1-flash-image-preview";

#[derive(Debug)]
pub struct BananaProClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl BananaProClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default = "default_mime")]
    mime_type: String,
    data: String,
}

fn default_mime() -> String {
    "image/png".to_string()
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    image_config: ImageConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
    image_size: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ResponseError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct ResponseError {
    message: String,
}

/// `1920x1080` -> `16:9`.
pub fn aspect_ratio_label(width: u32, height: u32) -> String {
    let divisor = gcd(width, height).max(1);
    format!("{}:{}", width / divisor, height / divisor)
}

/// Size bucket for the requested width.
pub fn image_size_label(width: u32) -> &'static str {
    match width {
        0..=576 => "256k",
        577..=1024 => "1K",
        1025..=2048 => "2K",
        _ => "4K",
    }
}

fn build_request(request: &ProviderRequest) -> GenerateRequest {
    let mut parts: Vec<Part> = request
        .images
        .iter()
        .map(|img| {
            let (mime_type, data) = split_inline_image(img);
            Part::Inline {
                inline_data: InlineData { mime_type, data },
            }
        })
        .collect();
    parts.push(Part::Text {
        text: request.prompt.clone(),
    });

    GenerateRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts,
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            image_config: ImageConfig {
                aspect_ratio: aspect_ratio_label(request.width, request.height),
                image_size: image_size_label(request.width).to_string(),
            },
        },
    }
}

fn parse_response(text: &str) -> Result<Vec<String>> {
    let response: GenerateResponse = serde_json::from_str(text)
        .map_err(|e| anyhow!("Failed to parse Banana Pro response: {}. Body: {}", e, text))?;

    if let Some(err) = response.error {
        return Err(anyhow!("Banana Pro API returned error: {}", err.message));
    }

    // One image per candidate.
    let images: Vec<String> = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .filter_map(|candidate| {
            candidate
                .content?
                .parts
                .into_iter()
                .find_map(|part| part.inline_data)
                .map(|inline| format!("data:{};base64,{}", inline.mime_type, inline.data))
        })
        .collect();

    if images.is_empty() {
        return Err(anyhow!("Banana Pro returned no images"));
    }
    Ok(images)
}

#[async_trait]
impl ImageProvider for BananaProClient {
    async fn generate(&self, request: &ProviderRequest) -> Result<Vec<String>> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, MODEL_ID, self.api_key
        );
        let body = build_request(request);
        debug!(
            "Banana Pro request: aspect={} size={} references={}",
            body.generation_config.image_config.aspect_ratio,
            body.generation_config.image_config.image_size,
            request.images.len()
        );

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Banana Pro request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Banana Pro API error {}: {}", status, error_text));
        }

        let text = resp.text().await?;
        parse_response(&text)
    }
}
