//! In-process implementation of the command surface, backed by [`Storage`].

pub mod segmenter;
pub mod settings;
pub mod store;

use crate::core::io::Storage;
use crate::core::models::{
    ApiConfig, BindingRef, GenerationConfig, ImageGenerationParams, ImageGenerationResult,
    ImageType, Model, ProviderConfig, ReferenceQuery,
};
use crate::core::transport::CommandHost;
use crate::services::providers::{self, ProviderRequest};
use crate::utils::image::{compact_reference, decode_data_url, encode_data_url, is_data_url, is_remote_url};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use settings::SettingsStore;
use std::path::Path;
use std::sync::Arc;
use store::BindingStore;

#[derive(Deserialize)]
struct PromptArgs {
    prompt: String,
}

#[derive(Deserialize)]
struct NamesArgs {
    #[serde(default)]
    characters: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameArgs {
    #[serde(alias = "character_name")]
    character_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveImageArgs {
    #[serde(alias = "character_name")]
    character_name: String,
    #[serde(alias = "image_data")]
    image_data: String,
    #[serde(default, alias = "image_type")]
    image_type: ImageType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindArgs {
    #[serde(alias = "character_name")]
    character_name: String,
    #[serde(alias = "reference_image_path")]
    reference_image_path: String,
    #[serde(default, alias = "image_type")]
    image_type: ImageType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagArgs {
    #[serde(alias = "character_name")]
    character_name: String,
    tag: String,
}

#[derive(Deserialize)]
struct ConfigArgs<T> {
    config: T,
}

#[derive(Deserialize)]
struct GenerateArgs {
    params: ImageGenerationParams,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionArgs {
    model: Model,
    #[serde(default, alias = "base_url")]
    base_url: Option<String>,
    #[serde(default, alias = "api_key")]
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct QueryArgs {
    #[serde(default)]
    query: Option<ReferenceQuery>,
}

#[derive(Deserialize)]
struct KeywordArgs {
    keyword: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeArgs {
    #[serde(alias = "image_type")]
    image_type: ImageType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveFileArgs {
    #[serde(alias = "image_url")]
    image_url: String,
    #[serde(alias = "file_path")]
    file_path: String,
}

fn parse_args<T: DeserializeOwned>(command: &str, args: Value) -> Result<T> {
    serde_json::from_value(args).with_context(|| format!("Invalid arguments for {}", command))
}

/// Prompt text with a `[name: path]` hint for every bound character.
pub fn prompt_with_bindings(prompt: &str, bindings: &[BindingRef]) -> String {
    let mut out = prompt.to_string();
    for binding in bindings {
        if let Some(path) = binding.reference_image_path.as_deref().filter(|p| !p.is_empty()) {
            out.push_str(&format!(" [{}: {}]", binding.character_name, path));
        }
    }
    out
}

pub struct LocalCommandHost {
    bindings: BindingStore,
    settings: SettingsStore,
    client: reqwest::Client,
}

impl LocalCommandHost {
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        Ok(Self {
            bindings: BindingStore::open(storage.clone()).await?,
            settings: SettingsStore::new(storage),
            client: reqwest::Client::new(),
        })
    }

    async fn test_connection(&self, args: ConnectionArgs) -> Result<bool> {
        let provider = match (args.base_url, args.api_key) {
            (Some(base_url), Some(api_key)) => ProviderConfig::new(base_url, api_key),
            _ => self.settings.load_api_config().await?.provider(args.model).clone(),
        };
        providers::test_connection(&provider).await
    }

    /// Runs a generation. Provider and configuration problems come back as
    /// a failed result, not as an error.
    pub async fn generate(&self, params: ImageGenerationParams) -> ImageGenerationResult {
        let task_id = format!("task_{}", chrono::Utc::now().timestamp_millis());
        info!("[{}] Generating with {}", task_id, params.model);

        let api_config = match self.settings.load_api_config().await {
            Ok(config) => config,
            Err(_) => {
                return ImageGenerationResult::failed("Please configure the API first", Some(task_id))
            }
        };

        let provider = match providers::create_provider(params.model, api_config.provider(params.model)) {
            Ok(provider) => provider,
            Err(e) => return ImageGenerationResult::failed(e.to_string(), Some(task_id)),
        };

        let mut images = params.images.clone().unwrap_or_default();
        for binding in &params.character_bindings {
            let Some(path) = binding.reference_image_path.as_deref().filter(|p| !p.is_empty()) else {
                continue;
            };
            match tokio::fs::read(path).await {
                Ok(data) => {
                    let (mime, bytes) = compact_reference(data);
                    images.push(encode_data_url(&mime, &bytes));
                }
                Err(e) => warn!("[{}] Skipping reference {}: {}", task_id, path, e),
            }
        }

        let request = ProviderRequest {
            prompt: prompt_with_bindings(&params.prompt, &params.character_bindings),
            width: params.width,
            height: params.height,
            count: params.count,
            size: params.size.clone(),
            sequential_image_generation: params.sequential_image_generation.clone(),
            response_format: params.response_format.clone(),
            watermark: params.watermark,
            images,
        };

        match provider.generate(&request).await {
            Ok(images) => {
                info!("[{}] {} image(s) generated", task_id, images.len());
                ImageGenerationResult::succeeded(images, task_id)
            }
            Err(e) => {
                error!("[{}] Generation failed: {:#}", task_id, e);
                ImageGenerationResult::failed(format!("{:#}", e), Some(task_id))
            }
        }
    }

    /// Writes an image (data URL, remote URL or local file) to `file_path`.
    pub async fn save_image_to_file(&self, image_url: &str, file_path: &str) -> Result<String> {
        let target = Path::new(file_path);
        if file_path.trim().is_empty() {
            bail!("No file path given");
        }

        let bytes = if is_data_url(image_url) {
            decode_data_url(image_url)?.bytes
        } else if is_remote_url(image_url) {
            let resp = self.client.get(image_url).send().await?;
            if !resp.status().is_success() {
                return Err(anyhow!("Download failed with {}", resp.status()));
            }
            resp.bytes().await?.to_vec()
        } else {
            let source = image_url.strip_prefix("file://").unwrap_or(image_url);
            tokio::fs::read(source)
                .await
                .with_context(|| format!("Failed to read {}", source))?
        };

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(target, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        info!("Saved image to {}", target.display());
        Ok(target.to_string_lossy().to_string())
    }
}

#[async_trait]
impl CommandHost for LocalCommandHost {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value> {
        let value = match command {
            "parse_prompt" => {
                let a: PromptArgs = parse_args(command, args)?;
                json!(segmenter::parse_prompt(&a.prompt)?)
            }
            "get_bindings_for_prompt" => {
                let a: NamesArgs = parse_args(command, args)?;
                json!(self.bindings.for_names(&a.characters).await)
            }
            "get_all_bindings" => json!(self.bindings.all().await),
            "save_reference_image" => {
                let a: SaveImageArgs = parse_args(command, args)?;
                json!(
                    self.bindings
                        .save_image(&a.character_name, &a.image_data, a.image_type)
                        .await?
                )
            }
            "bind_character_reference" => {
                let a: BindArgs = parse_args(command, args)?;
                json!(
                    self.bindings
                        .bind_path(&a.character_name, &a.reference_image_path, a.image_type)
                        .await?
                )
            }
            "unbind_character" => {
                let a: NameArgs = parse_args(command, args)?;
                json!(self.bindings.unbind(&a.character_name).await?)
            }
            "generate_image" => {
                let a: GenerateArgs = parse_args(command, args)?;
                json!(self.generate(a.params).await)
            }
            "save_api_config" => {
                let a: ConfigArgs<ApiConfig> = parse_args(command, args)?;
                self.settings.save_api_config(&a.config).await?;
                json!(true)
            }
            "load_api_config" => json!(self.settings.load_api_config().await?),
            "get_default_api_config" => json!(ApiConfig::with_default_endpoints()),
            "test_api_connection" => {
                let a: ConnectionArgs = parse_args(command, args)?;
                json!(self.test_connection(a).await?)
            }
            "save_generation_config" => {
                let a: ConfigArgs<GenerationConfig> = parse_args(command, args)?;
                self.settings.save_generation_config(&a.config).await?;
                json!(true)
            }
            "load_generation_config" => json!(self.settings.load_generation_config().await?),
            "get_default_generation_config" => json!(GenerationConfig::default()),
            "get_reference_images" => {
                let a: QueryArgs = parse_args(command, args)?;
                json!(self.bindings.query(&a.query.unwrap_or_default()).await)
            }
            "search_reference_images" => {
                let a: KeywordArgs = parse_args(command, args)?;
                json!(self.bindings.search(&a.keyword).await)
            }
            "get_references_by_type" => {
                let a: TypeArgs = parse_args(command, args)?;
                json!(self.bindings.by_type(a.image_type).await)
            }
            "add_tag_to_reference" => {
                let a: TagArgs = parse_args(command, args)?;
                json!(self.bindings.add_tag(&a.character_name, &a.tag).await?)
            }
            "remove_tag_from_reference" => {
                let a: TagArgs = parse_args(command, args)?;
                json!(self.bindings.remove_tag(&a.character_name, &a.tag).await?)
            }
            "get_all_tags" => json!(self.bindings.all_tags().await),
            "delete_reference_image" => {
                let a: NameArgs = parse_args(command, args)?;
                json!(self.bindings.delete(&a.character_name).await?)
            }
            "save_image_to_file" => {
                let a: SaveFileArgs = parse_args(command, args)?;
                json!(self.save_image_to_file(&a.image_url, &a.file_path).await?)
            }
            other => bail!("Unknown command: {}", other),
        };
        Ok(value)
    }
}
