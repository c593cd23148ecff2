use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// --- Prompt ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Scene,
    Action,
    Character,
    Background,
    Time,
    Weather,
    Style,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSegment {
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub content: String,
    pub start_index: usize,
    pub end_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub bound: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrompt {
    pub original: String,
    #[serde(default)]
    pub segments: Vec<PromptSegment>,
    #[serde(default)]
    pub characters: Vec<CharacterRef>,
}

impl ParsedPrompt {
    pub fn character_names(&self) -> Vec<String> {
        self.characters.iter().map(|c| c.name.clone()).collect()
    }

    pub fn character(&self, name: &str) -> Option<&CharacterRef> {
        self.characters.iter().find(|c| c.name == name)
    }

    pub fn set_bound(&mut self, name: &str, bound: bool) -> bool {
        match self.characters.iter_mut().find(|c| c.name == name) {
            Some(character) => {
                character.bound = bound;
                true
            }
            None => false,
        }
    }
}

// --- Bindings ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    #[serde(alias = "人物")]
    Person,
    #[serde(alias = "场景")]
    Scene,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Person => "person",
            ImageType::Scene => "scene",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "person" | "Person" | "人物" => Ok(ImageType::Person),
            "scene" | "Scene" | "场景" => Ok(ImageType::Scene),
            other => Err(anyhow::anyhow!("Unknown image type: {}", other)),
        }
    }
}

/// A persisted association between a character name and a reference image.
///
/// Deserialization goes through [`crate::core::normalize`], which accepts both
/// the camelCase and snake_case field spellings produced by older backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "serde_json::Value")]
pub struct CharacterBinding {
    pub character_name: String,
    pub reference_image_path: Option<String>,
    pub image_type: ImageType,
    pub created_at: String,
    pub bound: bool,
    pub tags: BTreeSet<String>,
}

impl CharacterBinding {
    /// A record without a non-empty path does not count as a binding.
    pub fn has_reference(&self) -> bool {
        self.reference_image_path
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Binding entry as the generate request spells it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRef {
    #[serde(alias = "characterName")]
    pub character_name: String,
    #[serde(default, alias = "referenceImagePath")]
    pub reference_image_path: Option<String>,
    #[serde(default, alias = "imageType")]
    pub image_type: ImageType,
}

impl From<&CharacterBinding> for BindingRef {
    fn from(binding: &CharacterBinding) -> Self {
        Self {
            character_name: binding.character_name.clone(),
            reference_image_path: binding.reference_image_path.clone(),
            image_type: binding.image_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceQuery {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "imageType")]
    pub image_type: Option<ImageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

// --- Generation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Model {
    #[default]
    #[serde(rename = "seedream", alias = "jimeng")]
    Seedream,
    #[serde(rename = "banana_pro", alias = "bananaPro")]
    BananaPro,
}

impl Model {
    pub const ALL: [Model; 2] = [Model::Seedream, Model::BananaPro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Seedream => "seedream",
            Model::BananaPro => "banana_pro",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Model::Seedream => "Seedream",
            Model::BananaPro => "Banana Pro",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "seedream" | "jimeng" => Ok(Model::Seedream),
            "banana_pro" | "bananaPro" => Ok(Model::BananaPro),
            other => Err(anyhow::anyhow!("Unsupported model: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    High,
    Ultra,
}

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::Standard, Quality::High, Quality::Ultra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::High => "high",
            Quality::Ultra => "ultra",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolutionTier {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ResolutionTier {
    pub const ALL: [ResolutionTier; 3] = [
        ResolutionTier::OneK,
        ResolutionTier::TwoK,
        ResolutionTier::FourK,
    ];

    pub fn pixels(&self) -> u32 {
        match self {
            ResolutionTier::OneK => 1024,
            ResolutionTier::TwoK => 2048,
            ResolutionTier::FourK => 4096,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResolutionTier::OneK => "1K",
            ResolutionTier::TwoK => "2K",
            ResolutionTier::FourK => "4K",
        }
    }
}

/// Stored generation defaults.
///
/// For ratio-based models `width`/`height` hold the ratio terms; configs saved
/// before ratio selection existed hold pixel counts and are normalized on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub model: Model,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "sequentialImageGeneration"
    )]
    pub sequential_image_generation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "responseFormat")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionTier>,
}

fn default_count() -> u32 {
    1
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: Model::Seedream,
            width: 1,
            height: 1,
            count: 1,
            quality: Quality::Standard,
            size: Some("1024x1024".to_string()),
            sequential_image_generation: Some("disabled".to_string()),
            response_format: Some("url".to_string()),
            watermark: Some(false),
            resolution: Some(ResolutionTier::OneK),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationParams {
    pub model: Model,
    pub prompt: String,
    #[serde(default, alias = "characterBindings")]
    pub character_bindings: Vec<BindingRef>,
    pub width: u32,
    pub height: u32,
    pub count: u32,
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "sequentialImageGeneration"
    )]
    pub sequential_image_generation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "responseFormat")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationResult {
    pub success: bool,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        default,
        rename = "taskId",
        alias = "task_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_id: Option<String>,
}

impl ImageGenerationResult {
    pub fn succeeded(images: Vec<String>, task_id: impl Into<String>) -> Self {
        Self {
            success: true,
            images,
            error: None,
            task_id: Some(task_id.into()),
        }
    }

    pub fn failed(error: impl Into<String>, task_id: Option<String>) -> Self {
        Self {
            success: false,
            images: Vec::new(),
            error: Some(error.into()),
            task_id,
        }
    }
}

// --- Credentials ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default, alias = "base_url")]
    pub base_url: String,
    #[serde(default, alias = "api_key")]
    pub api_key: String,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default, alias = "jimeng")]
    pub seedream: ProviderConfig,
    #[serde(default, rename = "bananaPro", alias = "banana_pro")]
    pub banana_pro: ProviderConfig,
}

impl ApiConfig {
    /// Public endpoints with empty keys.
    pub fn with_default_endpoints() -> Self {
        Self {
            seedream: ProviderConfig::new("https://eggfans.com", ""),
            banana_pro: ProviderConfig::new("https://api.zhongzhuan.chat", ""),
        }
    }

    pub fn provider(&self, model: Model) -> &ProviderConfig {
        match model {
            Model::Seedream => &self.seedream,
            Model::BananaPro => &self.banana_pro,
        }
    }

    pub fn provider_mut(&mut self, model: Model) -> &mut ProviderConfig {
        match model {
            Model::Seedream => &mut self.seedream,
            Model::BananaPro => &mut self.banana_pro,
        }
    }
}
