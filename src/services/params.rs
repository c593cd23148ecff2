//! Translation of user-facing generation options into request parameters.
//!
//! Everything here is pure so the arithmetic can be tested without a transport.

use crate::core::error::{ApiError, ApiResult};
use crate::core::models::{
    BindingRef, CharacterBinding, GenerationConfig, ImageGenerationParams, Model, Quality,
    ResolutionTier,
};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// --- Size presets (Seedream) ---

pub const SIZE_PRESETS: [&str; 3] = ["1024x1024", "2048x2048", "4096x4096"];
pub const DEFAULT_SIZE: &str = "1024x1024";

/// Splits a `WxH` string. Anything unparsable yields `None`.
pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.trim().split_once(|c: char| c == 'x' || c == 'X')?;
    let width = w.trim().parse::<u32>().ok()?;
    let height = h.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

// --- Aspect ratios (Banana Pro) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const SQUARE: AspectRatio = AspectRatio::new(1, 1);

    pub const STANDARD: [AspectRatio; 5] = [
        AspectRatio::new(1, 1),
        AspectRatio::new(16, 9),
        AspectRatio::new(9, 16),
        AspectRatio::new(4, 3),
        AspectRatio::new(3, 4),
    ];

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_standard(&self) -> bool {
        Self::STANDARD.contains(self)
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::SQUARE
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid aspect ratio: {}", s))?;
        let width: u32 = w.trim().parse()?;
        let height: u32 = h.trim().parse()?;
        if width == 0 || height == 0 {
            anyhow::bail!("Invalid aspect ratio: {}", s);
        }
        Ok(Self::new(width, height))
    }
}

pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Maps a stored width/height pair onto a ratio.
///
/// Older configs stored pixel counts here. Reduced pairs that are still
/// large (either term over 20) are not meaningful ratios and fall back to 1:1.
pub fn normalize_ratio(width: u32, height: u32) -> AspectRatio {
    if width == height || width == 0 || height == 0 {
        return AspectRatio::SQUARE;
    }

    let divisor = gcd(width, height);
    let reduced = AspectRatio::new(width / divisor, height / divisor);
    if reduced.is_standard() {
        return reduced;
    }
    if reduced.width > 20 || reduced.height > 20 {
        return AspectRatio::SQUARE;
    }
    reduced
}

/// round(a / b), halves rounding up.
fn div_round(a: u64, b: u64) -> u64 {
    (2 * a + b) / (2 * b)
}

/// Pixel dimensions of `ratio` with the long side at the tier's base.
pub fn derive_dimensions(ratio: AspectRatio, tier: ResolutionTier) -> (u32, u32) {
    let base = tier.pixels() as u64;
    let (w, h) = (ratio.width.max(1) as u64, ratio.height.max(1) as u64);
    if w >= h {
        (base as u32, div_round(base * h, w) as u32)
    } else {
        (div_round(base * w, h) as u32, base as u32)
    }
}

// --- Options ---

/// What the user has chosen for the next generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub model: Model,
    pub size: String,
    pub ratio: AspectRatio,
    pub tier: ResolutionTier,
    pub count: u32,
    pub quality: Quality,
    pub sequential_image_generation: Option<String>,
    pub response_format: Option<String>,
    pub watermark: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

impl GenerationOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        let size = config
            .size
            .as_deref()
            .filter(|s| parse_size(s).is_some())
            .unwrap_or(DEFAULT_SIZE)
            .to_string();

        Self {
            model: config.model,
            size,
            ratio: normalize_ratio(config.width, config.height),
            tier: config.resolution.unwrap_or_default(),
            count: config.count.max(1),
            quality: config.quality,
            sequential_image_generation: config.sequential_image_generation.clone(),
            response_format: config.response_format.clone(),
            watermark: config.watermark.unwrap_or(false),
        }
    }

    /// The persisted form. `width`/`height` hold the ratio terms.
    pub fn to_config(&self) -> GenerationConfig {
        GenerationConfig {
            model: self.model,
            width: self.ratio.width,
            height: self.ratio.height,
            count: self.count,
            quality: self.quality,
            size: Some(self.size.clone()),
            sequential_image_generation: self.sequential_image_generation.clone(),
            response_format: self.response_format.clone(),
            watermark: Some(self.watermark),
            resolution: Some(self.tier),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self.model {
            Model::Seedream => parse_size(&self.size)
                .or_else(|| parse_size(DEFAULT_SIZE))
                .unwrap_or((1024, 1024)),
            Model::BananaPro => derive_dimensions(self.ratio, self.tier),
        }
    }
}

/// Builds the generate request from the prompt, the local binding map and
/// the chosen options. Only bindings with a reference path are sent.
pub fn assemble_request(
    prompt: &str,
    bindings: &BTreeMap<String, CharacterBinding>,
    options: &GenerationOptions,
) -> ApiResult<ImageGenerationParams> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::validation("Prompt cannot be empty"));
    }
    if options.count == 0 {
        return Err(ApiError::validation("Nothing to generate: count must be at least 1"));
    }

    let (width, height) = options.dimensions();
    let character_bindings: Vec<BindingRef> = bindings
        .values()
        .filter(|b| b.has_reference())
        .map(BindingRef::from)
        .collect();

    let mut params = ImageGenerationParams {
        model: options.model,
        prompt: prompt.to_string(),
        character_bindings,
        width,
        height,
        count: options.count,
        quality: options.quality,
        size: None,
        sequential_image_generation: None,
        response_format: None,
        watermark: None,
        images: None,
    };

    if options.model == Model::Seedream {
        params.size = Some(options.size.clone());
        params.sequential_image_generation = options.sequential_image_generation.clone();
        params.response_format = options.response_format.clone();
        params.watermark = Some(options.watermark);
    }

    Ok(params)
}
