//! Console front-end driving the [`Studio`].

use crate::core::models::{ImageType, Model, Quality, ResolutionTier};
use crate::services::export::SaveDialog;
use crate::services::library::build_query;
use crate::services::params::{AspectRatio, SIZE_PRESETS};
use crate::services::state::{Notice, NoticeLevel, PromptState};
use crate::services::workflow::Studio;
use anyhow::Result;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, CustomType, Select, Text};
use std::path::PathBuf;

const MENU_PROMPT: &str = "Enter prompt";
const MENU_BIND: &str = "Bind reference image";
const MENU_UNBIND: &str = "Unbind character";
const MENU_OPTIONS: &str = "Generation settings";
const MENU_GENERATE: &str = "Generate";
const MENU_EXPORT: &str = "Export image";
const MENU_LIBRARY: &str = "Reference library";
const MENU_API: &str = "API settings";
const MENU_QUIT: &str = "Quit";

/// Save dialog backed by a path prompt. Escape cancels.
pub struct InquireSaveDialog {
    default_dir: PathBuf,
}

impl InquireSaveDialog {
    pub fn new(default_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_dir: default_dir.into(),
        }
    }
}

#[async_trait]
impl SaveDialog for InquireSaveDialog {
    async fn choose_path(&self, suggested_name: &str) -> Result<Option<PathBuf>> {
        let suggested = self.default_dir.join(suggested_name);
        let answer = Text::new("Save image to:")
            .with_default(&suggested.to_string_lossy())
            .prompt_skippable()?;
        Ok(answer
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from))
    }
}

pub fn format_notice(notice: &Notice) -> String {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Warning => "warn",
        NoticeLevel::Error => "error",
    };
    format!("[{}] {}", tag, notice.message)
}

/// One line per character of the current prompt.
pub fn character_lines(state: &PromptState) -> Vec<String> {
    let Some(parsed) = state.parsed.as_ref() else {
        return Vec::new();
    };
    parsed
        .characters
        .iter()
        .map(|c| {
            let path = state
                .bindings
                .get(&c.name)
                .and_then(|b| b.reference_image_path.as_deref());
            match (c.bound, path) {
                (true, Some(path)) => format!("@{}  bound -> {}", c.name, path),
                _ => format!("@{}  unbound", c.name),
            }
        })
        .collect()
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% (estimated)")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn flush_notices(studio: &mut Studio) {
    for notice in studio.context_mut().take_notices() {
        println!("{}", format_notice(&notice));
    }
}

pub async fn run(studio: &mut Studio) -> Result<()> {
    flush_notices(studio);

    loop {
        let options = vec![
            MENU_PROMPT,
            MENU_BIND,
            MENU_UNBIND,
            MENU_OPTIONS,
            MENU_GENERATE,
            MENU_EXPORT,
            MENU_LIBRARY,
            MENU_API,
            MENU_QUIT,
        ];
        let choice = Select::new("What next?", options).prompt()?;

        match choice {
            MENU_PROMPT => {
                let prompt = Text::new("Prompt (mention characters with @name):").prompt()?;
                if studio.parse(&prompt).await {
                    for line in character_lines(&studio.context().prompt) {
                        println!("  {}", line);
                    }
                }
            }
            MENU_BIND => bind_menu(studio).await?,
            MENU_UNBIND => {
                let bound: Vec<String> = studio.context().prompt.bindings.keys().cloned().collect();
                if bound.is_empty() {
                    println!("No bound characters.");
                } else {
                    let name = Select::new("Character:", bound).prompt()?;
                    studio.unbind(&name).await;
                }
            }
            MENU_OPTIONS => options_menu(studio).await?,
            MENU_GENERATE => {
                let pb = progress_bar()?;
                let bar = pb.clone();
                let result = studio.generate(&move |v: u8| bar.set_position(v as u64)).await;
                pb.finish_and_clear();
                if let Some(result) = result.filter(|r| r.success) {
                    for (i, image) in result.images.iter().enumerate() {
                        println!("  {}. {}", i + 1, truncate(image, 96));
                    }
                }
            }
            MENU_EXPORT => {
                let images = studio.context().latest_images();
                if images.is_empty() {
                    println!("Nothing generated yet.");
                } else {
                    let labels: Vec<String> = images
                        .iter()
                        .enumerate()
                        .map(|(i, img)| format!("{}. {}", i + 1, truncate(img, 64)))
                        .collect();
                    let picked = Select::new("Image:", labels.clone()).prompt()?;
                    if let Some(index) = labels.iter().position(|l| *l == picked) {
                        studio.export(&images[index]).await;
                    }
                }
            }
            MENU_LIBRARY => library_menu(studio).await?,
            MENU_API => api_menu(studio).await?,
            _ => break,
        }

        flush_notices(studio);
    }

    Ok(())
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let head: String = value.chars().take(max).collect();
        format!("{}...", head)
    }
}

fn image_type_prompt() -> Result<ImageType> {
    let picked = Select::new("Image type:", vec!["person", "scene"]).prompt()?;
    Ok(picked.parse::<ImageType>()?)
}

async fn bind_menu(studio: &mut Studio) -> Result<()> {
    let mut names = studio.context().prompt.unbound();
    if names.is_empty() {
        names = studio
            .context()
            .prompt
            .parsed
            .as_ref()
            .map(|p| p.character_names())
            .unwrap_or_default();
    }

    let name = if names.is_empty() {
        Text::new("Character name:").prompt()?
    } else {
        Select::new("Character:", names).prompt()?
    };
    let path = Text::new("Image file path or data URL:").prompt()?;
    let image_type = image_type_prompt()?;
    studio.bind(&name, &path, image_type).await;
    Ok(())
}

async fn options_menu(studio: &mut Studio) -> Result<()> {
    let mut options = studio.context().generation.clone();

    let models: Vec<&str> = Model::ALL.iter().map(|m| m.as_str()).collect();
    options.model = Select::new("Model:", models).prompt()?.parse::<Model>()?;

    match options.model {
        Model::Seedream => {
            options.size = Select::new("Size:", SIZE_PRESETS.to_vec()).prompt()?.to_string();
            options.watermark = Confirm::new("Watermark?")
                .with_default(options.watermark)
                .prompt()?;
        }
        Model::BananaPro => {
            let ratios: Vec<String> = AspectRatio::STANDARD.iter().map(|r| r.to_string()).collect();
            options.ratio = Select::new("Aspect ratio:", ratios).prompt()?.parse::<AspectRatio>()?;
            let tiers: Vec<&str> = ResolutionTier::ALL.iter().map(|t| t.label()).collect();
            let tier = Select::new("Resolution:", tiers).prompt()?;
            options.tier = ResolutionTier::ALL
                .iter()
                .copied()
                .find(|t| t.label() == tier)
                .unwrap_or_default();
        }
    }

    let qualities: Vec<&str> = Quality::ALL.iter().map(|q| q.as_str()).collect();
    let quality = Select::new("Quality:", qualities).prompt()?;
    options.quality = Quality::ALL
        .iter()
        .copied()
        .find(|q| q.as_str() == quality)
        .unwrap_or_default();
    options.count = CustomType::<u32>::new("Number of images:")
        .with_default(options.count)
        .prompt()?;

    let (width, height) = options.dimensions();
    println!("Output size: {}x{}", width, height);
    if Confirm::new("Save as default?").with_default(true).prompt()? {
        studio.save_generation_options(options).await;
    } else {
        studio.context_mut().generation = options;
    }
    Ok(())
}

async fn library_menu(studio: &mut Studio) -> Result<()> {
    let actions = vec!["Filter", "Add tag", "Remove tag", "Delete", "Back"];
    let action = Select::new("Library:", actions).prompt()?;

    if action == "Filter" {
        let image_type = match Select::new("Type:", vec!["any", "person", "scene"]).prompt()? {
            "any" => None,
            other => Some(other.parse::<ImageType>()?),
        };
        let search = Text::new("Search (empty for all):").prompt()?;
        let tags = Text::new("Tags, comma separated:").prompt()?;
        let tags: Vec<String> = tags
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let query = build_query(image_type, Some(&search), &tags);
        if studio.filter_library(query).await {
            for item in &studio.context().library.items {
                let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
                println!(
                    "  {} ({}) [{}]",
                    item.character_name,
                    item.image_type,
                    tags.join(", ")
                );
            }
        }
        return Ok(());
    }
    if action == "Back" {
        return Ok(());
    }

    let names: Vec<String> = studio
        .context()
        .library
        .items
        .iter()
        .map(|b| b.character_name.clone())
        .collect();
    if names.is_empty() {
        println!("The library is empty.");
        return Ok(());
    }
    let name = Select::new("Reference:", names).prompt()?;

    match action {
        "Add tag" => {
            let tag = Text::new("Tag:").prompt()?;
            studio.add_tag(&name, &tag).await;
        }
        "Remove tag" => {
            let tags: Vec<String> = studio
                .context()
                .library
                .items
                .iter()
                .find(|b| b.character_name == name)
                .map(|b| b.tags.iter().cloned().collect())
                .unwrap_or_default();
            if tags.is_empty() {
                println!("{} has no tags.", name);
            } else {
                let tag = Select::new("Tag:", tags).prompt()?;
                studio.remove_tag(&name, &tag).await;
            }
        }
        _ => {
            if Confirm::new(&format!("Delete {}?", name)).with_default(false).prompt()? {
                studio.delete_reference(&name).await;
            }
        }
    }
    Ok(())
}

async fn api_menu(studio: &mut Studio) -> Result<()> {
    let models: Vec<&str> = Model::ALL.iter().map(|m| m.as_str()).collect();
    let model = Select::new("Provider:", models).prompt()?.parse::<Model>()?;

    let mut config = studio.context().api_config.clone();
    let provider = config.provider_mut(model);
    provider.base_url = Text::new("Base URL:")
        .with_default(&provider.base_url)
        .prompt()?
        .trim()
        .to_string();
    let key = Text::new("API key (empty keeps the current one):").prompt()?;
    if !key.trim().is_empty() {
        provider.api_key = key.trim().to_string();
    }

    if studio.save_api_config(config).await
        && Confirm::new("Test the connection?").with_default(true).prompt()?
    {
        flush_notices(studio);
        studio.test_connection(model).await;
    }
    Ok(())
}
