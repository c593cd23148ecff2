use crate::core::models::{
    ApiConfig, CharacterBinding, ImageGenerationResult, ParsedPrompt, ReferenceQuery,
};
use crate::services::params::GenerationOptions;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// The current prompt and the bindings known for its characters.
#[derive(Debug, Clone, Default)]
pub struct PromptState {
    pub parsed: Option<ParsedPrompt>,
    pub bindings: BTreeMap<String, CharacterBinding>,
}

impl PromptState {
    pub fn text(&self) -> Option<&str> {
        self.parsed.as_ref().map(|p| p.original.as_str())
    }

    pub fn mark(&mut self, name: &str, bound: bool) {
        if let Some(parsed) = self.parsed.as_mut() {
            parsed.set_bound(name, bound);
        }
    }

    pub fn unbound(&self) -> Vec<String> {
        self.parsed
            .as_ref()
            .map(|p| {
                p.characters
                    .iter()
                    .filter(|c| !c.bound)
                    .map(|c| c.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LibraryView {
    pub query: ReferenceQuery,
    pub items: Vec<CharacterBinding>,
    pub tags: BTreeSet<String>,
}

/// Everything the orchestrator keeps between operations.
#[derive(Debug, Clone, Default)]
pub struct AppContext {
    pub api_config: ApiConfig,
    pub generation: GenerationOptions,
    pub prompt: PromptState,
    pub library: LibraryView,
    pub generating: bool,
    pub progress: u8,
    pub results: Vec<ImageGenerationResult>,
    notices: Vec<Notice>,
}

impl AppContext {
    pub fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notices.push(Notice {
            level,
            message: message.into(),
        });
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn latest_images(&self) -> Vec<String> {
        self.results
            .last()
            .map(|r| r.images.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::CharacterRef;

    #[test]
    fn test_mark_and_unbound() {
        let mut state = PromptState {
            parsed: Some(ParsedPrompt {
                original: "@A @B".to_string(),
                segments: vec![],
                characters: vec![
                    CharacterRef { name: "A".to_string(), reference_image: None, bound: false },
                    CharacterRef { name: "B".to_string(), reference_image: None, bound: false },
                ],
            }),
            bindings: BTreeMap::new(),
        };
        state.mark("A", true);
        assert_eq!(state.unbound(), vec!["B"]);
        assert_eq!(state.text(), Some("@A @B"));
    }

    #[test]
    fn test_take_notices_drains() {
        let mut ctx = AppContext::default();
        ctx.notify(NoticeLevel::Info, "hi");
        assert_eq!(ctx.notices().len(), 1);
        assert_eq!(ctx.take_notices()[0].message, "hi");
        assert!(ctx.notices().is_empty());
    }
}
