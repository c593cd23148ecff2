//! Keyword-based prompt breakdown used by the local command host.

use crate::core::models::{CharacterRef, ParsedPrompt, PromptSegment, SegmentKind};
use anyhow::{bail, Result};
use regex::Regex;
use std::sync::LazyLock;

const SCENE_KEYWORDS: &[&str] = &[
    "在", "位于", "场景", "背景", "环境", "室内", "室外", "城市", "乡村", "森林", "海边", "山上",
    "天空", "夜晚", "白天", "scene", "forest", "city", "beach",
];

const ACTION_KEYWORDS: &[&str] = &[
    "做", "正在", "进行", "行走", "奔跑", "跳跃", "坐着", "站立", "看着", "拿着", "穿着", "带着",
    "抱着", "走", "跑", "跳", "walking", "running", "holding", "sitting",
];

const CHARACTER_KEYWORDS: &[&str] = &["人", "角色", "character"];
const BACKGROUND_KEYWORDS: &[&str] = &["background"];
const TIME_KEYWORDS: &[&str] = &["清晨", "黄昏", "傍晚", "午后", "morning", "evening", "sunset"];
const STYLE_KEYWORDS: &[&str] = &["风格", "水彩", "油画", "插画", "style", "watercolor"];
const WEATHER_KEYWORDS: &[&str] = &["下雨", "雨", "雪", "雾", "rain", "snow", "fog"];

/// `@` followed by Unicode word characters: letters, marks, digits and
/// connector punctuation.
static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("mention pattern is valid"));

/// `@name` mentions as (byte start of '@', name).
fn mentions(prompt: &str) -> Vec<(usize, &str)> {
    MENTION
        .captures_iter(prompt)
        .filter_map(|caps| Some((caps.get(0)?.start(), caps.get(1)?.as_str())))
        .collect()
}

pub fn detect_kind(content: &str) -> SegmentKind {
    let lower = content.to_lowercase();
    let has = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if has(SCENE_KEYWORDS) {
        SegmentKind::Scene
    } else if has(ACTION_KEYWORDS) {
        SegmentKind::Action
    } else if has(CHARACTER_KEYWORDS) {
        SegmentKind::Character
    } else if has(BACKGROUND_KEYWORDS) {
        SegmentKind::Background
    } else if has(TIME_KEYWORDS) {
        SegmentKind::Time
    } else if has(STYLE_KEYWORDS) {
        SegmentKind::Style
    } else if has(WEATHER_KEYWORDS) {
        SegmentKind::Weather
    } else {
        SegmentKind::Other
    }
}

pub fn parse_prompt(prompt: &str) -> Result<ParsedPrompt> {
    if prompt.trim().is_empty() {
        bail!("Prompt cannot be empty");
    }

    let found = mentions(prompt);

    let mut characters: Vec<CharacterRef> = Vec::new();
    for (_, name) in &found {
        if !characters.iter().any(|c| c.name == *name) {
            characters.push(CharacterRef {
                name: name.to_string(),
                reference_image: None,
                bound: false,
            });
        }
    }

    let mut clean = String::with_capacity(prompt.len());
    let mut cursor = 0;
    for (at, name) in &found {
        clean.push_str(&prompt[cursor..*at]);
        cursor = at + 1 + name.len();
    }
    clean.push_str(&prompt[cursor..]);
    let clean = clean.split_whitespace().collect::<Vec<_>>().join(" ");

    let segments = if clean.is_empty() {
        Vec::new()
    } else {
        vec![PromptSegment {
            kind: detect_kind(&clean),
            end_index: clean.chars().count(),
            content: clean,
            start_index: 0,
        }]
    };

    Ok(ParsedPrompt {
        original: prompt.to_string(),
        segments,
        characters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_are_unique_and_ordered() {
        let parsed = parse_prompt("@小明 和 @Lily_2 在森林里, @小明 笑了").unwrap();
        assert_eq!(parsed.character_names(), vec!["小明", "Lily_2"]);
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].kind, SegmentKind::Scene);
        assert_eq!(parsed.segments[0].content, "和 在森林里, 笑了");
        assert_eq!(parsed.segments[0].end_index, parsed.segments[0].content.chars().count());
    }

    #[test]
    fn test_bare_at_is_not_a_mention() {
        let parsed = parse_prompt("email me @ noon").unwrap();
        assert!(parsed.characters.is_empty());
        assert_eq!(parsed.segments[0].content, "email me @ noon");
    }

    #[test]
    fn test_mentions_keep_marks_and_connectors() {
        let parsed = parse_prompt("@नमस्ते waves at @a‿b, @x_1!").unwrap();
        let names: Vec<&str> = parsed.characters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["नमस्ते", "a‿b", "x_1"]);
        assert_eq!(parsed.segments[0].content, "waves at , !");
    }

    #[test]
    fn test_only_mentions_gives_no_segment() {
        let parsed = parse_prompt("@A @B").unwrap();
        assert_eq!(parsed.characters.len(), 2);
        assert!(parsed.segments.is_empty());
    }

    #[test]
    fn test_empty_prompt_rejected() {
        assert!(parse_prompt("   ").is_err());
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind("奔跑着"), SegmentKind::Action);
        assert_eq!(detect_kind("正在奔跑"), SegmentKind::Scene);
        assert_eq!(detect_kind("a character portrait"), SegmentKind::Character);
        assert_eq!(detect_kind("watercolor style"), SegmentKind::Style);
        assert_eq!(detect_kind("heavy rain"), SegmentKind::Weather);
        assert_eq!(detect_kind("zzz"), SegmentKind::Other);
    }
}
