//! Canonical decoding of binding records.
//!
//! Backends have produced bindings as `characterName`/`referenceImagePath` and
//! as `character_name`/`reference_image_path`. Every `CharacterBinding` that is
//! deserialized, from either transport, passes through [`normalize_binding`].

use crate::core::models::{CharacterBinding, ImageType};
use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

impl TryFrom<Value> for CharacterBinding {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        normalize_binding(&value)
    }
}

pub fn normalize_binding(value: &Value) -> Result<CharacterBinding> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("Binding record is not an object: {}", value))?;

    let character_name = pick_str(obj, "characterName", "character_name")
        .ok_or_else(|| anyhow!("Binding record has no character name: {}", value))?;

    let reference_image_path = pick_str(obj, "referenceImagePath", "reference_image_path");

    let image_type = match pick(obj, "imageType", "image_type") {
        Some(v) => serde_json::from_value::<ImageType>(v.clone()).unwrap_or_default(),
        None => ImageType::default(),
    };

    let created_at = match pick(obj, "createdAt", "created_at") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };


    let tags = match obj.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        _ => BTreeSet::new(),
    };

    let mut binding = CharacterBinding {
        character_name,
        reference_image_path,
        image_type,
        created_at,
        bound: false,
        tags,
    };
    let bound = obj
        .get("bound")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| binding.has_reference());
    binding.bound = bound;
    Ok(binding)
}

/// First present, non-null, non-empty value under either spelling.
fn pick<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    [camel, snake]
        .into_iter()
        .filter_map(|key| obj.get(key))
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
}

fn pick_str(obj: &Map<String, Value>, camel: &str, snake: &str) -> Option<String> {
    pick(obj, camel, snake)
        .and_then(Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snake_and_camel_agree() {
        let snake = json!({
            "character_name": "Hero",
            "reference_image_path": "/refs/hero.png",
            "image_type": "人物",
            "created_at": "1700000000",
            "bound": true
        });
        let camel = json!({
            "characterName": "Hero",
            "referenceImagePath": "/refs/hero.png",
            "imageType": "person",
            "createdAt": "1700000000",
            "bound": true
        });
        let a = normalize_binding(&snake).unwrap();
        let b = normalize_binding(&camel).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.image_type, ImageType::Person);
        assert!(a.tags.is_empty());
    }

    #[test]
    fn test_missing_bound_follows_path() {
        let with_path = json!({"characterName": "A", "referenceImagePath": "/x"});
        assert!(normalize_binding(&with_path).unwrap().bound);

        let without_path = json!({"characterName": "B", "referenceImagePath": null});
        let b = normalize_binding(&without_path).unwrap();
        assert!(!b.bound);
        assert!(!b.has_reference());

        let blank = json!({"characterName": "D", "referenceImagePath": "  "});
        let b = normalize_binding(&blank).unwrap();
        assert!(!b.bound);
        assert!(!b.has_reference());

        let explicit = json!({"character_name": "C", "reference_image_path": "/y", "bound": false});
        assert!(!normalize_binding(&explicit).unwrap().bound);
    }

    #[test]
    fn test_tags_are_a_set() {
        let value = json!({"characterName": "A", "tags": ["hero", "hero", " ", "blue"]});
        let binding = normalize_binding(&value).unwrap();
        assert_eq!(binding.tags.len(), 2);
        assert!(binding.tags.contains("hero"));
    }

    #[test]
    fn test_empty_camel_falls_back_to_snake() {
        let value = json!({"characterName": "", "character_name": "Z"});
        assert_eq!(normalize_binding(&value).unwrap().character_name, "Z");
    }

    #[test]
    fn test_rejects_nameless_record() {
        assert!(normalize_binding(&json!({"referenceImagePath": "/x"})).is_err());
        assert!(normalize_binding(&json!("Hero")).is_err());
    }

    #[test]
    fn test_deserialize_goes_through_adapter() {
        let list: Vec<CharacterBinding> = serde_json::from_value(json!([
            {"character_name": "A", "reference_image_path": "/a"},
            {"characterName": "B", "createdAt": 17}
        ]))
        .unwrap();
        assert_eq!(list[0].character_name, "A");
        assert!(list[0].bound);
        assert_eq!(list[1].created_at, "17");
    }
}
