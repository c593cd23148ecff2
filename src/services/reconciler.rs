use crate::core::error::{ApiError, ApiResult};
use crate::core::models::{CharacterBinding, ImageType, ParsedPrompt};
use crate::core::transport::Dispatcher;
use crate::services::state::PromptState;
use crate::utils::image::is_data_url;
use log::info;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where a reference image comes from when binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Inline image content, stored by the backend on bind.
    DataUrl(String),
    /// A file the backend can already read.
    Path(String),
}

impl ImageSource {
    pub fn from_input(input: &str) -> Self {
        let input = input.trim();
        if is_data_url(input) {
            ImageSource::DataUrl(input.to_string())
        } else {
            ImageSource::Path(input.to_string())
        }
    }
}

pub struct BindingReconciler {
    dispatcher: Arc<Dispatcher>,
}

impl BindingReconciler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn bindings_for(&self, names: &[String]) -> ApiResult<Vec<CharacterBinding>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.dispatcher
            .dispatch(
                "get_bindings_for_prompt",
                json!({ "characters": names }),
                "/api/bindings/for-prompt",
                Some(json!({ "characters": names.join(",") })),
            )
            .await
    }

    pub async fn all_bindings(&self) -> ApiResult<Vec<CharacterBinding>> {
        self.dispatcher
            .dispatch("get_all_bindings", json!({}), "/api/bindings", None)
            .await
    }

    /// Pairs each mentioned character with its stored binding.
    ///
    /// Only records with a non-empty reference path enter the map, and a
    /// character is bound exactly when its name is in the map.
    pub async fn reconcile(&self, mut parsed: ParsedPrompt) -> ApiResult<PromptState> {
        let names = parsed.character_names();
        let bindings: BTreeMap<String, CharacterBinding> = self
            .bindings_for(&names)
            .await?
            .into_iter()
            .filter(|b| b.has_reference() && names.contains(&b.character_name))
            .map(|b| (b.character_name.clone(), b))
            .collect();

        for character in parsed.characters.iter_mut() {
            let binding = bindings.get(&character.name);
            character.bound = binding.is_some();
            character.reference_image = binding.and_then(|b| b.reference_image_path.clone());
        }

        Ok(PromptState {
            parsed: Some(parsed),
            bindings,
        })
    }

    /// Binds (or rebinds) `name` and records the result in `state`.
    pub async fn bind(
        &self,
        state: &mut PromptState,
        name: &str,
        source: ImageSource,
        image_type: ImageType,
    ) -> ApiResult<CharacterBinding> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::validation("Character name cannot be empty"));
        }

        let binding: CharacterBinding = match source {
            ImageSource::DataUrl(data) => {
                let body = json!({
                    "characterName": name,
                    "imageData": data,
                    "imageType": image_type,
                });
                self.dispatcher
                    .dispatch("save_reference_image", body.clone(), "/api/save-image", Some(body))
                    .await?
            }
            ImageSource::Path(path) => {
                if path.trim().is_empty() {
                    return Err(ApiError::validation("Reference image path cannot be empty"));
                }
                let body = json!({
                    "characterName": name,
                    "referenceImagePath": path,
                    "imageType": image_type,
                });
                self.dispatcher
                    .dispatch("bind_character_reference", body.clone(), "/api/bind", Some(body))
                    .await?
            }
        };

        info!("Bound {} -> {:?}", name, binding.reference_image_path);
        let bound = binding.has_reference();
        if bound {
            state.bindings.insert(name.to_string(), binding.clone());
        } else {
            state.bindings.remove(name);
        }
        if let Some(parsed) = state.parsed.as_mut() {
            if let Some(character) = parsed.characters.iter_mut().find(|c| c.name == name) {
                character.bound = bound;
                character.reference_image = binding.reference_image_path.clone();
            }
        }
        Ok(binding)
    }

    /// Clears the stored binding, then forgets it locally.
    ///
    /// Returns whether the store had a record for `name`.
    pub async fn unbind(&self, state: &mut PromptState, name: &str) -> ApiResult<bool> {
        let body = json!({ "characterName": name });
        let existed: bool = self
            .dispatcher
            .dispatch("unbind_character", body.clone(), "/api/unbind", Some(body))
            .await?;

        state.bindings.remove(name);
        if let Some(parsed) = state.parsed.as_mut() {
            if let Some(character) = parsed.characters.iter_mut().find(|c| c.name == name) {
                character.bound = false;
                character.reference_image = None;
            }
        }
        info!("Unbound {} (stored: {})", name, existed);
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::CharacterRef;
    use crate::core::transport::tests::{serve_once, MockHost};
    use crate::core::transport::{EmbeddedHost, HttpTransport, NoEmbeddedHost};
    use serde_json::Value;

    fn prompt(names: &[&str]) -> ParsedPrompt {
        ParsedPrompt {
            original: names.iter().map(|n| format!("@{}", n)).collect::<Vec<_>>().join(" "),
            segments: vec![],
            characters: names
                .iter()
                .map(|n| CharacterRef { name: n.to_string(), reference_image: None, bound: false })
                .collect(),
        }
    }

    fn embedded(host: Arc<MockHost>) -> BindingReconciler {
        BindingReconciler::new(Arc::new(Dispatcher::new(
            Arc::new(EmbeddedHost(host)),
            HttpTransport::new("http://unused"),
            "http://127.0.0.1:3001",
        )))
    }

    #[tokio::test]
    async fn test_reconcile_marks_only_stored_paths() {
        let host = Arc::new(MockHost::new(vec![(
            "get_bindings_for_prompt",
            json!([
                {"characterName": "A", "referenceImagePath": "/x"},
                {"characterName": "C", "referenceImagePath": ""}
            ]),
        )]));
        let reconciler = embedded(host.clone());

        let state = reconciler.reconcile(prompt(&["A", "B", "C"])).await.unwrap();
        let parsed = state.parsed.as_ref().unwrap();
        assert!(parsed.character("A").unwrap().bound);
        assert!(!parsed.character("B").unwrap().bound);
        assert!(!parsed.character("C").unwrap().bound);
        assert_eq!(state.bindings.keys().collect::<Vec<_>>(), vec!["A"]);

        let calls = host.calls.lock().unwrap();
        assert_eq!(calls[0].1, json!({"characters": ["A", "B", "C"]}));
    }

    #[tokio::test]
    async fn test_reconcile_without_characters_skips_fetch() {
        let host = Arc::new(MockHost::new(vec![]));
        let reconciler = embedded(host.clone());
        let state = reconciler.reconcile(prompt(&[])).await.unwrap();
        assert!(state.bindings.is_empty());
        assert!(host.commands().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_over_http_sends_joined_names() {
        let (base, handle) =
            serve_once(200, r#"[{"character_name":"A","reference_image_path":"/x"}]"#).await;
        let reconciler = BindingReconciler::new(Arc::new(Dispatcher::new(
            Arc::new(NoEmbeddedHost),
            HttpTransport::new(&base),
            "http://127.0.0.1:3001",
        )));
        let state = reconciler.reconcile(prompt(&["A", "B"])).await.unwrap();
        assert!(state.parsed.unwrap().character("A").unwrap().bound);

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /api/bindings/for-prompt "));
        assert!(request.contains(r#"{"characters":"A,B"}"#));
    }

    #[tokio::test]
    async fn test_bind_routes_by_source() {
        let saved = json!({"characterName": "A", "referenceImagePath": "/refs/A_1.png", "imageType": "person", "bound": true});
        let bound = json!({"characterName": "B", "referenceImagePath": "/pics/b.png", "imageType": "scene", "bound": true});
        let host = Arc::new(MockHost::new(vec![
            ("save_reference_image", saved),
            ("bind_character_reference", bound),
        ]));
        let reconciler = embedded(host.clone());

        let mut state = PromptState {
            parsed: Some(prompt(&["A", "B"])),
            bindings: BTreeMap::new(),
        };

        reconciler
            .bind(&mut state, "A", ImageSource::from_input("data:image/png;base64,AAAA"), ImageType::Person)
            .await
            .unwrap();
        reconciler
            .bind(&mut state, "B", ImageSource::from_input("/pics/b.png"), ImageType::Scene)
            .await
            .unwrap();

        assert_eq!(host.commands(), vec!["save_reference_image", "bind_character_reference"]);
        let calls = host.calls.lock().unwrap();
        assert_eq!(calls[0].1["imageData"], "data:image/png;base64,AAAA");
        assert_eq!(calls[1].1["referenceImagePath"], "/pics/b.png");
        assert_eq!(calls[1].1["imageType"], "scene");
        drop(calls);

        assert!(state.unbound().is_empty());
        assert_eq!(state.bindings.len(), 2);
    }

    #[tokio::test]
    async fn test_all_bindings_are_normalized() {
        let host = Arc::new(MockHost::new(vec![(
            "get_all_bindings",
            json!([{"character_name": "A", "reference_image_path": "/a"}, {"characterName": "B"}]),
        )]));
        let all = embedded(host).all_bindings().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].bound);
        assert!(!all[1].bound);
    }

    #[tokio::test]
    async fn test_bind_rejects_empty_name() {
        let host = Arc::new(MockHost::new(vec![]));
        let reconciler = embedded(host.clone());
        let mut state = PromptState::default();
        let err = reconciler
            .bind(&mut state, "  ", ImageSource::Path("/x".into()), ImageType::Person)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(host.commands().is_empty());
    }

    #[tokio::test]
    async fn test_unbind_is_store_synced() {
        let host = Arc::new(MockHost::new(vec![("unbind_character", Value::Bool(true))]));
        let reconciler = embedded(host.clone());

        let mut parsed = prompt(&["A"]);
        parsed.set_bound("A", true);
        let mut state = PromptState { parsed: Some(parsed), bindings: BTreeMap::new() };

        assert!(reconciler.unbind(&mut state, "A").await.unwrap());
        assert_eq!(host.commands(), vec!["unbind_character"]);
        assert_eq!(state.unbound(), vec!["A"]);
    }
}
