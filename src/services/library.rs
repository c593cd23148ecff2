use crate::core::error::{ApiError, ApiResult};
use crate::core::models::{CharacterBinding, ImageType, ReferenceQuery};
use crate::core::transport::Dispatcher;
use crate::services::state::LibraryView;
use log::debug;
use serde_json::json;
use std::sync::Arc;

/// Query with empty or absent criteria left out.
pub fn build_query(
    image_type: Option<ImageType>,
    search: Option<&str>,
    tags: &[String],
) -> ReferenceQuery {
    let search = search.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
    let tags: Vec<String> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();

    ReferenceQuery {
        image_type,
        search,
        tags: if tags.is_empty() { None } else { Some(tags) },
    }
}

impl ReferenceQuery {
    pub fn is_empty(&self) -> bool {
        self.image_type.is_none() && self.search.is_none() && self.tags.is_none()
    }

    /// `image_type=..&search=..&tags=a,b`, or an empty string.
    pub fn to_query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        if let Some(image_type) = self.image_type {
            serializer.append_pair("image_type", image_type.as_str());
        }
        if let Some(search) = &self.search {
            serializer.append_pair("search", search);
        }
        if let Some(tags) = &self.tags {
            serializer.append_pair("tags", &tags.join(","));
        }
        serializer.finish()
    }

    fn endpoint(&self) -> String {
        let query = self.to_query_string();
        if query.is_empty() {
            "/api/reference-images".to_string()
        } else {
            format!("/api/reference-images?{}", query)
        }
    }
}

/// Browses and curates the stored reference images.
pub struct ReferenceLibrary {
    dispatcher: Arc<Dispatcher>,
}

impl ReferenceLibrary {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn fetch(&self, query: &ReferenceQuery) -> ApiResult<Vec<CharacterBinding>> {
        self.dispatcher
            .dispatch(
                "get_reference_images",
                json!({ "query": query }),
                &query.endpoint(),
                None,
            )
            .await
    }

    pub async fn all_tags(&self) -> ApiResult<Vec<String>> {
        self.dispatcher
            .dispatch("get_all_tags", json!({}), "/api/reference-images/tags", None)
            .await
    }

    pub async fn search(&self, keyword: &str) -> ApiResult<Vec<CharacterBinding>> {
        let keyword = keyword.trim();
        self.dispatcher
            .dispatch(
                "search_reference_images",
                json!({ "keyword": keyword }),
                "/api/reference-images/search",
                Some(json!({ "keyword": keyword })),
            )
            .await
    }

    pub async fn by_type(&self, image_type: ImageType) -> ApiResult<Vec<CharacterBinding>> {
        self.dispatcher
            .dispatch(
                "get_references_by_type",
                json!({ "imageType": image_type }),
                "/api/reference-images/by-type",
                Some(json!({ "image_type": image_type })),
            )
            .await
    }

    /// Re-reads the filtered list and the tag vocabulary into `view`.
    pub async fn refresh(&self, view: &mut LibraryView) -> ApiResult<()> {
        view.items = self.fetch(&view.query).await?;
        view.tags = self.all_tags().await?.into_iter().collect();
        debug!("Library: {} items, {} tags", view.items.len(), view.tags.len());
        Ok(())
    }

    pub async fn add_tag(&self, view: &mut LibraryView, name: &str, tag: &str) -> ApiResult<()> {
        self.mutate_tag(view, "add_tag_to_reference", "/api/reference-images/add-tag", name, tag)
            .await
    }

    pub async fn remove_tag(&self, view: &mut LibraryView, name: &str, tag: &str) -> ApiResult<()> {
        self.mutate_tag(
            view,
            "remove_tag_from_reference",
            "/api/reference-images/remove-tag",
            name,
            tag,
        )
        .await
    }

    pub async fn delete(&self, view: &mut LibraryView, name: &str) -> ApiResult<()> {
        if name.trim().is_empty() {
            return Err(ApiError::validation("No reference image selected"));
        }
        let body = json!({ "characterName": name });
        let _: serde_json::Value = self
            .dispatcher
            .dispatch(
                "delete_reference_image",
                body.clone(),
                "/api/reference-images/delete",
                Some(body),
            )
            .await?;
        self.refresh(view).await
    }

    async fn mutate_tag(
        &self,
        view: &mut LibraryView,
        command: &str,
        endpoint: &str,
        name: &str,
        tag: &str,
    ) -> ApiResult<()> {
        let tag = tag.trim();
        if name.trim().is_empty() {
            return Err(ApiError::validation("No reference image selected"));
        }
        if tag.is_empty() {
            return Err(ApiError::validation("Tag cannot be empty"));
        }
        let body = json!({ "characterName": name, "tag": tag });
        let _: serde_json::Value = self
            .dispatcher
            .dispatch(command, body.clone(), endpoint, Some(body))
            .await?;
        self.refresh(view).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::transport::tests::serve_once;
    use crate::core::transport::{CommandHost, EmbeddedHost, HttpTransport, NoEmbeddedHost};
    use crate::services::host::LocalCommandHost;

    async fn local_library() -> (tempfile::TempDir, Arc<LocalCommandHost>, ReferenceLibrary) {
        let temp_dir = tempfile::tempdir().unwrap();
        let host = Arc::new(
            LocalCommandHost::open(Arc::new(NativeStorage::new(temp_dir.path())))
                .await
                .unwrap(),
        );
        let library = ReferenceLibrary::new(Arc::new(Dispatcher::new(
            Arc::new(EmbeddedHost(host.clone())),
            HttpTransport::new("http://unused"),
            "http://127.0.0.1:3001",
        )));
        (temp_dir, host, library)
    }

    async fn save(host: &LocalCommandHost, name: &str, image_type: &str) {
        host.invoke(
            "save_reference_image",
            json!({"characterName": name, "imageData": "data:image/png;base64,AAAA", "imageType": image_type}),
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_build_query_omits_empty_fields() {
        let query = build_query(None, Some("  "), &["".to_string()]);
        assert!(query.is_empty());
        assert_eq!(query.to_query_string(), "");
        assert_eq!(serde_json::to_value(&query).unwrap(), json!({}));

        let query = build_query(
            Some(ImageType::Scene),
            Some("old town"),
            &["night".to_string(), " rain ".to_string()],
        );
        assert_eq!(
            query.to_query_string(),
            "image_type=scene&search=old+town&tags=night%2Crain"
        );
    }

    #[tokio::test]
    async fn test_add_tag_twice_keeps_one() {
        let (_dir, host, library) = local_library().await;
        save(&host, "A", "person").await;

        let mut view = LibraryView::default();
        library.add_tag(&mut view, "A", "x").await.unwrap();
        library.add_tag(&mut view, "A", "x").await.unwrap();

        let tags = library.all_tags().await.unwrap();
        assert_eq!(tags.iter().filter(|t| *t == "x").count(), 1);
        assert!(view.tags.contains("x"));
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].tags.len(), 1);
    }

    #[tokio::test]
    async fn test_filters_and_delete_refresh_view() {
        let (_dir, host, library) = local_library().await;
        save(&host, "Hero", "person").await;
        save(&host, "Castle", "scene").await;

        let mut view = LibraryView::default();
        library.add_tag(&mut view, "Castle", "night").await.unwrap();

        let scenes = library.by_type(ImageType::Scene).await.unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].character_name, "Castle");

        let found = library.search("hero").await.unwrap();
        assert_eq!(found.len(), 1);

        let tagged = library
            .fetch(&build_query(None, None, &["night".to_string()]))
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);

        let none = library.fetch(&build_query(None, Some("nobody"), &[])).await.unwrap();
        assert!(none.is_empty());

        library.delete(&mut view, "Castle").await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert!(view.tags.is_empty());
    }

    #[tokio::test]
    async fn test_empty_tag_is_rejected() {
        let (_dir, _host, library) = local_library().await;
        let mut view = LibraryView::default();
        let err = library.add_tag(&mut view, "A", "  ").await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_fetch_over_http_uses_query_string() {
        let (base, handle) = serve_once(200, "[]").await;
        let library = ReferenceLibrary::new(Arc::new(Dispatcher::new(
            Arc::new(NoEmbeddedHost),
            HttpTransport::new(&base),
            "http://127.0.0.1:3001",
        )));
        let items = library
            .fetch(&build_query(Some(ImageType::Person), None, &[]))
            .await
            .unwrap();
        assert!(items.is_empty());
        let request = handle.await.unwrap();
        assert!(request.starts_with("GET /api/reference-images?image_type=person "));
    }
}
