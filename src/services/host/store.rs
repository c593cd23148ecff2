use crate::core::io::{read_json, write_json, Storage};
use crate::core::models::{CharacterBinding, ImageType, ReferenceQuery};
use crate::utils::image::{decode_data_url, is_plain_file_name, mime_for_path};
use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const BINDINGS_FILE: &str = "config/character_bindings.json";
pub const REFERENCE_DIR: &str = "reference_images";

/// Bindings keyed by character name, written through to storage on every
/// change.
pub struct BindingStore {
    storage: Arc<dyn Storage>,
    bindings: Mutex<BTreeMap<String, CharacterBinding>>,
}

impl BindingStore {
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let bindings = if storage.exists(BINDINGS_FILE).await? {
            read_json(storage.as_ref(), BINDINGS_FILE).await?
        } else {
            BTreeMap::new()
        };
        debug!("Loaded {} bindings", bindings.len());
        Ok(Self {
            storage,
            bindings: Mutex::new(bindings),
        })
    }

    async fn persist(&self, bindings: &BTreeMap<String, CharacterBinding>) -> Result<()> {
        write_json(self.storage.as_ref(), BINDINGS_FILE, bindings).await
    }

    /// Stores inline image data under the reference folder and binds it.
    pub async fn save_image(
        &self,
        name: &str,
        image_data: &str,
        image_type: ImageType,
    ) -> Result<CharacterBinding> {
        let name = checked_name(name)?;
        let decoded = decode_data_url(image_data)?;

        let key = format!(
            "{}/{}_{}.png",
            REFERENCE_DIR,
            file_stem(name),
            chrono::Utc::now().timestamp_millis()
        );
        self.storage.write(&key, &decoded.bytes).await?;
        let path = self.storage.locate(&key);
        info!("Saved reference image for {} at {}", name, path);

        self.upsert(name, path, image_type).await
    }

    /// Binds an image file that already exists.
    pub async fn bind_path(
        &self,
        name: &str,
        path: &str,
        image_type: ImageType,
    ) -> Result<CharacterBinding> {
        let name = checked_name(name)?;
        let path = path.trim();
        if path.is_empty() || !tokio::fs::try_exists(path).await.unwrap_or(false) {
            bail!("Reference image file does not exist: {}", path);
        }
        if !mime_for_path(Path::new(path)).starts_with("image/") {
            bail!("Not an image file: {}", path);
        }
        self.upsert(name, path.to_string(), image_type).await
    }

    async fn upsert(&self, name: &str, path: String, image_type: ImageType) -> Result<CharacterBinding> {
        let mut bindings = self.bindings.lock().await;
        // Rebinding keeps the tags of the previous record.
        let tags = bindings
            .get(name)
            .map(|b| b.tags.clone())
            .unwrap_or_default();
        let binding = CharacterBinding {
            character_name: name.to_string(),
            reference_image_path: Some(path),
            image_type,
            created_at: chrono::Utc::now().timestamp().to_string(),
            bound: true,
            tags,
        };
        bindings.insert(name.to_string(), binding.clone());
        self.persist(&bindings).await?;
        Ok(binding)
    }

    /// Clears the reference path but keeps the record.
    pub async fn unbind(&self, name: &str) -> Result<bool> {
        let mut bindings = self.bindings.lock().await;
        let Some(binding) = bindings.get_mut(name) else {
            return Ok(false);
        };
        binding.bound = false;
        binding.reference_image_path = None;
        self.persist(&bindings).await?;
        Ok(true)
    }

    /// Removes the record, and the image file when this store owns it.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let mut bindings = self.bindings.lock().await;
        let Some(binding) = bindings.remove(name) else {
            return Ok(false);
        };

        if let Some(key) = binding
            .reference_image_path
            .as_deref()
            .and_then(|path| self.owned_key(path))
        {
            if let Err(e) = self.storage.delete(&key).await {
                warn!("Could not remove {}: {}", key, e);
            }
        }

        self.persist(&bindings).await?;
        Ok(true)
    }

    /// Storage key of `path` when it lives in the reference folder.
    fn owned_key(&self, path: &str) -> Option<String> {
        let owned_dir = self.storage.locate(REFERENCE_DIR);
        let file_name = Path::new(path).strip_prefix(&owned_dir).ok()?.to_str()?;
        is_plain_file_name(file_name).then(|| format!("{}/{}", REFERENCE_DIR, file_name))
    }

    pub async fn get(&self, name: &str) -> Option<CharacterBinding> {
        self.bindings.lock().await.get(name).cloned()
    }

    pub async fn all(&self) -> Vec<CharacterBinding> {
        self.bindings.lock().await.values().cloned().collect()
    }

    /// Records for `names`, in the order given. Unknown names are skipped.
    pub async fn for_names(&self, names: &[String]) -> Vec<CharacterBinding> {
        let bindings = self.bindings.lock().await;
        names.iter().filter_map(|n| bindings.get(n.trim()).cloned()).collect()
    }

    /// Records with a reference image matching every criterion in `query`.
    pub async fn query(&self, query: &ReferenceQuery) -> Vec<CharacterBinding> {
        let search = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let required: Vec<&str> = query
            .tags
            .iter()
            .flatten()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();

        self.bindings
            .lock()
            .await
            .values()
            .filter(|b| b.has_reference())
            .filter(|b| query.image_type.map_or(true, |t| b.image_type == t))
            .filter(|b| {
                search.as_deref().map_or(true, |s| {
                    b.character_name.to_lowercase().contains(s)
                        || b.tags.iter().any(|t| t.to_lowercase().contains(s))
                })
            })
            .filter(|b| required.iter().all(|t| b.tags.contains(*t)))
            .cloned()
            .collect()
    }

    pub async fn search(&self, keyword: &str) -> Vec<CharacterBinding> {
        self.query(&ReferenceQuery {
            search: Some(keyword.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn by_type(&self, image_type: ImageType) -> Vec<CharacterBinding> {
        self.query(&ReferenceQuery {
            image_type: Some(image_type),
            ..Default::default()
        })
        .await
    }

    pub async fn add_tag(&self, name: &str, tag: &str) -> Result<CharacterBinding> {
        self.update_tags(name, |tags| {
            tags.insert(tag.trim().to_string());
        })
        .await
    }

    pub async fn remove_tag(&self, name: &str, tag: &str) -> Result<CharacterBinding> {
        self.update_tags(name, |tags| {
            tags.remove(tag.trim());
        })
        .await
    }

    async fn update_tags(
        &self,
        name: &str,
        edit: impl FnOnce(&mut BTreeSet<String>),
    ) -> Result<CharacterBinding> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(name)
            .ok_or_else(|| anyhow!("No reference image for {}", name))?;
        edit(&mut binding.tags);
        binding.tags.retain(|t| !t.is_empty());
        let updated = binding.clone();
        self.persist(&bindings).await?;
        Ok(updated)
    }

    /// Sorted union of all tags.
    pub async fn all_tags(&self) -> Vec<String> {
        let bindings = self.bindings.lock().await;
        let tags: BTreeSet<&String> = bindings.values().flat_map(|b| b.tags.iter()).collect();
        tags.into_iter().cloned().collect()
    }
}

fn checked_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Character name cannot be empty");
    }
    Ok(name)
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use anyhow::Context;

    const PIXEL: &str = "data:image/png;base64,AAAA";

    async fn open_store(dir: &Path) -> Result<BindingStore> {
        BindingStore::open(Arc::new(NativeStorage::new(dir))).await
    }

    #[tokio::test]
    async fn test_save_image_writes_file_and_persists() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = open_store(temp_dir.path()).await?;

        let binding = store.save_image("Hero", PIXEL, ImageType::Person).await?;
        let path = binding.reference_image_path.clone().context("no path")?;
        assert!(path.contains("reference_images"));
        assert!(Path::new(&path)
            .file_name()
            .context("no file name")?
            .to_string_lossy()
            .starts_with("Hero_"));
        assert!(Path::new(&path).exists());

        // A second store over the same folder sees the record.
        let reopened = open_store(temp_dir.path()).await?;
        assert_eq!(reopened.get("Hero").await, Some(binding));
        Ok(())
    }

    #[tokio::test]
    async fn test_bind_path_requires_existing_image_file() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = open_store(temp_dir.path()).await?;

        let missing = temp_dir.path().join("nope.png");
        assert!(store
            .bind_path("A", &missing.to_string_lossy(), ImageType::Person)
            .await
            .is_err());

        let file = temp_dir.path().join("a.png");
        std::fs::write(&file, b"x")?;
        let binding = store
            .bind_path("A", &file.to_string_lossy(), ImageType::Scene)
            .await?;
        assert!(binding.bound);
        assert_eq!(binding.image_type, ImageType::Scene);

        let notes = temp_dir.path().join("notes.txt");
        std::fs::write(&notes, b"x")?;
        assert!(store
            .bind_path("B", &notes.to_string_lossy(), ImageType::Person)
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_unbind_keeps_record_and_tags() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = open_store(temp_dir.path()).await?;

        assert!(!store.unbind("ghost").await?);

        store.save_image("A", PIXEL, ImageType::Person).await?;
        store.add_tag("A", "blue").await?;
        assert!(store.unbind("A").await?);

        let record = store.get("A").await.context("record dropped")?;
        assert!(!record.bound);
        assert!(!record.has_reference());
        assert!(record.tags.contains("blue"));
        // Unbound records drop out of the library.
        assert!(store.query(&ReferenceQuery::default()).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_owned_file_only() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = open_store(temp_dir.path()).await?;

        let saved = store.save_image("A", PIXEL, ImageType::Person).await?;
        let saved_path = saved.reference_image_path.context("no path")?;
        let external = temp_dir.path().join("mine.png");
        std::fs::write(&external, b"x")?;
        store
            .bind_path("B", &external.to_string_lossy(), ImageType::Person)
            .await?;

        assert!(store.delete("A").await?);
        assert!(store.delete("B").await?);
        assert!(!store.delete("B").await?);

        assert!(!Path::new(&saved_path).exists());
        assert!(external.exists());
        assert!(store.all().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_owned_key_stays_inside_reference_folder() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = open_store(temp_dir.path()).await?;

        let inside = temp_dir.path().join(REFERENCE_DIR).join("A_1.png");
        assert_eq!(
            store.owned_key(&inside.to_string_lossy()).as_deref(),
            Some("reference_images/A_1.png")
        );
        let nested = temp_dir.path().join(REFERENCE_DIR).join("sub").join("A_1.png");
        assert_eq!(store.owned_key(&nested.to_string_lossy()), None);
        assert_eq!(store.owned_key("/elsewhere/A_1.png"), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_and_tags() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = open_store(temp_dir.path()).await?;
        store.save_image("Hero", PIXEL, ImageType::Person).await?;
        store.save_image("Town", PIXEL, ImageType::Scene).await?;
        store.add_tag("Hero", "red").await?;
        store.add_tag("Hero", "cape").await?;
        store.add_tag("Town", "red").await?;
        store.add_tag("Town", "red").await?;

        assert_eq!(store.all_tags().await, vec!["cape", "red"]);
        assert_eq!(store.search("CAPE").await.len(), 1);
        assert_eq!(store.by_type(ImageType::Scene).await[0].character_name, "Town");

        let both = ReferenceQuery {
            tags: Some(vec!["red".to_string(), "cape".to_string()]),
            ..Default::default()
        };
        let hits = store.query(&both).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].character_name, "Hero");

        store.remove_tag("Hero", "cape").await?;
        assert_eq!(store.all_tags().await, vec!["red"]);
        assert!(store.add_tag("nobody", "x").await.is_err());

        let names = vec!["Town".to_string(), "ghost".to_string(), "Hero".to_string()];
        let found: Vec<String> = store
            .for_names(&names)
            .await
            .into_iter()
            .map(|b| b.character_name)
            .collect();
        assert_eq!(found, vec!["Town", "Hero"]);
        Ok(())
    }
}
