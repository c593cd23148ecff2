use crate::core::error::{ApiError, ApiResult};
use crate::core::transport::{Dispatcher, Route};
use crate::utils::image::{
    decode_data_url, filename_from_url, is_data_url, is_plain_file_name, is_remote_url,
    mime_subtype, timestamped_filename,
};
use anyhow::{bail, Context};
use async_trait::async_trait;
use log::{info, warn};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Asks the user where to save a file. `None` means cancelled.
#[async_trait]
pub trait SaveDialog: Send + Sync {
    async fn choose_path(&self, suggested_name: &str) -> anyhow::Result<Option<PathBuf>>;
}

/// Receives downloads when there is no native file system access.
#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn deliver(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<PathBuf>;
    async fn open_with_download_hint(&self, url: &str, filename: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Saved(PathBuf),
    Downloaded(PathBuf),
    Opened(String),
    Cancelled,
}

/// Writes downloads into a folder.
pub struct DirectoryDownloads {
    dir: PathBuf,
}

impl DirectoryDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DownloadSink for DirectoryDownloads {
    async fn deliver(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        if !is_plain_file_name(filename) {
            bail!("Refusing to write outside the download folder: {}", filename);
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    async fn open_with_download_hint(&self, url: &str, filename: &str) -> anyhow::Result<()> {
        println!("Download {} from: {}", filename, url);
        Ok(())
    }
}

pub struct ExportHandler {
    dispatcher: Arc<Dispatcher>,
    dialog: Arc<dyn SaveDialog>,
    sink: Arc<dyn DownloadSink>,
}

impl ExportHandler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        dialog: Arc<dyn SaveDialog>,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        Self {
            dispatcher,
            dialog,
            sink,
        }
    }

    pub async fn export(&self, image: &str) -> ApiResult<ExportOutcome> {
        let image = image.trim();
        if image.is_empty() {
            return Err(ApiError::validation("No image selected"));
        }

        let route = self.dispatcher.route();
        match route {
            Route::Embedded(_) => self.save_with_dialog(&route, image).await,
            Route::Http => self.download(image).await,
        }
    }

    async fn save_with_dialog(&self, route: &Route, image: &str) -> ApiResult<ExportOutcome> {
        let suggested = suggested_filename(image);
        let Some(path) = self.dialog.choose_path(&suggested).await? else {
            info!("Export cancelled");
            return Ok(ExportOutcome::Cancelled);
        };

        let file_path = path.to_string_lossy().to_string();
        let body = json!({ "imageUrl": image, "filePath": file_path });
        let saved: String = self
            .dispatcher
            .dispatch_on(route, "save_image_to_file", body, "", None)
            .await?;
        info!("Image saved to {}", saved);
        Ok(ExportOutcome::Saved(PathBuf::from(saved)))
    }

    async fn download(&self, image: &str) -> ApiResult<ExportOutcome> {
        if is_data_url(image) {
            let decoded = decode_data_url(image)?;
            let filename = timestamped_filename(mime_subtype(&decoded.mime_type));
            let path = self.sink.deliver(&filename, &decoded.bytes).await?;
            return Ok(ExportOutcome::Downloaded(path));
        }

        let url = if is_remote_url(image) {
            image.to_string()
        } else {
            self.dispatcher.image_url(image)
        };
        let filename = suggested_filename(&url);

        match self.dispatcher.http().fetch_bytes(&url).await {
            Ok(bytes) => {
                let path = self.sink.deliver(&filename, &bytes).await?;
                Ok(ExportOutcome::Downloaded(path))
            }
            Err(e) => {
                warn!("Fetching {} failed ({}), opening it directly", url, e);
                self.sink.open_with_download_hint(&url, &filename).await?;
                Ok(ExportOutcome::Opened(url))
            }
        }
    }
}

fn suggested_filename(image: &str) -> String {
    if is_data_url(image) {
        let mime = image
            .strip_prefix("data:")
            .and_then(|rest| rest.split(|c: char| c == ';' || c == ',').next())
            .unwrap_or("image/png");
        return timestamped_filename(mime_subtype(mime));
    }
    filename_from_url(image).unwrap_or_else(|| timestamped_filename("png"))
}
