use crate::core::error::{ApiError, ApiResult};
use crate::core::models::{
    ApiConfig, ImageGenerationResult, ImageType, Model, ParsedPrompt, ReferenceQuery,
};
use crate::core::transport::Dispatcher;
use crate::services::config_gateway::ConfigGateway;
use crate::services::export::{DownloadSink, ExportHandler, ExportOutcome, SaveDialog};
use crate::services::library::ReferenceLibrary;
use crate::services::params::{assemble_request, GenerationOptions};
use crate::services::progress::run_with_progress;
use crate::services::reconciler::{BindingReconciler, ImageSource};
use crate::services::state::{AppContext, NoticeLevel, PromptState};
use log::{error, info, warn};
use serde_json::json;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Owns the application context and runs every user-facing operation.
///
/// Operations never fail outward: each one leaves exactly one notice in the
/// context describing its outcome and returns `None`/`false` on failure.
pub struct Studio {
    ctx: AppContext,
    dispatcher: Arc<Dispatcher>,
    gateway: ConfigGateway,
    reconciler: BindingReconciler,
    library: ReferenceLibrary,
    exporter: ExportHandler,
    progress_tick: Duration,
}

impl Studio {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        dialog: Arc<dyn SaveDialog>,
        sink: Arc<dyn DownloadSink>,
        progress_tick: Duration,
    ) -> Self {
        Self {
            ctx: AppContext::default(),
            gateway: ConfigGateway::new(dispatcher.clone()),
            reconciler: BindingReconciler::new(dispatcher.clone()),
            library: ReferenceLibrary::new(dispatcher.clone()),
            exporter: ExportHandler::new(dispatcher.clone(), dialog, sink),
            dispatcher,
            progress_tick,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AppContext {
        &mut self.ctx
    }

    /// Records the outcome of an operation as a notice.
    fn settle<T>(&mut self, result: ApiResult<T>, success: impl FnOnce(&T) -> String) -> Option<T> {
        match result {
            Ok(value) => {
                let message = success(&value);
                self.ctx.notify(NoticeLevel::Success, message);
                Some(value)
            }
            Err(e) => {
                if e.is_validation() {
                    self.ctx.notify(NoticeLevel::Warning, e.to_string());
                } else {
                    error!("{}", e);
                    self.ctx.notify(NoticeLevel::Error, e.to_string());
                }
                None
            }
        }
    }

    /// Loads configuration and the reference library. Missing configuration
    /// falls back to defaults.
    pub async fn startup(&mut self) {
        self.ctx.api_config = self.gateway.load_api_config_or_default().await;
        let generation = self.gateway.load_generation_config_or_default().await;
        self.ctx.generation = GenerationOptions::from_config(&generation);
        info!(
            "Startup via {:?}: model {}, {}x{}",
            self.dispatcher.transport(),
            self.ctx.generation.model,
            generation.width,
            generation.height
        );

        let result = self.library.refresh(&mut self.ctx.library).await;
        match result {
            Ok(()) => self.ctx.notify(
                NoticeLevel::Info,
                format!("{} reference images in the library", self.ctx.library.items.len()),
            ),
            Err(e) => self.ctx.notify(
                NoticeLevel::Warning,
                format!("Reference library unavailable: {}", e),
            ),
        }
    }

    async fn parse_and_reconcile(&self, prompt: &str) -> ApiResult<PromptState> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ApiError::validation("Prompt cannot be empty"));
        }
        let body = json!({ "prompt": prompt });
        let parsed: ParsedPrompt = self
            .dispatcher
            .dispatch("parse_prompt", body.clone(), "/api/parse", Some(body))
            .await?;
        self.reconciler.reconcile(parsed).await
    }

    /// Parses `prompt` and reconciles its characters with stored bindings.
    /// The previous prompt state is replaced only on success.
    pub async fn parse(&mut self, prompt: &str) -> bool {
        let result = self.parse_and_reconcile(prompt).await;
        let state = self.settle(result, |state| {
            let unbound = state.unbound().len();
            let total = state.parsed.as_ref().map(|p| p.characters.len()).unwrap_or(0);
            format!("Parsed {} characters, {} without a reference image", total, unbound)
        });
        match state {
            Some(state) => {
                self.ctx.prompt = state;
                true
            }
            None => false,
        }
    }

    /// `input` is either a data URL or a path to an image file.
    pub async fn bind(&mut self, name: &str, input: &str, image_type: ImageType) -> bool {
        let result = self
            .reconciler
            .bind(&mut self.ctx.prompt, name, ImageSource::from_input(input), image_type)
            .await;
        let bound = self.settle(result, |b| format!("Bound {}", b.character_name));
        if bound.is_some() {
            self.refresh_library_quietly().await;
        }
        bound.is_some()
    }

    pub async fn unbind(&mut self, name: &str) -> bool {
        let result = self.reconciler.unbind(&mut self.ctx.prompt, name).await;
        let name = name.to_string();
        self.settle(result, |_| format!("Unbound {}", name)).is_some()
    }

    /// Assembles the request from the current prompt and options and runs it,
    /// reporting estimated progress through `report`.
    pub async fn generate(&mut self, report: &(dyn Fn(u8) + Send + Sync)) -> Option<ImageGenerationResult> {
        let prompt = self.ctx.prompt.text().unwrap_or_default().to_string();
        let params = match assemble_request(&prompt, &self.ctx.prompt.bindings, &self.ctx.generation) {
            Ok(params) => params,
            Err(e) => {
                self.ctx.notify(NoticeLevel::Warning, e.to_string());
                return None;
            }
        };

        let body = match serde_json::to_value(&params) {
            Ok(body) => body,
            Err(e) => {
                self.ctx.notify(NoticeLevel::Error, ApiError::from(e).to_string());
                return None;
            }
        };

        info!(
            "Generating {} image(s) with {} at {}x{}",
            params.count, params.model, params.width, params.height
        );
        self.ctx.generating = true;
        self.ctx.progress = 0;

        let last = Arc::new(AtomicU8::new(0));
        let observed = last.clone();
        let forward = move |value: u8| {
            observed.store(value, Ordering::Relaxed);
            report(value);
        };

        let request = self.dispatcher.dispatch::<ImageGenerationResult>(
            "generate_image",
            json!({ "params": body.clone() }),
            "/api/generate",
            Some(body),
        );
        let outcome = run_with_progress(request, self.progress_tick, &forward).await;

        self.ctx.generating = false;
        self.ctx.progress = last.load(Ordering::Relaxed);

        match outcome {
            Ok(result) if result.success => {
                self.ctx.notify(
                    NoticeLevel::Success,
                    format!("Generated {} image(s)", result.images.len()),
                );
                self.ctx.results.push(result.clone());
                Some(result)
            }
            Ok(result) => {
                let reason = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Generation failed".to_string());
                self.ctx.notify(NoticeLevel::Error, reason);
                Some(result)
            }
            Err(e) => {
                error!("Generation failed: {}", e);
                self.ctx.notify(NoticeLevel::Error, e.to_string());
                None
            }
        }
    }

    pub async fn save_api_config(&mut self, config: ApiConfig) -> bool {
        let result = self.gateway.save_api_config(&config).await;
        if self.settle(result, |_| "API configuration saved".to_string()).is_some() {
            self.ctx.api_config = config;
            true
        } else {
            false
        }
    }

    pub async fn save_generation_options(&mut self, options: GenerationOptions) -> bool {
        let result = self.gateway.save_generation_config(&options.to_config()).await;
        if self.settle(result, |_| "Generation settings saved".to_string()).is_some() {
            self.ctx.generation = options;
            true
        } else {
            false
        }
    }

    /// Checks the credentials currently held for `model`.
    pub async fn test_connection(&mut self, model: Model) -> bool {
        let provider = self.ctx.api_config.provider(model).clone();
        let result = self.gateway.test_connection(model, &provider).await;
        self.settle(result, |_| format!("{} is reachable", model.display_name()))
            .is_some()
    }

    pub async fn export(&mut self, image: &str) -> Option<ExportOutcome> {
        let result = self.exporter.export(image).await;
        self.settle(result, |outcome| match outcome {
            ExportOutcome::Saved(path) => format!("Saved to {}", path.display()),
            ExportOutcome::Downloaded(path) => format!("Downloaded to {}", path.display()),
            ExportOutcome::Opened(url) => format!("Opened {}", url),
            ExportOutcome::Cancelled => "Export cancelled".to_string(),
        })
    }

    pub async fn filter_library(&mut self, query: ReferenceQuery) -> bool {
        self.ctx.library.query = query;
        let result = self.library.refresh(&mut self.ctx.library).await;
        let count = self.ctx.library.items.len();
        self.settle(result, |_| format!("{} matching reference images", count))
            .is_some()
    }

    pub async fn add_tag(&mut self, name: &str, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() {
            self.ctx.notify(NoticeLevel::Warning, "Tag cannot be empty");
            return false;
        }
        let result = self.library.add_tag(&mut self.ctx.library, name, tag).await;
        self.settle(result, |_| format!("Tagged {} with {}", name, tag)).is_some()
    }

    pub async fn remove_tag(&mut self, name: &str, tag: &str) -> bool {
        let result = self.library.remove_tag(&mut self.ctx.library, name, tag).await;
        self.settle(result, |_| format!("Removed tag {} from {}", tag, name))
            .is_some()
    }

    /// Deletes a stored reference. A character of the current prompt that
    /// used it becomes unbound.
    pub async fn delete_reference(&mut self, name: &str) -> bool {
        let result = self.library.delete(&mut self.ctx.library, name).await;
        if self.settle(result, |_| format!("Deleted {}", name)).is_none() {
            return false;
        }
        if self.ctx.prompt.bindings.remove(name).is_some() {
            self.ctx.prompt.mark(name, false);
        }
        true
    }

    async fn refresh_library_quietly(&mut self) {
        if let Err(e) = self.library.refresh(&mut self.ctx.library).await {
            warn!("Library refresh failed: {}", e);
        }
    }
}
