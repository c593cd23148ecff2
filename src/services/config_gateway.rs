use crate::core::error::{ApiError, ApiResult};
use crate::core::models::{ApiConfig, GenerationConfig, Model, ProviderConfig};
use crate::core::transport::Dispatcher;
use log::warn;
use serde_json::json;
use std::sync::Arc;

/// Loads and saves provider credentials and generation defaults.
pub struct ConfigGateway {
    dispatcher: Arc<Dispatcher>,
}

impl ConfigGateway {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn load_api_config(&self) -> ApiResult<ApiConfig> {
        self.dispatcher
            .dispatch("load_api_config", json!({}), "/api/config/load", None)
            .await
    }

    pub async fn save_api_config(&self, config: &ApiConfig) -> ApiResult<bool> {
        let body = serde_json::to_value(config)?;
        self.dispatcher
            .dispatch("save_api_config", json!({ "config": body }), "/api/config/save", Some(body))
            .await
    }

    pub async fn default_api_config(&self) -> ApiResult<ApiConfig> {
        self.dispatcher
            .dispatch("get_default_api_config", json!({}), "/api/config/default", None)
            .await
    }

    pub async fn load_generation_config(&self) -> ApiResult<GenerationConfig> {
        self.dispatcher
            .dispatch("load_generation_config", json!({}), "/api/generation-config/load", None)
            .await
    }

    pub async fn save_generation_config(&self, config: &GenerationConfig) -> ApiResult<bool> {
        let body = serde_json::to_value(config)?;
        self.dispatcher
            .dispatch(
                "save_generation_config",
                json!({ "config": body }),
                "/api/generation-config/save",
                Some(body),
            )
            .await
    }

    pub async fn default_generation_config(&self) -> ApiResult<GenerationConfig> {
        self.dispatcher
            .dispatch(
                "get_default_generation_config",
                json!({}),
                "/api/generation-config/default",
                None,
            )
            .await
    }

    /// Stored credentials, else the backend defaults, else built-in endpoints.
    pub async fn load_api_config_or_default(&self) -> ApiConfig {
        match self.load_api_config().await {
            Ok(config) => config,
            Err(e) => {
                warn!("No stored API config ({}), using defaults", e);
                self.default_api_config()
                    .await
                    .unwrap_or_else(|_| ApiConfig::with_default_endpoints())
            }
        }
    }

    pub async fn load_generation_config_or_default(&self) -> GenerationConfig {
        match self.load_generation_config().await {
            Ok(config) => config,
            Err(e) => {
                warn!("No stored generation config ({}), using defaults", e);
                self.default_generation_config().await.unwrap_or_default()
            }
        }
    }

    /// Checks that `provider` is reachable with the given credentials.
    ///
    /// A negative answer is an error, never `Ok(false)`.
    pub async fn test_connection(&self, model: Model, provider: &ProviderConfig) -> ApiResult<()> {
        let body = json!({
            "model": model,
            "baseUrl": provider.base_url,
            "apiKey": provider.api_key,
        });
        let outcome: ApiResult<bool> = self
            .dispatcher
            .dispatch("test_api_connection", body.clone(), "/api/test-connection", Some(body))
            .await;

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(ApiError::ConnectionTest {
                provider: model.display_name().to_string(),
                reason: "the service rejected the connection check".to_string(),
            }),
            Err(e) => Err(ApiError::ConnectionTest {
                provider: model.display_name().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::transport::tests::{dead_url, serve_once, MockHost};
    use crate::core::transport::{EmbeddedHost, HttpTransport, NoEmbeddedHost};
    use crate::services::host::LocalCommandHost;

    fn gateway_over(host: Arc<dyn crate::core::transport::CommandHost>) -> ConfigGateway {
        ConfigGateway::new(Arc::new(Dispatcher::new(
            Arc::new(EmbeddedHost(host)),
            HttpTransport::new("http://unused"),
            "http://127.0.0.1:3001",
        )))
    }

    #[tokio::test]
    async fn test_api_config_roundtrip_through_local_host() {
        let temp_dir = tempfile::tempdir().unwrap();
        let host = LocalCommandHost::open(Arc::new(NativeStorage::new(temp_dir.path())))
            .await
            .unwrap();
        let gateway = gateway_over(Arc::new(host));

        let config = ApiConfig {
            seedream: ProviderConfig::new("https://a.example", "k1"),
            banana_pro: ProviderConfig::new("https://b.example", "k2"),
        };
        assert!(gateway.save_api_config(&config).await.unwrap());
        assert_eq!(gateway.load_api_config().await.unwrap(), config);

        let generation = GenerationConfig {
            model: Model::BananaPro,
            width: 16,
            height: 9,
            ..Default::default()
        };
        assert!(gateway.save_generation_config(&generation).await.unwrap());
        assert_eq!(gateway.load_generation_config().await.unwrap(), generation);
    }

    #[tokio::test]
    async fn test_missing_config_falls_back_to_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let host = LocalCommandHost::open(Arc::new(NativeStorage::new(temp_dir.path())))
            .await
            .unwrap();
        let gateway = gateway_over(Arc::new(host));

        assert!(gateway.load_api_config().await.is_err());
        let config = gateway.load_api_config_or_default().await;
        assert_eq!(config.seedream.base_url, "https://eggfans.com");
        assert_eq!(gateway.load_generation_config_or_default().await, GenerationConfig::default());
    }

    #[tokio::test]
    async fn test_save_over_http_posts_config_itself() {
        let (base, handle) = serve_once(200, "true").await;
        let gateway = ConfigGateway::new(Arc::new(Dispatcher::new(
            Arc::new(NoEmbeddedHost),
            HttpTransport::new(&base),
            "http://127.0.0.1:3001",
        )));
        let config = ApiConfig::with_default_endpoints();
        assert!(gateway.save_api_config(&config).await.unwrap());

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /api/config/save "));
        assert!(request.contains(r#""baseUrl":"https://api.zhongzhuan.chat""#));
    }

    #[tokio::test]
    async fn test_negative_connection_check_is_an_error() {
        let host = Arc::new(MockHost::new(vec![("test_api_connection", json!(false))]));
        let gateway = gateway_over(host);
        let err = gateway
            .test_connection(Model::Seedream, &ProviderConfig::new("https://x", "k"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ConnectionTest { .. }));
        assert!(err.to_string().contains("Seedream"));
    }

    #[tokio::test]
    async fn test_unreachable_connection_check_is_an_error() {
        let gateway = ConfigGateway::new(Arc::new(Dispatcher::new(
            Arc::new(NoEmbeddedHost),
            HttpTransport::new(&dead_url().await),
            "http://127.0.0.1:3001",
        )));
        let err = gateway
            .test_connection(Model::BananaPro, &ProviderConfig::new("https://x", "k"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Network Error"));
    }
}
