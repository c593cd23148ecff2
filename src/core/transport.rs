use crate::core::error::{ApiError, ApiResult};
use crate::utils::image::image_url;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// An in-process command surface: a named operation plus a named-argument bag.
#[async_trait]
pub trait CommandHost: Send + Sync {
    async fn invoke(&self, command: &str, args: Value) -> anyhow::Result<Value>;
}

/// Decides, per call, whether an embedded command host is reachable.
pub trait TransportProbe: Send + Sync {
    fn embedded_host(&self) -> Option<Arc<dyn CommandHost>>;
}

/// Always routes over HTTP.
pub struct NoEmbeddedHost;

impl TransportProbe for NoEmbeddedHost {
    fn embedded_host(&self) -> Option<Arc<dyn CommandHost>> {
        None
    }
}

/// Always routes to the given host.
pub struct EmbeddedHost(pub Arc<dyn CommandHost>);

impl TransportProbe for EmbeddedHost {
    fn embedded_host(&self) -> Option<Arc<dyn CommandHost>> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Embedded,
    Http,
}

/// The transport chosen for one call.
#[derive(Clone)]
pub enum Route {
    Embedded(Arc<dyn CommandHost>),
    Http,
}

impl Route {
    pub fn kind(&self) -> TransportKind {
        match self {
            Route::Embedded(_) => TransportKind::Embedded,
            Route::Http => TransportKind::Http,
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind())
    }
}

// --- HTTP ---

pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET when `body` is absent, POST with a JSON body otherwise.
    pub async fn send(&self, endpoint: &str, body: Option<&Value>) -> ApiResult<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let request = match body {
            None => self.client.get(&url).header(ACCEPT, "application/json"),
            Some(body) => self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, "application/json")
                .json(body),
        };

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(map_send_error)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Raw bytes of an absolute URL.
    pub async fn fetch_bytes(&self, url: &str) -> ApiResult<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(map_send_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let mut stream = response.bytes_stream();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.map_err(map_send_error)?);
        }
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}

fn map_send_error(e: reqwest::Error) -> ApiError {
    if e.is_builder() {
        ApiError::Other(e.into())
    } else {
        ApiError::Network(e.to_string())
    }
}

// --- Dispatcher ---

pub struct Dispatcher {
    probe: Arc<dyn TransportProbe>,
    http: HttpTransport,
    local_service_url: String,
}

impl Dispatcher {
    pub fn new(probe: Arc<dyn TransportProbe>, http: HttpTransport, local_service_url: &str) -> Self {
        Self {
            probe,
            http,
            local_service_url: local_service_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn route(&self) -> Route {
        match self.probe.embedded_host() {
            Some(host) => Route::Embedded(host),
            None => Route::Http,
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.route().kind()
    }

    pub fn http(&self) -> &HttpTransport {
        &self.http
    }

    /// Runs `command` on the embedded host when one is available, otherwise
    /// sends `body` to `endpoint`.
    pub async fn dispatch<T: DeserializeOwned>(
        &self,
        command: &str,
        args: Value,
        endpoint: &str,
        body: Option<Value>,
    ) -> ApiResult<T> {
        let route = self.route();
        self.dispatch_on(&route, command, args, endpoint, body).await
    }

    pub async fn dispatch_on<T: DeserializeOwned>(
        &self,
        route: &Route,
        command: &str,
        args: Value,
        endpoint: &str,
        body: Option<Value>,
    ) -> ApiResult<T> {
        debug!("dispatch {} via {:?}", command, route);
        let value = match route {
            Route::Embedded(host) => host.invoke(command, args).await.map_err(|e| {
                ApiError::Command {
                    command: command.to_string(),
                    message: format!("{:#}", e),
                }
            }),
            Route::Http => self.http.send(endpoint, body.as_ref()).await,
        }
        .inspect_err(|e| warn!("{} failed: {}", command, e))?;

        Ok(serde_json::from_value(value)?)
    }

    /// Retrieval URL for an image that may only exist as a local path.
    pub fn image_url(&self, path: &str) -> String {
        match self.transport() {
            TransportKind::Embedded => image_url(path, &self.local_service_url),
            TransportKind::Http => image_url(path, self.http.base_url()),
        }
    }
}
