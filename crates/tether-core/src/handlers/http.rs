//! HTTP handlers built on reqwest.
//!
//! - `HttpApiCallHandler`: ApiCall をそのまま HTTP リクエストにする
//! - `HttpFileUploadHandler`: multipart でファイルを送る
//! - `RestSyncHandler`: DataSync を REST の行書き込みに変換する
//!
//! 成功判定はすべて「2xx かどうか」。タイムアウトは `request_timeout_ms` で handler 側が持ちます
//! （Engine は実行時間を制限しない）。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiCallHandler, DataSyncHandler, FileUploadHandler, HandlerError};
use crate::domain::{
    ApiCallPayload, DataSyncPayload, FileUploadPayload, InvalidPayload, SyncOperation,
};

/// Longest response body kept in a `HandlerError::Status`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Prefix for relative endpoints/destinations, e.g. `https://api.example.com/rest/v1`.
    pub base_url: Option<String>,
    /// Sent as `Authorization: Bearer <token>` unless the payload sets its own header.
    pub bearer_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            bearer_token: None,
            request_timeout_ms: 30_000,
        }
    }
}

impl HttpConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Absolute targets pass through; relative ones are joined onto `base_url`.
    pub fn resolve(&self, target: &str) -> Result<String, HandlerError> {
        let target = target.trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            return Ok(target.to_string());
        }
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| HandlerError::MissingBaseUrl(target.to_string()))?;
        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            target.trim_start_matches('/')
        ))
    }
}

/// Shared client + config. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<HttpConfig>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, HandlerError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.bare_request(method, url);
        match &self.config.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Without the configured bearer token.
    fn bare_request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(), HandlerError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), url = %response.url(), "request succeeded");
            return Ok(());
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(HandlerError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn parse_method(kind: &'static str, raw: &str) -> Result<Method, HandlerError> {
    Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
        HandlerError::InvalidPayload(InvalidPayload {
            kind,
            reason: format!("unsupported method '{raw}'"),
        })
    })
}

pub struct HttpApiCallHandler {
    transport: HttpTransport,
}

impl HttpApiCallHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ApiCallHandler for HttpApiCallHandler {
    async fn call(&self, payload: &ApiCallPayload) -> Result<(), HandlerError> {
        payload.validate()?;
        let method = parse_method("api_call", &payload.method)?;
        let url = self.transport.config().resolve(&payload.endpoint)?;

        // payload の Authorization が bearer_token より優先
        let own_auth = payload
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("authorization"));
        let mut builder = if own_auth {
            self.transport.bare_request(method, &url)
        } else {
            self.transport.request(method, &url)
        };
        for (name, value) in &payload.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &payload.body {
            builder = builder.json(body);
        }
        self.transport.send(builder).await
    }
}

pub struct HttpFileUploadHandler {
    transport: HttpTransport,
}

impl HttpFileUploadHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl FileUploadHandler for HttpFileUploadHandler {
    async fn upload(&self, payload: &FileUploadPayload) -> Result<(), HandlerError> {
        payload.validate()?;
        let url = self.transport.config().resolve(&payload.destination)?;
        let bytes = tokio::fs::read(&payload.file_path).await?;

        let mut part = Part::bytes(bytes).file_name(file_name(&payload.file_path));
        if let Some(content_type) = &payload.content_type {
            part = part.mime_str(content_type)?;
        }
        let mut form = Form::new();
        for (name, value) in &payload.fields {
            form = form.text(name.clone(), value.clone());
        }
        form = form.part(payload.field_name.clone(), part);

        let builder = self.transport.request(Method::POST, &url).multipart(form);
        self.transport.send(builder).await
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

/// Maps row writes onto a REST collection API:
///
/// | operation | request                          |
/// |-----------|----------------------------------|
/// | create    | `POST   {base}/{entity}`         |
/// | update    | `PATCH  {base}/{entity}/{id}`    |
/// | upsert    | `PUT    {base}/{entity}[/{id}]`  |
/// | delete    | `DELETE {base}/{entity}/{id}`    |
pub struct RestSyncHandler {
    transport: HttpTransport,
}

impl RestSyncHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    fn route(payload: &DataSyncPayload) -> (Method, String) {
        let entity = payload.entity.trim().trim_matches('/');
        let with_id = |id: &str| format!("{entity}/{}", id.trim());
        match (payload.operation, payload.record_id.as_deref()) {
            (SyncOperation::Create, _) => (Method::POST, entity.to_string()),
            (SyncOperation::Update, Some(id)) => (Method::PATCH, with_id(id)),
            (SyncOperation::Delete, Some(id)) => (Method::DELETE, with_id(id)),
            (SyncOperation::Upsert, Some(id)) => (Method::PUT, with_id(id)),
            (SyncOperation::Upsert, None) => (Method::PUT, entity.to_string()),
            // rejected by validate() before we get here
            (SyncOperation::Update | SyncOperation::Delete, None) => {
                (Method::PATCH, entity.to_string())
            }
        }
    }
}

#[async_trait]
impl DataSyncHandler for RestSyncHandler {
    async fn sync(&self, payload: &DataSyncPayload) -> Result<(), HandlerError> {
        payload.validate()?;
        let (method, path) = Self::route(payload);
        let url = self.transport.config().resolve(&path)?;

        let mut builder = self.transport.request(method, &url);
        if payload.operation != SyncOperation::Delete && !payload.data.is_null() {
            builder = builder.json(&payload.data);
        }
        self.transport.send(builder).await
    }
}
