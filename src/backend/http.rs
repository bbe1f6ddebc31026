//! JSON-over-HTTP access to the reporting backend.
//!
//! [`HttpApi`] speaks the backend's REST endpoints with `ureq`. It serves two
//! roles: the async [`Transport`] drained by the queue worker (requests run
//! on tokio's blocking pool) and the synchronous [`DirectApi`] used for the
//! finalization fallback.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use super::{DirectApi, Transport, tls};
use crate::{
    config::{ConfigError, Secret, Settings},
    error::BackendError,
    model::{FinishRequest, ItemId, LogLevel, LogRequest, StartItemRequest, StartRunRequest},
};

const MAX_ERROR_BODY: usize = 512;

fn truncated(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&index| body.is_char_boundary(index))
            .unwrap_or(0);
        body.truncate(cut);
    }
    body
}

struct Inner {
    agent: ureq::Agent,
    base: String,
    api_key: Secret,
}

/// HTTP client for the reporting backend.
#[derive(Clone)]
pub struct HttpApi(Arc<Inner>);

impl HttpApi {
    /// Build a client from validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Tls`] if the TLS configuration for
    /// `verify_tls = false` cannot be built.
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let mut builder = ureq::AgentBuilder::new()
            .timeout(settings.http_timeout)
            .user_agent(concat!("reportwire/", env!("CARGO_PKG_VERSION")));
        if !settings.verify_tls {
            let config = tls::insecure_client_config()
                .map_err(|err| ConfigError::Tls(err.to_string()))?;
            builder = builder.tls_config(config);
        }
        Ok(Self(Arc::new(Inner {
            agent: builder.build(),
            base: format!("{}/api/v1/{}", settings.endpoint, settings.project),
            api_key: settings.api_key.clone(),
        })))
    }

    fn url(&self, path: &str) -> String { format!("{}/{path}", self.0.base) }

    fn send<T: Serialize>(&self, method: &str, path: &str, body: &T) -> Result<(), BackendError> {
        let url = self.url(path);
        debug!("{method} {url}");
        let result = self
            .0
            .agent
            .request(method, &url)
            .set("Authorization", &format!("Bearer {}", self.0.api_key.expose()))
            .send_json(body);
        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(BackendError::Status {
                    status,
                    body: truncated(body),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(BackendError::Transport(transport.to_string()))
            }
        }
    }

    fn finish_run_path(run: &ItemId) -> String { format!("launch/{run}/finish") }

    fn start_item_path(request: &StartItemRequest) -> String {
        match &request.parent {
            Some(parent) => format!("item/{parent}"),
            None => "item".to_owned(),
        }
    }

    /// Run a blocking request on tokio's blocking pool.
    async fn offload<F>(&self, request: F) -> Result<(), BackendError>
    where
        F: FnOnce(HttpApi) -> Result<(), BackendError> + Send + 'static,
    {
        let api = self.clone();
        tokio::task::spawn_blocking(move || request(api))
            .await
            .map_err(|err| BackendError::Transport(format!("request task failed: {err}")))?
    }
}

impl DirectApi for HttpApi {
    fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        self.send("PUT", &Self::finish_run_path(run), request)
    }
}

#[async_trait]
impl Transport for HttpApi {
    async fn start_run(&self, request: &StartRunRequest) -> Result<(), BackendError> {
        let request = request.clone();
        self.offload(move |api| api.send("POST", "launch", &request))
            .await
    }

    async fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        let (path, request) = (Self::finish_run_path(run), request.clone());
        self.offload(move |api| api.send("PUT", &path, &request))
            .await
    }

    async fn start_item(&self, request: &StartItemRequest) -> Result<(), BackendError> {
        let (path, request) = (Self::start_item_path(request), request.clone());
        self.offload(move |api| api.send("POST", &path, &request))
            .await
    }

    async fn finish_item(&self, item: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        let (path, request) = (format!("item/{item}"), request.clone());
        self.offload(move |api| api.send("PUT", &path, &request))
            .await
    }

    async fn send_logs(&self, batch: &[LogRequest]) -> Result<(), BackendError> {
        let entries: Vec<LogEntry> = batch.iter().map(LogEntry::from).collect();
        self.offload(move |api| api.send("POST", "log/batch", &entries))
            .await
    }
}

/// Wire form of a log entry; attachments travel base64-encoded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    launch_uuid: ItemId,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_uuid: Option<ItemId>,
    level: LogLevel,
    message: String,
    time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<FileEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    name: String,
    content_type: String,
    content: String,
}

impl From<&LogRequest> for LogEntry {
    fn from(request: &LogRequest) -> Self {
        Self {
            launch_uuid: request.launch_uuid.clone(),
            item_uuid: request.item.clone(),
            level: request.level,
            message: request.message.clone(),
            time: request.time,
            file: request.attachment.as_ref().map(|file| FileEntry {
                name: file.name.clone(),
                content_type: file.mime_type.clone(),
                content: STANDARD.encode(&file.data),
            }),
        }
    }
}
