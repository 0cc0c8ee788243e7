//! Wire calls against the reporting service.

use super::{
    FinishItemRequest, FinishLaunchRequest, LogRequest, StartItemRequest, StartLaunchRequest,
};
use crate::errors::ClientError;
use crate::types::Attachment;
use crate::util::format_name;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout of the HTTP transport.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Asynchronous calls that take and return server-side ids.
///
/// Implementations do not retry; a failed call is reported once and the
/// dispatcher logs it.
pub trait Transport: Send + Sync + 'static {
    fn start_launch(
        &self,
        request: StartLaunchRequest,
    ) -> impl Future<Output = Result<String, ClientError>> + Send;

    fn finish_launch(
        &self,
        launch_id: String,
        request: FinishLaunchRequest,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn start_item(
        &self,
        launch_id: String,
        parent_id: Option<String>,
        request: StartItemRequest,
    ) -> impl Future<Output = Result<String, ClientError>> + Send;

    fn finish_item(
        &self,
        launch_id: String,
        item_id: String,
        request: FinishItemRequest,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// `item_id` is `None` for a launch-level log.
    fn send_log(
        &self,
        launch_id: String,
        item_id: Option<String>,
        request: LogRequest,
        attachment: Option<Attachment>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody<'a, T: Serialize> {
    launch_uuid: &'a str,
    #[serde(flatten)]
    request: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogBody<'a> {
    launch_uuid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_uuid: Option<&'a str>,
    #[serde(flatten)]
    request: &'a LogRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<FileRef<'a>>,
}

#[derive(Serialize)]
struct FileRef<'a> {
    name: &'a str,
}

/// JSON-over-HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    /// Build a transport for `{endpoint}/api/v1/{project}`.
    pub fn new(endpoint: &str, project: &str, token: &str) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/api/v1/{}", endpoint.trim_end_matches('/'), project),
            token: token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Status { status, body })
        }
    }

    async fn post_for_id<B: Serialize>(&self, path: &str, body: &B) -> Result<String, ClientError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let parsed: IdResponse = response
            .json()
            .await
            .map_err(|err| ClientError::Response(err.to_string()))?;
        Ok(parsed.id)
    }

    async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ClientError> {
        let response = self
            .client
            .put(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::check(response).await.map(drop)
    }
}

impl Transport for HttpTransport {
    async fn start_launch(&self, mut request: StartLaunchRequest) -> Result<String, ClientError> {
        request.name = format_name(&request.name);
        let id = self.post_for_id("launch", &request).await?;
        debug!("Launch {} started as {}", request.name, id);
        Ok(id)
    }

    async fn finish_launch(
        &self,
        launch_id: String,
        request: FinishLaunchRequest,
    ) -> Result<(), ClientError> {
        self.put(&format!("launch/{launch_id}/finish"), &request).await
    }

    async fn start_item(
        &self,
        launch_id: String,
        parent_id: Option<String>,
        mut request: StartItemRequest,
    ) -> Result<String, ClientError> {
        request.name = format_name(&request.name);
        let path = match &parent_id {
            Some(parent) => format!("item/{parent}"),
            None => "item".to_string(),
        };
        let body = ItemBody {
            launch_uuid: &launch_id,
            request: &request,
        };
        self.post_for_id(&path, &body).await
    }

    async fn finish_item(
        &self,
        launch_id: String,
        item_id: String,
        request: FinishItemRequest,
    ) -> Result<(), ClientError> {
        let body = ItemBody {
            launch_uuid: &launch_id,
            request: &request,
        };
        self.put(&format!("item/{item_id}"), &body).await
    }

    async fn send_log(
        &self,
        launch_id: String,
        item_id: Option<String>,
        request: LogRequest,
        attachment: Option<Attachment>,
    ) -> Result<(), ClientError> {
        let body = LogBody {
            launch_uuid: &launch_id,
            item_uuid: item_id.as_deref(),
            request: &request,
            file: attachment.as_ref().map(|a| FileRef { name: &a.name }),
        };

        let builder = self.client.post(self.url("log")).bearer_auth(&self.token);
        let builder = match &attachment {
            None => builder.json(&body),
            Some(attachment) => {
                let json = serde_json::to_string(&[&body])
                    .map_err(|err| ClientError::Transport(err.to_string()))?;
                let json_part = Part::text(json).mime_str("application/json")?;
                let file_part = Part::bytes(attachment.content.clone())
                    .file_name(attachment.name.clone())
                    .mime_str(&attachment.mime)?;
                builder.multipart(
                    Form::new()
                        .part("json_request_part", json_part)
                        .part("file", file_part),
                )
            }
        };

        Self::check(builder.send().await?).await.map(drop)
    }
}
