//! Worker-side client of the relay.
//!
//! Test code running inside a worker process uses this to attach logs to
//! items the coordinator owns, and a worker-side runner adapter uses it to
//! forward its runner events.

use crate::errors::RelayError;
use rprt_common::config::RelayConfig;
use rprt_common::protocol::{RelayLog, RelayRequest, TestObjectData};
use rprt_common::{LogLevel, RunnerEvent};
use std::time::Duration;
use tracing::debug;

const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    url: String,
}

impl RelayClient {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        Self::with_url(config.url())
    }

    /// `url` is the relay root and must end with `/`.
    pub fn with_url(url: impl Into<String>) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder().timeout(RELAY_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Attach a log, and optionally a file, to the item `target` names.
    pub async fn log(
        &self,
        target: TestObjectData,
        level: LogLevel,
        message: impl Into<String>,
        file: Option<&str>,
    ) -> Result<(), RelayError> {
        let request = RelayRequest::add_log(
            target,
            RelayLog {
                level,
                message: message.into(),
                file: file.map(str::to_string),
            },
        );
        debug!("Relaying {:?} log", request.log.as_ref().map(|log| log.level));
        self.post(&self.url, &request).await
    }

    pub async fn trace(
        &self,
        target: TestObjectData,
        message: impl Into<String>,
    ) -> Result<(), RelayError> {
        self.log(target, LogLevel::Trace, message, None).await
    }

    pub async fn debug(
        &self,
        target: TestObjectData,
        message: impl Into<String>,
    ) -> Result<(), RelayError> {
        self.log(target, LogLevel::Debug, message, None).await
    }

    pub async fn info(
        &self,
        target: TestObjectData,
        message: impl Into<String>,
    ) -> Result<(), RelayError> {
        self.log(target, LogLevel::Info, message, None).await
    }

    pub async fn warn(
        &self,
        target: TestObjectData,
        message: impl Into<String>,
    ) -> Result<(), RelayError> {
        self.log(target, LogLevel::Warn, message, None).await
    }

    pub async fn error(
        &self,
        target: TestObjectData,
        message: impl Into<String>,
    ) -> Result<(), RelayError> {
        self.log(target, LogLevel::Error, message, None).await
    }

    pub async fn fatal(
        &self,
        target: TestObjectData,
        message: impl Into<String>,
    ) -> Result<(), RelayError> {
        self.log(target, LogLevel::Fatal, message, None).await
    }

    /// Forward one runner event to the coordinator.
    pub async fn send_event(&self, event: &RunnerEvent) -> Result<(), RelayError> {
        let url = format!("{}events", self.url);
        self.post(&url, event).await
    }

    async fn post<B>(&self, url: &str, body: &B) -> Result<(), RelayError>
    where
        B: serde::Serialize + ?Sized,
    {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
