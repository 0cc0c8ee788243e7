//! Wire protocol of the local relay used in parallel mode.
//!
//! Worker processes cannot share runner identities with the coordinator, so
//! a log request names its target by suite title and test title. A hook is
//! addressed by the normalised title `before all`.

use crate::types::LogLevel;
use serde::{Deserialize, Serialize};

/// Event name of a log-attach request.
pub const ADD_LOG: &str = "ADD_LOG";

/// Test title used to address a before-all hook.
pub const HOOK_TARGET_TITLE: &str = "before all";

/// Human-readable address of a test (or suite, when `test` is absent).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestObjectData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
}

impl TestObjectData {
    pub fn test(suite: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            test: Some(test.into()),
            suite: Some(suite.into()),
        }
    }

    pub fn suite(suite: impl Into<String>) -> Self {
        Self {
            test: None,
            suite: Some(suite.into()),
        }
    }

    /// Target for a log emitted from inside a before-all hook of `suite`.
    pub fn hook(suite: impl Into<String>) -> Self {
        Self::test(suite, HOOK_TARGET_TITLE)
    }
}

/// Log payload of a relay request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayLog {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub message: String,
    /// Path of a file to attach, readable by the coordinator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Body of `POST /` on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub event: String,
    /// Older workers send this as `testData`.
    #[serde(default, alias = "testData")]
    pub test_object_data: TestObjectData,
    pub log: Option<RelayLog>,
}

impl RelayRequest {
    pub fn add_log(target: TestObjectData, log: RelayLog) -> Self {
        Self {
            event: ADD_LOG.to_string(),
            test_object_data: target,
            log: Some(log),
        }
    }

    pub fn is_add_log(&self) -> bool {
        self.event == ADD_LOG
    }
}

/// MIME type for an attached file, chosen by extension.
pub fn attachment_mime(file_name: &str) -> &'static str {
    let is_json = file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("json"));
    if is_json { "application/json" } else { "image/png" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_log_body() {
        let body = r#"{
            "event": "ADD_LOG",
            "testObjectData": {"test": "logs in", "suite": "Login"},
            "log": {"level": "WARN", "message": "slow response", "file": "/tmp/shot.png"}
        }"#;
        let request: RelayRequest = serde_json::from_str(body).unwrap();
        assert!(request.is_add_log());
        assert_eq!(request.test_object_data, TestObjectData::test("Login", "logs in"));
        let log = request.log.unwrap();
        assert_eq!(log.level, LogLevel::Warn);
        assert_eq!(log.file.as_deref(), Some("/tmp/shot.png"));
    }

    #[test]
    fn test_accepts_test_data_alias() {
        let body =
            r#"{"event": "ADD_LOG", "testData": {"suite": "Login"}, "log": {"message": "hi"}}"#;
        let request: RelayRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.test_object_data, TestObjectData::suite("Login"));
        assert_eq!(request.log.unwrap().level, LogLevel::Info);
    }

    #[test]
    fn test_serializes_camel_case() {
        let request = RelayRequest::add_log(
            TestObjectData::hook("Cart"),
            RelayLog {
                level: LogLevel::Info,
                message: "seeded".into(),
                file: None,
            },
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["testObjectData"]["test"], "before all");
        assert_eq!(json["event"], "ADD_LOG");
        assert!(json["log"].get("file").is_none());
    }

    #[test]
    fn test_attachment_mime() {
        assert_eq!(attachment_mime("report.JSON"), "application/json");
        assert_eq!(attachment_mime("shot.png"), "image/png");
        assert_eq!(attachment_mime("noext"), "image/png");
    }
}
