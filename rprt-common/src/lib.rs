//! Shared building blocks of the rprt test reporter.
//!
//! This crate holds everything the sequential reporter (`rprt`) and the
//! parallel coordinator (`rprtd`) have in common: the runner event model,
//! the reporting-client layer, configuration and the small pieces of logic
//! both reconcilers need (hook classification, the annotation overlay,
//! bounded waits).

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod overlay;
pub mod protocol;
pub mod types;
pub mod util;
pub mod wait;

pub use client::{
    ChildFinishSignal, Completion, Dispatched, Dispatcher, FinishItemRequest, FinishLaunchRequest,
    HttpTransport, ItemState, LogRequest, MockClient, ReportingClient, StartItemRequest,
    StartLaunchRequest, Transport,
};
pub use config::{ReporterConfig, WaitConfig};
pub use errors::{ClassificationError, ClientError, ConfigError, EventError, WaitTimeout};
pub use events::{
    HookNode, Runnable, RunnerEvent, SuiteNode, TestError, TestNode, TestState, parse_event_line,
};
pub use hooks::{HookClass, HookKind, ReportingParent, classify, is_internal};
pub use overlay::{AnnotationOverlay, Annotations};
pub use types::{
    Attachment, Attribute, Issue, ItemId, ItemStatus, ItemType, LaunchMode, LogLevel, RunnerId,
};
pub use wait::{PollPolicy, poll_until, wait_for};
