//! rprt - sequential test-run reporter.
//!
//! Turns the lifecycle events of one test-runner process into a launch,
//! suites, tests and hooks on the remote reporting service.

pub mod annotations;
pub mod identity;
pub mod registry;
pub mod reporter;

pub use annotations::{Annotation, AnnotationBus, ReportingApi};
pub use identity::{IdentityTable, NodeId};
pub use registry::{ItemRegistry, RecordKind, Registration};
pub use reporter::{AGENT_NAME, AGENT_VERSION, Reporter};

use rprt_common::{EventError, RunnerEvent, parse_event_line};
use serde::Deserialize;

/// One line of the reporter's input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Event(RunnerEvent),
    Annotation(Annotation),
}

#[derive(Deserialize)]
struct AnnotationLine {
    annotation: Annotation,
}

/// Parse a stream line: `{"annotation": {...}}` or a runner event.
pub fn parse_stream_line(line: &str) -> Result<StreamLine, EventError> {
    let trimmed = line.trim();
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        // Let the event parser produce the error for empty or broken lines.
        Err(_) => return parse_event_line(trimmed).map(StreamLine::Event),
    };
    if value.get("annotation").is_none() {
        return parse_event_line(trimmed).map(StreamLine::Event);
    }
    serde_json::from_value::<AnnotationLine>(value)
        .map(|line| StreamLine::Annotation(line.annotation))
        .map_err(|source| EventError::Malformed {
            line: trimmed.chars().take(120).collect(),
            source,
        })
}
