//! Annotation channel between test code and the reporter.
//!
//! Test code holds a [`ReportingApi`] handle and pushes [`Annotation`]s; the
//! reporter owns the matching [`AnnotationBus`] and drains it before every
//! runner event, so an annotation always lands on the item that was active
//! when it was sent. The bus is closed at run end. Sends after that return
//! `false`.

use rprt_common::{Attachment, Attribute, ItemStatus, LogLevel};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// One message from test code to the reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    /// Log to the active item (the launch if nothing is active).
    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
        /// Path of a file to attach, resolved by the stream reader.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip)]
        attachment: Option<Attachment>,
    },
    LaunchLog {
        #[serde(default)]
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip)]
        attachment: Option<Attachment>,
    },
    AddAttributes {
        attributes: Vec<Attribute>,
    },
    SetDescription {
        text: String,
    },
    SetTestCaseId {
        test_case_id: String,
    },
    SetStatus {
        status: ItemStatus,
    },
    SetLaunchStatus {
        status: ItemStatus,
    },
}

impl Annotation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::LaunchLog { .. } => "launch_log",
            Self::AddAttributes { .. } => "add_attributes",
            Self::SetDescription { .. } => "set_description",
            Self::SetTestCaseId { .. } => "set_test_case_id",
            Self::SetStatus { .. } => "set_status",
            Self::SetLaunchStatus { .. } => "set_launch_status",
        }
    }

    /// File path named by a log annotation.
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::Log { file, .. } | Self::LaunchLog { file, .. } => file.as_deref(),
            _ => None,
        }
    }

    /// Attach loaded file contents to a log annotation. No-op otherwise.
    pub fn set_attachment(&mut self, loaded: Attachment) {
        if let Self::Log { attachment, .. } | Self::LaunchLog { attachment, .. } = self {
            *attachment = Some(loaded);
        }
    }
}

/// Reporter-side end of the channel.
#[derive(Debug)]
pub struct AnnotationBus {
    rx: mpsc::UnboundedReceiver<Annotation>,
}

impl AnnotationBus {
    /// A new bus and the handle test code uses to feed it.
    pub fn new() -> (Self, ReportingApi) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ReportingApi { tx })
    }

    /// Everything sent so far, in send order.
    pub fn drain(&mut self) -> Vec<Annotation> {
        let mut pending = Vec::new();
        while let Ok(annotation) = self.rx.try_recv() {
            pending.push(annotation);
        }
        pending
    }

    /// Stop accepting annotations. Already queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Flat reporting API for test code.
///
/// Cheap to clone; every clone feeds the same reporter.
#[derive(Debug, Clone)]
pub struct ReportingApi {
    tx: mpsc::UnboundedSender<Annotation>,
}

impl ReportingApi {
    /// Queue an annotation. `false` once the reporter has closed the bus.
    pub fn send(&self, annotation: Annotation) -> bool {
        let name = annotation.name();
        match self.tx.send(annotation) {
            Ok(()) => true,
            Err(_) => {
                debug!("Dropping {name} annotation, reporter is closed");
                false
            }
        }
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> bool {
        self.send(Annotation::Log {
            level,
            message: message.into(),
            file: None,
            attachment,
        })
    }

    pub fn launch_log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> bool {
        self.send(Annotation::LaunchLog {
            level,
            message: message.into(),
            file: None,
            attachment,
        })
    }

    pub fn trace(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Trace, message, None)
    }

    pub fn debug(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Debug, message, None)
    }

    pub fn info(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Info, message, None)
    }

    pub fn warn(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Warn, message, None)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Error, message, None)
    }

    pub fn fatal(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Fatal, message, None)
    }

    pub fn launch_trace(&self, message: impl Into<String>) -> bool {
        self.launch_log(LogLevel::Trace, message, None)
    }

    pub fn launch_debug(&self, message: impl Into<String>) -> bool {
        self.launch_log(LogLevel::Debug, message, None)
    }

    pub fn launch_info(&self, message: impl Into<String>) -> bool {
        self.launch_log(LogLevel::Info, message, None)
    }

    pub fn launch_warn(&self, message: impl Into<String>) -> bool {
        self.launch_log(LogLevel::Warn, message, None)
    }

    pub fn launch_error(&self, message: impl Into<String>) -> bool {
        self.launch_log(LogLevel::Error, message, None)
    }

    pub fn launch_fatal(&self, message: impl Into<String>) -> bool {
        self.launch_log(LogLevel::Fatal, message, None)
    }

    pub fn add_attributes(&self, attributes: Vec<Attribute>) -> bool {
        self.send(Annotation::AddAttributes { attributes })
    }

    pub fn set_description(&self, text: impl Into<String>) -> bool {
        self.send(Annotation::SetDescription { text: text.into() })
    }

    pub fn set_test_case_id(&self, test_case_id: impl Into<String>) -> bool {
        self.send(Annotation::SetTestCaseId {
            test_case_id: test_case_id.into(),
        })
    }

    pub fn set_status(&self, status: ItemStatus) -> bool {
        self.send(Annotation::SetStatus { status })
    }

    pub fn set_status_passed(&self) -> bool {
        self.set_status(ItemStatus::Passed)
    }

    pub fn set_status_failed(&self) -> bool {
        self.set_status(ItemStatus::Failed)
    }

    pub fn set_status_skipped(&self) -> bool {
        self.set_status(ItemStatus::Skipped)
    }

    pub fn set_status_stopped(&self) -> bool {
        self.set_status(ItemStatus::Stopped)
    }

    pub fn set_status_interrupted(&self) -> bool {
        self.set_status(ItemStatus::Interrupted)
    }

    pub fn set_status_cancelled(&self) -> bool {
        self.set_status(ItemStatus::Cancelled)
    }

    pub fn set_status_info(&self) -> bool {
        self.set_status(ItemStatus::Info)
    }

    pub fn set_status_warn(&self) -> bool {
        self.set_status(ItemStatus::Warn)
    }

    pub fn set_launch_status(&self, status: ItemStatus) -> bool {
        self.send(Annotation::SetLaunchStatus { status })
    }

    pub fn set_launch_status_passed(&self) -> bool {
        self.set_launch_status(ItemStatus::Passed)
    }

    pub fn set_launch_status_failed(&self) -> bool {
        self.set_launch_status(ItemStatus::Failed)
    }

    pub fn set_launch_status_skipped(&self) -> bool {
        self.set_launch_status(ItemStatus::Skipped)
    }

    pub fn set_launch_status_stopped(&self) -> bool {
        self.set_launch_status(ItemStatus::Stopped)
    }

    pub fn set_launch_status_interrupted(&self) -> bool {
        self.set_launch_status(ItemStatus::Interrupted)
    }

    pub fn set_launch_status_cancelled(&self) -> bool {
        self.set_launch_status(ItemStatus::Cancelled)
    }

    pub fn set_launch_status_info(&self) -> bool {
        self.set_launch_status(ItemStatus::Info)
    }

    pub fn set_launch_status_warn(&self) -> bool {
        self.set_launch_status(ItemStatus::Warn)
    }
}
