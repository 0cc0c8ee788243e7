//! Hook title classification.
//!
//! Runners describe hooks only through their display title, e.g.
//! `"before each" hook: login` or `"after all" hook` for an anonymous one.
//! The title carries the hook kind, which decides both the remote item type
//! and whether the hook is reported under its suite or the suite's parent.

use crate::errors::ClassificationError;
use crate::types::ItemType;
use regex::Regex;
use std::sync::OnceLock;

/// The four hook kinds a runner emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeEach,
    BeforeAll,
    AfterEach,
    AfterAll,
}

impl HookKind {
    /// Label the runner puts in the hook title.
    pub fn label(self) -> &'static str {
        match self {
            Self::BeforeEach => "before each",
            Self::BeforeAll => "before all",
            Self::AfterEach => "after each",
            Self::AfterAll => "after all",
        }
    }

    /// Remote item type used to report this hook.
    pub fn item_type(self) -> ItemType {
        match self {
            Self::BeforeEach => ItemType::BeforeMethod,
            Self::BeforeAll => ItemType::BeforeSuite,
            Self::AfterEach => ItemType::AfterMethod,
            Self::AfterAll => ItemType::AfterSuite,
        }
    }

    /// All-scoped hooks bracket a whole suite.
    pub fn is_all_scoped(self) -> bool {
        matches!(self, Self::BeforeAll | Self::AfterAll)
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "before each" => Some(Self::BeforeEach),
            "before all" => Some(Self::BeforeAll),
            "after each" => Some(Self::AfterEach),
            "after all" => Some(Self::AfterAll),
            _ => None,
        }
    }
}

/// Which suite a hook item is created under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingParent {
    /// The suite that declares the hook.
    Suite,
    /// The parent of the declaring suite.
    GrandparentSuite,
}

/// Result of classifying a hook title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookClass {
    pub kind: HookKind,
    /// Title with the `"<kind>" hook:` prefix removed.
    pub name: String,
    pub parent: ReportingParent,
}

fn hook_kind_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"before each|before all|after each|after all").unwrap_or_else(|err| {
            unreachable!("hook kind pattern is a valid regex: {err}")
        })
    })
}

/// Hooks the runner or its parallel wrapper generates on its own. They are
/// never reported.
pub fn is_internal(title: &str) -> bool {
    title.contains("generated_") || title.contains("root")
}

/// Classify a hook from its display title.
pub fn classify(title: &str) -> Result<HookClass, ClassificationError> {
    let kind = hook_kind_regex()
        .find(title)
        .and_then(|m| HookKind::from_label(m.as_str()))
        .ok_or_else(|| ClassificationError {
            title: title.to_string(),
        })?;

    let prefix = format!("\"{}\" hook:", kind.label());
    let name = title.replacen(&prefix, "", 1).trim().to_string();
    let parent = if kind.is_all_scoped() {
        ReportingParent::GrandparentSuite
    } else {
        ReportingParent::Suite
    };

    Ok(HookClass { kind, name, parent })
}
