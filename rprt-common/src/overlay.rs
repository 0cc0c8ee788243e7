//! Per-item annotations applied when an item finishes.
//!
//! Test code can attach attributes, a description, a test case id or a
//! status override to whatever item is active while it runs. Those values
//! accumulate here, keyed by item id, until the item's finish payload is
//! built; [`AnnotationOverlay::take`] then removes them so nothing leaks into
//! a later item.

use crate::types::{Attribute, ItemId, ItemStatus};
use std::collections::HashMap;

/// Everything recorded for one item, consumed by its finish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    pub attributes: Vec<Attribute>,
    pub description: Option<String>,
    pub test_case_id: Option<String>,
    pub status: Option<ItemStatus>,
}

impl Annotations {
    /// Attributes for a finish payload (`None` when nothing was recorded).
    pub fn attributes(&self) -> Option<Vec<Attribute>> {
        (!self.attributes.is_empty()).then(|| self.attributes.clone())
    }
}

#[derive(Debug, Default)]
pub struct AnnotationOverlay {
    attributes: HashMap<ItemId, Vec<Attribute>>,
    descriptions: HashMap<ItemId, String>,
    test_case_ids: HashMap<ItemId, String>,
    statuses: HashMap<ItemId, ItemStatus>,
}

impl AnnotationOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append attributes (order preserved across calls).
    pub fn add_attributes(
        &mut self,
        item: &ItemId,
        attributes: impl IntoIterator<Item = Attribute>,
    ) {
        self.attributes
            .entry(item.clone())
            .or_default()
            .extend(attributes);
    }

    /// Set the description; a later call replaces an earlier one.
    pub fn set_description(&mut self, item: &ItemId, description: impl Into<String>) {
        self.descriptions.insert(item.clone(), description.into());
    }

    pub fn set_test_case_id(&mut self, item: &ItemId, test_case_id: impl Into<String>) {
        self.test_case_ids.insert(item.clone(), test_case_id.into());
    }

    pub fn set_status(&mut self, item: &ItemId, status: ItemStatus) {
        self.statuses.insert(item.clone(), status);
    }

    /// Status override recorded for an item, if any.
    pub fn status(&self, item: &ItemId) -> Option<ItemStatus> {
        self.statuses.get(item).copied()
    }

    /// Remove and return everything recorded for `item`.
    pub fn take(&mut self, item: &ItemId) -> Annotations {
        Annotations {
            attributes: self.attributes.remove(item).unwrap_or_default(),
            description: self.descriptions.remove(item),
            test_case_id: self.test_case_ids.remove(item),
            status: self.statuses.remove(item),
        }
    }

    /// Whether anything is recorded for `item`.
    pub fn contains(&self, item: &ItemId) -> bool {
        self.attributes.contains_key(item)
            || self.descriptions.contains_key(item)
            || self.test_case_ids.contains_key(item)
            || self.statuses.contains_key(item)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
            && self.descriptions.is_empty()
            && self.test_case_ids.is_empty()
            && self.statuses.is_empty()
    }
}
