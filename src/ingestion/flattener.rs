//! Batch Flattener - grouped payloads into a flat event list
//!
//! Both levels of keys are discarded. Order within one leaf list is kept;
//! order across groups follows key order and carries no meaning.

use crate::ingestion::{NestedGrouping, RawEvent};
use serde_json::Value;

pub struct BatchFlattener;

impl BatchFlattener {
    pub fn new() -> Self {
        Self
    }

    /// Concatenate every leaf list of the grouping
    pub fn flatten(&self, grouping: NestedGrouping) -> Vec<RawEvent> {
        grouping
            .into_values()
            .flat_map(|sub_groups| sub_groups.into_values())
            .flatten()
            .collect()
    }

    /// Check the shape of an untyped grouping payload
    pub fn parse_grouping(&self, value: Value) -> Result<NestedGrouping, String> {
        serde_json::from_value(value).map_err(|e| {
            format!(
                "grouping must map group -> sub-group -> list of event objects: {}",
                e
            )
        })
    }
}

impl Default for BatchFlattener {
    fn default() -> Self {
        Self::new()
    }
}
