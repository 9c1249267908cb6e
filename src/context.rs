use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::rule::{rules_from_value, AccessRule};

/// Separator between a parent context and its sub-contexts.
pub const CONTEXT_SEPARATOR: char = ':';

/// Returns the parent context of a possibly composite context identifier.
///
/// Sub-contexts (e.g. `"parent:thread"`) share the access policy of their
/// parent, so rules are looked up and cached by the parent identifier only.
pub fn canonicalize(context: &str) -> &str {
    match context.split_once(CONTEXT_SEPARATOR) {
        Some((parent, _)) => parent,
        None => context,
    }
}

/// Context details, as stored by the data source under a canonical context
/// identifier.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_rules: Option<Value>,
    #[serde(flatten)]
    pub property_set: BTreeMap<String, Value>,
}

impl ContextRecord {
    pub fn with_rules(rules: &[AccessRule]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            access_rules: Some(serde_json::to_value(rules)?),
            property_set: BTreeMap::new(),
        })
    }

    /// Access rules of this context, empty if there are none.
    pub fn access_rules(&self) -> Vec<AccessRule> {
        match &self.access_rules {
            Some(value) => rules_from_value(value),
            None => Vec::new(),
        }
    }
}
