use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Access rule attached to a context.
///
/// Rules are internally tagged by their `type` property. A tag that this
/// crate does not know is kept as [`AccessRule::Unknown`], which never grants
/// access.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccessRule {
    /// Grants access to holders of any of the required credentials.
    Credential(CredentialRule),
    /// Grants access to an explicit list of DIDs.
    Did(DidRule),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRule {
    #[serde(default, deserialize_with = "lenient_entries")]
    pub required_credentials: Vec<RequiredCredential>,
    /// Combination operator. Read but not interpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DidRule {
    #[serde(default, deserialize_with = "lenient_entries")]
    pub authorized_users: Vec<AuthorizedUser>,
    /// Combination operator. Read but not interpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// Credential required by a [`CredentialRule`].
///
/// Only `identifier` is compared when checking ownership; other properties
/// (weight, description, ...) are preserved as-is. An entry without an
/// identifier matches no credential.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RequiredCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(flatten)]
    pub property_set: BTreeMap<String, Value>,
}

/// DID listed by a [`DidRule`]. An entry without a DID matches no identity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuthorizedUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    #[serde(flatten)]
    pub property_set: BTreeMap<String, Value>,
}

impl RequiredCredential {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            property_set: BTreeMap::new(),
        }
    }
}

impl AuthorizedUser {
    pub fn new(did: impl Into<String>) -> Self {
        Self {
            did: Some(did.into()),
            property_set: BTreeMap::new(),
        }
    }
}

impl AccessRule {
    /// Rule granting access to holders of any of the given credential identifiers.
    pub fn credential<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Credential(CredentialRule {
            required_credentials: identifiers
                .into_iter()
                .map(RequiredCredential::new)
                .collect(),
            operator: None,
        })
    }

    /// Rule granting access to any of the given DIDs.
    pub fn did<I, S>(dids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Did(DidRule {
            authorized_users: dids.into_iter().map(AuthorizedUser::new).collect(),
            operator: None,
        })
    }
}

/// Entries of a rule list that are not objects are dropped, so that they
/// cannot turn the whole rule into [`AccessRule::Unknown`].
fn lenient_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: for<'a> Deserialize<'a>,
{
    let entries = Vec::<Value>::deserialize(deserializer)?;
    Ok(entries
        .iter()
        .filter_map(|entry| match T::deserialize(entry) {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Ignoring malformed rule entry {}: {}", entry, err);
                None
            }
        })
        .collect())
}

/// Parse an `accessRules` JSON value.
///
/// Each element is parsed on its own so that a single malformed rule cannot
/// hide the others: it becomes [`AccessRule::Unknown`] instead. Anything but
/// an array yields no rules.
pub fn rules_from_value(value: &Value) -> Vec<AccessRule> {
    let elements = match value {
        Value::Array(elements) => elements,
        Value::Null => return Vec::new(),
        other => {
            log::warn!("Ignoring non-array access rules: {}", other);
            return Vec::new();
        }
    };
    elements
        .iter()
        .map(|element| match AccessRule::deserialize(element) {
            Ok(rule) => rule,
            Err(err) => {
                log::warn!("Malformed access rule {}: {}", element, err);
                AccessRule::Unknown
            }
        })
        .collect()
}
