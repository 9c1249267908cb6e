use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::source::DataSource;

/// Minimum weight of the credentials queried for a connected identity.
pub const MIN_CREDENTIAL_WEIGHT: u32 = 10;

/// Verifiable credential held by the connected identity, as returned by the
/// credential index.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub identifier: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub subject_did: String,
    #[serde(flatten)]
    pub property_set: BTreeMap<String, Value>,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, subject_did: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            weight: f64::from(MIN_CREDENTIAL_WEIGHT),
            subject_did: subject_did.into(),
            property_set: BTreeMap::new(),
        }
    }

    /// Returns `true` if the weight of this credential is at least `min_weight`.
    pub fn has_min_weight(&self, min_weight: u32) -> bool {
        self.weight >= f64::from(min_weight)
    }
}

/// The connected user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub did: String,
}

impl Identity {
    pub fn new(did: impl Into<String>) -> Self {
        Self { did: did.into() }
    }
}

/// Parse a JSON array of credentials.
///
/// Each element is parsed on its own: an element that is not a valid
/// credential is dropped without affecting the others. Anything but an array
/// yields no credentials.
pub fn credentials_from_value(value: &Value) -> Vec<Credential> {
    let elements = match value {
        Value::Array(elements) => elements,
        Value::Null => return Vec::new(),
        other => {
            log::warn!("Ignoring non-array credentials: {}", other);
            return Vec::new();
        }
    };
    elements
        .iter()
        .filter_map(|element| match Credential::deserialize(element) {
            Ok(credential) => Some(credential),
            Err(err) => {
                log::warn!("Malformed credential {}: {}", element, err);
                None
            }
        })
        .collect()
}

/// Returns `true` if one of `credentials` has the given identifier.
pub fn check_credential_ownership(credentials: &[Credential], identifier: &str) -> bool {
    credentials
        .iter()
        .any(|credential| credential.identifier == identifier)
}

/// Load the credentials of `did` having at least `min_weight`.
///
/// Errors are logged and result in an empty credential set.
pub async fn load_credentials<S>(source: &S, did: &str, min_weight: u32) -> Vec<Credential>
where
    S: DataSource + ?Sized,
{
    match source.credentials(did, min_weight).await {
        Ok(credentials) => credentials,
        Err(err) => {
            log::warn!("Unable to load credentials for {}: {}", did, err);
            Vec::new()
        }
    }
}
