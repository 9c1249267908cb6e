use serde::{Deserialize, Serialize};

use crate::credential::MIN_CREDENTIAL_WEIGHT;

/// Options of an [`AccessProvider`](crate::provider::AccessProvider).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOptions {
    /// Minimum weight of the credentials loaded for a connected identity.
    #[serde(default = "default_min_credential_weight")]
    pub min_credential_weight: u32,
}

fn default_min_credential_weight() -> u32 {
    MIN_CREDENTIAL_WEIGHT
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            min_credential_weight: MIN_CREDENTIAL_WEIGHT,
        }
    }
}
