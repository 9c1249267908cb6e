use thiserror::Error;

use crate::credential::{check_credential_ownership, Credential, Identity};
use crate::rule::{AccessRule, CredentialRule, DidRule};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// A DID rule was reached while no identity is connected.
    #[error("DID access rule evaluated without a connected identity")]
    MissingIdentity,
}

/// Decide whether the holder of `credentials` may access a context protected
/// by `rules`.
///
/// - No rules: access is granted.
/// - Rules but no credentials: access is denied, whatever the rules are. This
///   includes DID rules that would have matched `identity`.
/// - Otherwise access is granted if any rule grants it. Rules are evaluated
///   in order, stopping at the first one granting access.
pub fn evaluate(
    credentials: &[Credential],
    rules: &[AccessRule],
    identity: Option<&Identity>,
) -> Result<bool, EvaluationError> {
    if rules.is_empty() {
        return Ok(true);
    }
    if credentials.is_empty() {
        return Ok(false);
    }
    for rule in rules {
        if rule_grants(rule, credentials, identity)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn rule_grants(
    rule: &AccessRule,
    credentials: &[Credential],
    identity: Option<&Identity>,
) -> Result<bool, EvaluationError> {
    match rule {
        AccessRule::Credential(CredentialRule {
            required_credentials,
            ..
        }) => Ok(required_credentials.iter().any(|required| {
            required
                .identifier
                .as_deref()
                .map_or(false, |identifier| check_credential_ownership(credentials, identifier))
        })),
        AccessRule::Did(DidRule {
            authorized_users, ..
        }) => {
            let identity = identity.ok_or(EvaluationError::MissingIdentity)?;
            Ok(authorized_users
                .iter()
                .any(|user| user.did.as_deref() == Some(identity.did.as_str())))
        }
        AccessRule::Unknown => Ok(false),
    }
}
