//! Access control for Orbis contexts.
//!
//! A context (e.g. a forum topic) may be protected by [access rules][rule].
//! A connected user, identified by its [DID][did], is granted access if one of
//! the rules is satisfied by the user's verifiable credentials or by the DID
//! itself.
//!
//! This crate provides:
//! - the [rule model](rule::AccessRule) and its lenient JSON parsing;
//! - the [access evaluator](evaluate::evaluate);
//! - the [context resolver](context::canonicalize) mapping sub-contexts to
//!   the parent context holding their rules;
//! - a [rule loader](loader::RuleLoader) backed by a [`DataSource`] and a
//!   [local cache](cache::LocalStore);
//! - an [`AccessProvider`] recomputing the decision whenever the
//!   credentials or the rules change.
//!
//! [did]: <https://www.w3.org/TR/did-core/>
//!
//! # Basic Usage
//!
//! ```
//! use orbis_access::{evaluate, AccessRule, Credential, Identity};
//!
//! let rules = vec![AccessRule::credential(["github-follower-1"])];
//! let identity = Identity::new("did:pkh:eip155:1:0xabc");
//! let credentials = vec![Credential::new("github-follower-1", &identity.did)];
//!
//! assert_eq!(evaluate(&credentials, &rules, Some(&identity)), Ok(true));
//! assert_eq!(evaluate(&[], &rules, Some(&identity)), Ok(false));
//! ```
//!
//! # Features
//!
//! - `http`: enables [`HttpDataSource`](source::HttpDataSource), reading
//!   contexts and credentials from the Orbis indexer API.

pub mod cache;
pub mod context;
pub mod credential;
pub mod evaluate;
pub mod loader;
pub mod options;
pub mod provider;
pub mod rule;
pub mod source;

pub use cache::{CacheError, FileStore, LocalStore, MemoryStore};
pub use context::{canonicalize, ContextRecord};
pub use credential::{
    check_credential_ownership, credentials_from_value, Credential, Identity, MIN_CREDENTIAL_WEIGHT,
};
pub use evaluate::{evaluate, EvaluationError};
pub use loader::RuleLoader;
pub use options::ProviderOptions;
pub use provider::{AccessProvider, AccessState};
pub use rule::AccessRule;
pub use source::{DataSource, SourceError};
