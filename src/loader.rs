use crate::cache::{self, LocalStore};
use crate::context::{canonicalize, ContextRecord};
use crate::rule::AccessRule;
use crate::source::{DataSource, SourceError};

/// Loads the access rules of contexts, caching them locally.
///
/// Rules are looked up and cached by canonical context identifier. Fetch
/// failures never reach the caller: the cached rules (or no rules) are
/// returned instead.
pub struct RuleLoader<S, L> {
    source: S,
    store: L,
}

impl<S: DataSource, L: LocalStore> RuleLoader<S, L> {
    pub fn new(source: S, store: L) -> Self {
        Self { source, store }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    /// Rules cached for `context`, without contacting the data source.
    pub fn cached_rules(&self, context: &str) -> Option<Vec<AccessRule>> {
        let id = canonicalize(context);
        cache::read::<_, ContextRecord>(&self.store, id).map(|record| record.access_rules())
    }

    /// Rules of `context`, from the cache if present, otherwise from the
    /// data source.
    pub async fn load_rules(&self, context: &str) -> Vec<AccessRule> {
        match self.cached_rules(context) {
            Some(rules) => rules,
            None => self.fetch_or(context, Vec::new()).await,
        }
    }

    /// Rules of `context` from the data source, falling back to the cached
    /// rules if the fetch fails.
    pub async fn revalidate(&self, context: &str) -> Vec<AccessRule> {
        let cached = self.cached_rules(context).unwrap_or_default();
        self.fetch_or(context, cached).await
    }

    async fn fetch_or(&self, context: &str, fallback: Vec<AccessRule>) -> Vec<AccessRule> {
        let id = canonicalize(context);
        match self.fetch(id).await {
            Ok(rules) => rules,
            Err(err) => {
                log::warn!("Unable to load context details for {}: {}", id, err);
                fallback
            }
        }
    }

    async fn fetch(&self, id: &str) -> Result<Vec<AccessRule>, SourceError> {
        let record = self.source.context(id).await?.ok_or(SourceError::NotFound)?;
        if let Err(err) = cache::write(&self.store, id, &record) {
            log::warn!("Unable to cache context details for {}: {}", id, err);
        }
        Ok(record.access_rules())
    }
}
