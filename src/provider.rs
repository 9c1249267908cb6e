use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::cache::LocalStore;
use crate::context::canonicalize;
use crate::credential::{load_credentials, Credential, Identity};
use crate::evaluate::{evaluate, EvaluationError};
use crate::loader::RuleLoader;
use crate::options::ProviderOptions;
use crate::rule::AccessRule;
use crate::source::DataSource;

/// Access decision for the current context, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessState {
    /// Canonical identifier of the current context.
    pub context: Option<String>,
    pub has_access: bool,
}

struct State {
    identity: Option<Identity>,
    context: Option<String>,
    credentials: Arc<[Credential]>,
    rules: Arc<[AccessRule]>,
    has_access: bool,
    /// Generation of the latest credentials change; a pending load only
    /// applies if it is still the latest one.
    credentials_request: u64,
    rules_request: u64,
}

impl State {
    fn access_state(&self) -> AccessState {
        AccessState {
            context: self.context.clone(),
            has_access: self.has_access,
        }
    }
}

/// Session scope tracking the connected identity, its credentials and the
/// access rules of the current context.
///
/// Credentials and rules are immutable snapshots, replaced as a whole. Every
/// replacement recomputes the access decision and publishes it to the
/// subscribers.
pub struct AccessProvider<S, L> {
    loader: RuleLoader<S, L>,
    options: ProviderOptions,
    state: RwLock<State>,
    subscribers: Mutex<Vec<UnboundedSender<AccessState>>>,
}

impl<S: DataSource, L: LocalStore> AccessProvider<S, L> {
    pub fn new(source: S, store: L) -> Self {
        Self::with_options(source, store, ProviderOptions::default())
    }

    pub fn with_options(source: S, store: L, options: ProviderOptions) -> Self {
        Self {
            loader: RuleLoader::new(source, store),
            options,
            state: RwLock::new(State {
                identity: None,
                context: None,
                credentials: Arc::from(Vec::new()),
                rules: Arc::from(Vec::new()),
                has_access: true,
                credentials_request: 0,
                rules_request: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn loader(&self) -> &RuleLoader<S, L> {
        &self.loader
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    /// Receive every access state computed from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<AccessState> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn has_access(&self) -> bool {
        self.state.read().has_access
    }

    pub fn access_state(&self) -> AccessState {
        self.state.read().access_state()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.read().identity.clone()
    }

    /// Canonical identifier of the current context.
    pub fn context(&self) -> Option<String> {
        self.state.read().context.clone()
    }

    pub fn credentials(&self) -> Arc<[Credential]> {
        self.state.read().credentials.clone()
    }

    pub fn access_rules(&self) -> Arc<[AccessRule]> {
        self.state.read().rules.clone()
    }

    /// Connect `identity` and load its credentials.
    ///
    /// The loaded credentials are discarded if the credentials changed in the
    /// meantime (`disconnect`, `set_credentials` or another `connect`, even
    /// of the same identity).
    pub async fn connect(&self, identity: Identity) -> Result<bool, EvaluationError> {
        let mut request = 0;
        self.replace(|state| {
            if state.identity.as_ref() != Some(&identity) {
                state.credentials = Arc::from(Vec::new());
            }
            state.identity = Some(identity.clone());
            state.credentials_request += 1;
            request = state.credentials_request;
        })?;
        let credentials = load_credentials(
            self.loader.source(),
            &identity.did,
            self.options.min_credential_weight,
        )
        .await;
        self.replace_if(
            |state| state.credentials_request == request,
            |state| state.credentials = Arc::from(credentials),
        )
        .unwrap_or_else(|| {
            log::debug!("Discarding superseded credentials of {}", identity.did);
            Ok(self.has_access())
        })
    }

    /// Forget the connected identity and its credentials.
    pub fn disconnect(&self) -> Result<bool, EvaluationError> {
        self.replace(|state| {
            state.identity = None;
            state.credentials = Arc::from(Vec::new());
            state.credentials_request += 1;
        })
    }

    /// Replace the credential snapshot.
    pub fn set_credentials(&self, credentials: Vec<Credential>) -> Result<bool, EvaluationError> {
        self.replace(|state| {
            state.credentials = Arc::from(credentials);
            state.credentials_request += 1;
        })
    }

    /// Switch to `context` and load its access rules.
    ///
    /// Cached rules apply immediately, then the rules are revalidated against
    /// the data source. Rules arriving after another `set_context` call are
    /// discarded, even if that call selected the same context.
    pub async fn set_context(&self, context: &str) -> Result<bool, EvaluationError> {
        let id = canonicalize(context).to_owned();
        let cached = self.loader.cached_rules(&id).unwrap_or_default();
        let mut request = 0;
        self.replace(|state| {
            state.context = Some(id.clone());
            state.rules = Arc::from(cached);
            state.rules_request += 1;
            request = state.rules_request;
        })?;
        let rules = self.loader.revalidate(&id).await;
        self.replace_if(
            |state| state.rules_request == request,
            |state| state.rules = Arc::from(rules),
        )
        .unwrap_or_else(|| {
            log::debug!("Discarding superseded access rules of {}", id);
            Ok(self.has_access())
        })
    }

    /// Apply `update` to the state, then recompute and publish the decision.
    fn replace<F>(&self, update: F) -> Result<bool, EvaluationError>
    where
        F: FnOnce(&mut State),
    {
        self.replace_if(|_| true, update)
            .unwrap_or_else(|| Ok(self.has_access()))
    }

    /// Same as `replace` if `current` accepts the state, otherwise leaves it
    /// untouched and returns `None`.
    fn replace_if<C, F>(&self, current: C, update: F) -> Option<Result<bool, EvaluationError>>
    where
        C: FnOnce(&State) -> bool,
        F: FnOnce(&mut State),
    {
        let (result, access_state) = {
            let mut state = self.state.write();
            if !current(&state) {
                return None;
            }
            update(&mut state);
            let result = evaluate(&state.credentials, &state.rules, state.identity.as_ref());
            state.has_access = match &result {
                Ok(has_access) => *has_access,
                Err(err) => {
                    log::error!("Unable to evaluate access rules: {}", err);
                    false
                }
            };
            (result, state.access_state())
        };
        self.subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(access_state.clone()).is_ok());
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{self, MemoryStore};
    use crate::context::ContextRecord;
    use crate::loader::tests::ExampleSource;
    use crate::source::SourceError;
    use async_trait::async_trait;
    use futures::channel::oneshot;

    const ALICE: &str = "did:pkh:eip155:1:0xa11ce";

    fn source() -> ExampleSource {
        let source = ExampleSource::default()
            .with_context("gated", &[AccessRule::credential(["member"])])
            .with_context("allowlist", &[AccessRule::did([ALICE])]);
        source.credentials.lock().insert(
            ALICE.to_string(),
            vec![Credential::new("member", ALICE), {
                let mut light = Credential::new("light", ALICE);
                light.weight = 5.5;
                light
            }],
        );
        source
    }

    #[async_std::test]
    async fn open_until_rules_are_known() {
        let provider = AccessProvider::new(source(), MemoryStore::new());
        assert!(provider.has_access());
        assert_eq!(provider.context(), None);
        assert_eq!(provider.set_context("open").await, Ok(true));
        assert_eq!(provider.context().as_deref(), Some("open"));
    }

    #[async_std::test]
    async fn gated_context() {
        let provider = AccessProvider::new(source(), MemoryStore::new());
        assert_eq!(provider.set_context("gated:thread").await, Ok(false));
        assert_eq!(provider.context().as_deref(), Some("gated"));
        assert_eq!(&provider.access_rules()[..], &[AccessRule::credential(["member"])]);

        assert_eq!(provider.connect(Identity::new(ALICE)).await, Ok(true));
        assert_eq!(provider.credentials().len(), 1);
        assert_eq!(provider.identity(), Some(Identity::new(ALICE)));

        assert_eq!(provider.disconnect(), Ok(false));
        assert!(provider.credentials().is_empty());
    }

    #[async_std::test]
    async fn min_weight_option() {
        let options = ProviderOptions {
            min_credential_weight: 0,
        };
        let provider = AccessProvider::with_options(source(), MemoryStore::new(), options);
        provider.connect(Identity::new(ALICE)).await.unwrap();
        assert_eq!(provider.credentials().len(), 2);
    }

    #[async_std::test]
    async fn allowlist_requires_a_credential() {
        let source = source();
        source.credentials.lock().clear();
        let provider = AccessProvider::new(source, MemoryStore::new());
        provider.set_context("allowlist").await.unwrap();
        assert_eq!(provider.connect(Identity::new(ALICE)).await, Ok(false));
        assert_eq!(
            provider.set_credentials(vec![Credential::new("unrelated", ALICE)]),
            Ok(true)
        );
    }

    #[async_std::test]
    async fn missing_identity_fails_closed() {
        let provider = AccessProvider::new(source(), MemoryStore::new());
        provider.set_context("allowlist").await.unwrap();
        assert_eq!(
            provider.set_credentials(vec![Credential::new("member", ALICE)]),
            Err(EvaluationError::MissingIdentity)
        );
        assert!(!provider.has_access());
    }

    #[async_std::test]
    async fn cached_rules_apply_while_offline() {
        let store = MemoryStore::new();
        cache::write(
            &store,
            "gated",
            &ContextRecord::with_rules(&[AccessRule::credential(["member"])]).unwrap(),
        )
        .unwrap();
        let source = ExampleSource::default();
        source.set_offline(true);
        let provider = AccessProvider::new(source, store);
        let mut states = provider.subscribe();
        assert_eq!(provider.set_context("gated").await, Ok(false));
        assert_eq!(&provider.access_rules()[..], &[AccessRule::credential(["member"])]);
        let expected = AccessState {
            context: Some("gated".to_string()),
            has_access: false,
        };
        assert_eq!(states.try_recv().unwrap(), expected.clone());
        assert_eq!(states.try_recv().unwrap(), expected);
    }

    #[async_std::test]
    async fn subscribers_follow_changes() {
        let provider = AccessProvider::new(source(), MemoryStore::new());
        let mut states = provider.subscribe();
        let dropped = provider.subscribe();
        drop(dropped);
        provider.set_context("gated").await.unwrap();
        provider.connect(Identity::new(ALICE)).await.unwrap();
        let mut seen = Vec::new();
        while let Ok(state) = states.try_recv() {
            seen.push(state.has_access);
        }
        assert_eq!(seen, vec![true, false, false, true]);
        assert_eq!(provider.subscribers.lock().len(), 1);
    }

    /// Holds back the answer for one context id or DID until released. The
    /// answer is read from `inner` when the request arrives.
    struct GatedSource {
        inner: ExampleSource,
        gate: Mutex<Option<(String, oneshot::Receiver<()>)>>,
    }

    impl GatedSource {
        fn new(inner: ExampleSource) -> Self {
            Self {
                inner,
                gate: Mutex::new(None),
            }
        }

        fn hold(&self, key: &str) -> oneshot::Sender<()> {
            let (release, gate) = oneshot::channel();
            *self.gate.lock() = Some((key.to_string(), gate));
            release
        }

        fn take_gate(&self, key: &str) -> Option<oneshot::Receiver<()>> {
            let mut gate = self.gate.lock();
            match gate.take() {
                Some((held, receiver)) if held == key => Some(receiver),
                other => {
                    *gate = other;
                    None
                }
            }
        }
    }

    #[async_trait]
    impl DataSource for GatedSource {
        async fn context(&self, id: &str) -> Result<Option<ContextRecord>, SourceError> {
            let record = self.inner.context(id).await;
            if let Some(gate) = self.take_gate(id) {
                let _ = gate.await;
            }
            record
        }

        async fn credentials(
            &self,
            did: &str,
            min_weight: u32,
        ) -> Result<Vec<Credential>, SourceError> {
            let credentials = self.inner.credentials(did, min_weight).await;
            if let Some(gate) = self.take_gate(did) {
                let _ = gate.await;
            }
            credentials
        }
    }

    #[test_log::test(async_std::test)]
    async fn late_rules_are_discarded() {
        let source = GatedSource::new(
            ExampleSource::default()
                .with_context("slow", &[AccessRule::credential(["member"])])
                .with_context("fast", &[AccessRule::did([ALICE])]),
        );
        let release = source.hold("slow");
        let provider = AccessProvider::new(source, MemoryStore::new());
        let (slow, fast) = futures::join!(provider.set_context("slow"), async {
            let result = provider.set_context("fast").await;
            release.send(()).unwrap();
            result
        });
        assert_eq!(slow, Ok(false));
        assert_eq!(fast, Ok(false));
        assert_eq!(provider.context().as_deref(), Some("fast"));
        assert_eq!(&provider.access_rules()[..], &[AccessRule::did([ALICE])]);
        // The late response still refreshed the cache.
        assert_eq!(
            provider.loader().cached_rules("slow"),
            Some(vec![AccessRule::credential(["member"])])
        );
    }

    #[test_log::test(async_std::test)]
    async fn late_rules_of_reselected_context_are_discarded() {
        let source = GatedSource::new(
            ExampleSource::default()
                .with_context("a", &[AccessRule::credential(["old"])])
                .with_context("b", &[AccessRule::did([ALICE])]),
        );
        let release = source.hold("a");
        let provider = AccessProvider::new(source, MemoryStore::new());
        let (first, last) = futures::join!(provider.set_context("a"), async {
            provider.set_context("b").await.unwrap();
            provider.loader().source().inner.contexts.lock().insert(
                "a".to_string(),
                ContextRecord::with_rules(&[AccessRule::credential(["new"])]).unwrap(),
            );
            let result = provider.set_context("a").await;
            release.send(()).unwrap();
            result
        });
        assert_eq!(last, Ok(false));
        assert_eq!(first, Ok(false));
        assert_eq!(provider.context().as_deref(), Some("a"));
        assert_eq!(&provider.access_rules()[..], &[AccessRule::credential(["new"])]);
    }

    #[test_log::test(async_std::test)]
    async fn late_credentials_of_reconnected_identity_are_discarded() {
        let source = GatedSource::new(source());
        let release = source.hold(ALICE);
        let provider = AccessProvider::new(source, MemoryStore::new());
        provider.set_context("gated").await.unwrap();
        let (first, last) = futures::join!(provider.connect(Identity::new(ALICE)), async {
            provider.disconnect().unwrap();
            provider.loader().source().inner.credentials.lock().clear();
            let result = provider.connect(Identity::new(ALICE)).await;
            release.send(()).unwrap();
            result
        });
        assert_eq!(last, Ok(false));
        assert_eq!(first, Ok(false));
        assert_eq!(provider.identity(), Some(Identity::new(ALICE)));
        assert!(provider.credentials().is_empty());
        assert!(!provider.has_access());
    }

    #[test_log::test(async_std::test)]
    async fn set_credentials_supersedes_pending_load() {
        let source = GatedSource::new(source());
        let release = source.hold(ALICE);
        let provider = AccessProvider::new(source, MemoryStore::new());
        provider.set_context("gated").await.unwrap();
        let (connected, _) = futures::join!(provider.connect(Identity::new(ALICE)), async {
            provider
                .set_credentials(vec![Credential::new("other", ALICE)])
                .unwrap();
            release.send(()).unwrap();
        });
        assert_eq!(connected, Ok(false));
        assert_eq!(&provider.credentials()[..], &[Credential::new("other", ALICE)]);
    }
}
