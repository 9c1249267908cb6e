use async_trait::async_trait;
use thiserror::Error;

use crate::context::ContextRecord;
use crate::credential::Credential;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("not found")]
    NotFound,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("decoding failed: {0}")]
    Decoding(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decoding(err.to_string())
    }
}

/// Remote data source for context records and credentials.
///
/// Implementations are constructed by the application and handed to the
/// [`RuleLoader`](crate::loader::RuleLoader) and
/// [`AccessProvider`](crate::provider::AccessProvider).
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait DataSource: Sync {
    /// Fetch the record of a canonical context.
    ///
    /// Returns `Ok(None)` if the data source has no such context.
    async fn context(&self, id: &str) -> Result<Option<ContextRecord>, SourceError>;

    /// Fetch the credentials issued to `did` with a weight of at least
    /// `min_weight`.
    async fn credentials(&self, did: &str, min_weight: u32)
        -> Result<Vec<Credential>, SourceError>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl<T: DataSource + Send + ?Sized> DataSource for std::sync::Arc<T> {
    async fn context(&self, id: &str) -> Result<Option<ContextRecord>, SourceError> {
        T::context(self, id).await
    }

    async fn credentials(
        &self,
        did: &str,
        min_weight: u32,
    ) -> Result<Vec<Credential>, SourceError> {
        T::credentials(self, did, min_weight).await
    }
}

#[cfg(feature = "http")]
pub use http::HttpDataSource;

#[cfg(feature = "http")]
mod http {
    use async_trait::async_trait;
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    use serde::{Deserialize, Serialize};

    use super::{DataSource, SourceError};
    use crate::context::ContextRecord;
    use crate::credential::{credentials_from_value, Credential};

    pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
    const CONTEXTS_TABLE: &str = "orbis_contexts";
    const CREDENTIALS_RPC: &str = "get_verifiable_credentials";

    /// Data source reading from the Orbis indexer REST API.
    #[derive(Debug, Clone)]
    pub struct HttpDataSource {
        pub endpoint: String,
        client: reqwest::Client,
    }

    #[derive(Deserialize)]
    struct ContextRow {
        #[serde(default)]
        content: Option<ContextRecord>,
    }

    #[derive(Serialize)]
    struct CredentialsQuery<'a> {
        q_subject: &'a str,
        q_min_weight: u32,
    }

    impl HttpDataSource {
        pub fn new(endpoint: &str) -> Result<Self, SourceError> {
            let client = reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .map_err(|e| SourceError::Internal(e.to_string()))?;
            Ok(Self {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                client,
            })
        }

        pub(crate) fn context_url(&self, id: &str) -> String {
            format!(
                "{}/{}?select=*&stream_id=eq.{}",
                self.endpoint,
                CONTEXTS_TABLE,
                utf8_percent_encode(id, NON_ALPHANUMERIC)
            )
        }

        pub(crate) fn credentials_url(&self) -> String {
            format!("{}/rpc/{}", self.endpoint, CREDENTIALS_RPC)
        }

        async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, SourceError> {
            let resp = request
                .header("Accept", "application/json")
                .send()
                .await
                .map_err(|e| SourceError::Http(e.to_string()))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(SourceError::NotFound);
            }
            let resp = resp
                .error_for_status()
                .map_err(|e| SourceError::Http(e.to_string()))?;
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| SourceError::Http(e.to_string()))?;
            Ok(bytes.to_vec())
        }
    }

    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    impl DataSource for HttpDataSource {
        async fn context(&self, id: &str) -> Result<Option<ContextRecord>, SourceError> {
            let url = self.context_url(id);
            let body = self.send(self.client.get(&url)).await?;
            let rows: Vec<ContextRow> = serde_json::from_slice(&body)?;
            Ok(rows.into_iter().next().and_then(|row| row.content))
        }

        async fn credentials(
            &self,
            did: &str,
            min_weight: u32,
        ) -> Result<Vec<Credential>, SourceError> {
            let query = CredentialsQuery {
                q_subject: did,
                q_min_weight: min_weight,
            };
            let body = self
                .send(self.client.post(self.credentials_url()).json(&query))
                .await?;
            let rows: serde_json::Value = serde_json::from_slice(&body)?;
            Ok(credentials_from_value(&rows))
        }
    }

}
