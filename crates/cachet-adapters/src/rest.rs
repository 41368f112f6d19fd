//! REST storage adapter.
//!
//! Treats a single HTTP resource as the backing store, using configurable
//! verbs (GET / PUT / DELETE by default) to read, replace and delete it.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use cachet_store::{CancelToken, ItemStorage, StorageError};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::Cancelled;
use crate::codec::{Codec, CodecError, JsonCodec};

/// Default HTTP request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// REST storage error.
#[derive(Debug, Error)]
pub enum RestStorageError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    /// The request failed at the transport level.
    #[error("request to {url} failed")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The remote returned a status the adapter cannot interpret.
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: StatusCode },

    /// The resource body could not be encoded or decoded.
    #[error("failed to encode or decode resource body")]
    Codec {
        #[source]
        source: CodecError,
    },
}

/// HTTP verbs used to interact with the remote resource.
#[derive(Debug, Clone)]
pub struct RestVerbs {
    /// Verb used to read the resource.
    pub get: Method,
    /// Verb used to replace the resource.
    pub set: Method,
    /// Verb used to delete the resource.
    pub clear: Method,
}

impl Default for RestVerbs {
    fn default() -> Self {
        Self {
            get: Method::GET,
            set: Method::PUT,
            clear: Method::DELETE,
        }
    }
}

/// A single-item storage backed by an HTTP resource.
///
/// `get` maps 404 (and empty bodies) to "no value stored"; other
/// non-success statuses are errors. Cancellation is honored mid-flight by
/// racing the request against the token.
#[derive(Debug, Clone)]
pub struct RestStorage<T, C = JsonCodec> {
    client: Client,
    url: String,
    codec: C,
    verbs: RestVerbs,
    headers: HeaderMap,
    timeout: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> RestStorage<T, C>
where
    C: Codec<T>,
{
    /// Create a REST storage for `url` with an explicit codec.
    pub fn new(url: impl Into<String>, codec: C) -> Result<Self, RestStorageError> {
        let client = Client::builder().build().map_err(RestStorageError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
            codec,
            verbs: RestVerbs::default(),
            headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
            _marker: PhantomData,
        })
    }

    /// Override the HTTP verbs used against the resource.
    #[must_use]
    pub fn with_verbs(mut self, verbs: RestVerbs) -> Self {
        self.verbs = verbs;
        self
    }

    /// Headers sent with every request (authentication, API versions, …).
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The resource URL this adapter talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, method: &Method) -> reqwest::RequestBuilder {
        self.client
            .request(method.clone(), &self.url)
            .headers(self.headers.clone())
            .timeout(self.timeout)
    }

    fn network_error(&self, source: reqwest::Error) -> RestStorageError {
        RestStorageError::Network {
            url: self.url.clone(),
            source,
        }
    }

    fn status_error(&self, status: StatusCode) -> RestStorageError {
        RestStorageError::UnexpectedStatus {
            url: self.url.clone(),
            status,
        }
    }
}

impl<T> RestStorage<T, JsonCodec>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// REST storage with a pre-configured JSON codec.
    pub fn json(url: impl Into<String>) -> Result<Self, RestStorageError> {
        Self::new(url, JsonCodec)
    }
}

/// Run `fut` unless the token fires first.
async fn race<F, O>(cancel: Option<&CancelToken>, fut: F) -> Result<O, StorageError>
where
    F: Future<Output = O>,
{
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Cancelled.into()),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

#[async_trait]
impl<T, C> ItemStorage<T> for RestStorage<T, C>
where
    T: Send + Sync + 'static,
    C: Codec<T> + Send + Sync + 'static,
{
    async fn get(&self, cancel: Option<&CancelToken>) -> Result<Option<T>, StorageError> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Cancelled.into());
        }
        let request = self.request(&self.verbs.get);
        let response = race(cancel, request.send())
            .await?
            .map_err(|e| self.network_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(self.status_error(status).into());
        }

        let bytes = race(cancel, response.bytes())
            .await?
            .map_err(|e| self.network_error(e))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let value = self
            .codec
            .decode(&bytes)
            .map_err(|source| RestStorageError::Codec { source })?;
        Ok(Some(value))
    }

    async fn set(&self, value: T, cancel: Option<&CancelToken>) -> Result<(), StorageError> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Cancelled.into());
        }
        let body = self
            .codec
            .encode(&value)
            .map_err(|source| RestStorageError::Codec { source })?;
        let request = self
            .request(&self.verbs.set)
            .header(CONTENT_TYPE, self.codec.content_type())
            .body(body);
        let response = race(cancel, request.send())
            .await?
            .map_err(|e| self.network_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status).into());
        }
        Ok(())
    }

    async fn clear(&self, cancel: Option<&CancelToken>) -> Result<(), StorageError> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(Cancelled.into());
        }
        let request = self.request(&self.verbs.clear);
        let response = race(cancel, request.send())
            .await?
            .map_err(|e| self.network_error(e))?;

        let status = response.status();
        // Deleting an already-absent resource is not an error.
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(self.status_error(status).into());
        }
        Ok(())
    }
}
