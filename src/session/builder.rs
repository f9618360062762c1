use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::{RequestInterceptor, ResponseInterceptor, Session, SessionRef};
use crate::auth::{Challenge, ChallengeHandler, Credential, Disposition, ServerTrustPolicy};
use crate::request::{self, CachePolicy, DEFAULT_TIMEOUT};
use crate::response;
use crate::task::RetryPolicy;
use crate::transport::{Transport, Unavailable};
use crate::{Error, Response};

/// A builder for a [`Session`].
pub struct Builder {
    transport: Arc<dyn Transport>,
    cache: CachePolicy,
    timeout: Duration,
    request_interceptors: Vec<RequestInterceptor>,
    response_interceptors: Vec<ResponseInterceptor>,
    retry: Option<RetryPolicy>,
    server_trust: HashMap<String, Arc<dyn ServerTrustPolicy>>,
    auth_challenge: Option<ChallengeHandler>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            transport: Arc::new(Unavailable),
            cache: CachePolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
            retry: None,
            server_trust: HashMap::new(),
            auth_challenge: None,
        }
    }
}

impl Builder {
    /// A builder with no transport, which fails every transfer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the provided transport.
    pub fn with_transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Cache policy for requests made with [`Session::fetch`] and friends.
    pub fn with_cache_policy(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    /// Timeout for requests made with [`Session::fetch`] and friends.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append a request interceptor.
    pub fn with_request_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(request::Builder) -> request::Builder + Send + Sync + 'static,
    {
        self.request_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Append a response interceptor.
    pub fn with_response_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(response::Builder) -> response::Builder + Send + Sync + 'static,
    {
        self.response_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Retry policy consulted when a task's own policy is absent or declines.
    pub fn with_retry_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(Option<&Response>, Option<&Error>, u32) -> bool + Send + Sync + 'static,
    {
        self.retry = Some(Arc::new(policy));
        self
    }

    /// Evaluate server trust for `host` with this policy.
    pub fn with_server_trust<P>(mut self, host: impl Into<String>, policy: P) -> Self
    where
        P: ServerTrustPolicy,
    {
        self.server_trust.insert(host.into(), Arc::new(policy));
        self
    }

    /// Answer every authentication challenge with this handler.
    pub fn with_auth_challenge<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Challenge) -> (Disposition, Option<Credential>) + Send + Sync + 'static,
    {
        self.auth_challenge = Some(Arc::new(handler));
        self
    }

    /// Build the session.
    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(SessionRef {
                transport: self.transport,
                cache: self.cache,
                timeout: self.timeout,
                request_interceptors: RwLock::new(self.request_interceptors),
                response_interceptors: RwLock::new(self.response_interceptors),
                retry: RwLock::new(self.retry),
                server_trust: self.server_trust,
                auth_challenge: self.auth_challenge,
                registry: Default::default(),
            }),
        }
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("transport", &self.transport)
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .field("retry", &self.retry.is_some())
            .field("server_trust", &self.server_trust.keys().collect::<Vec<_>>())
            .field("auth_challenge", &self.auth_challenge.is_some())
            .finish()
    }
}
