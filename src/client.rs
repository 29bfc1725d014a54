//! Remote-service clients built on the resilience layer
//!
//! Concrete HTTP/gRPC backends live outside this crate. They implement
//! [`ServiceBackend`], get registered in a [`BackendRegistry`] and are wrapped
//! in a [`ResilientClient`] which adds caching, circuit breaking, retry and
//! lifecycle tracking.

use crate::cache::CacheStore;
use crate::error::{ResilienceError, Result};
use crate::lifecycle::{AsyncResourceManager, CloseReport, ManagerConfig, SessionHandle};
use crate::resilience::{call_with_resilience, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The kinds of remote AI services a pipeline calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    SceneDetection,
    Transcription,
    Ocr,
    VectorSearch,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::SceneDetection,
        ServiceKind::Transcription,
        ServiceKind::Ocr,
        ServiceKind::VectorSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::SceneDetection => "scene-detection",
            ServiceKind::Transcription => "transcription",
            ServiceKind::Ocr => "ocr",
            ServiceKind::VectorSearch => "vector-search",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ResilienceError::ValidationError(format!("unknown service kind: {}", s)))
    }
}

/// One request to a remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Backend-specific operation name
    pub operation: String,

    /// Request body
    pub payload: Value,

    /// Cache key; requests without one are never cached
    pub cache_key: Option<String>,

    /// TTL for the cached result (store default when `None`)
    pub ttl: Option<Duration>,
}

impl ServiceRequest {
    pub fn new(operation: impl Into<String>, payload: Value) -> Self {
        Self {
            operation: operation.into(),
            payload,
            cache_key: None,
            ttl: None,
        }
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Key under which the result is cached, namespaced by service
    pub fn scoped_cache_key(&self, kind: ServiceKind) -> Option<String> {
        self.cache_key.as_ref().map(|key| format!("{}:{}", kind, key))
    }
}

/// A concrete remote-service implementation
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// Perform one call. Transient failures should be reported as
    /// `ConnectionError`, `ServiceUnavailable` or `TimeoutError` so they are
    /// retried and counted by the breaker.
    async fn invoke(&self, request: &ServiceRequest) -> Result<Value>;
}

/// Explicit factory of backends keyed by [`ServiceKind`]
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<ServiceKind, Arc<dyn ServiceBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under its own kind, replacing any previous one
    pub fn register(&mut self, backend: Arc<dyn ServiceBackend>) -> Option<Arc<dyn ServiceBackend>> {
        let kind = backend.kind();
        debug!(service = %kind, "Registering service backend");
        self.backends.insert(kind, backend)
    }

    pub fn get(&self, kind: ServiceKind) -> Option<Arc<dyn ServiceBackend>> {
        self.backends.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL
            .into_iter()
            .filter(|kind| self.backends.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Per-client resilience configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    pub manager: ManagerConfig,
}

impl ClientConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.retry.validate()?;
        self.breaker.validate()?;
        self.manager.validate()
    }
}

struct ClientInner {
    kind: ServiceKind,
    backend: Arc<dyn ServiceBackend>,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
    cache: Option<Arc<CacheStore>>,
}

impl ClientInner {
    async fn call(&self, request: &ServiceRequest) -> Result<Value> {
        let key = request.scoped_cache_key(self.kind);
        let cache = match (&self.cache, key.as_deref()) {
            (Some(store), Some(key)) => Some((store.as_ref(), key)),
            _ => None,
        };

        call_with_resilience(
            || self.backend.invoke(request),
            &self.policy,
            &self.breaker,
            cache,
            request.ttl,
        )
        .await
    }
}

/// A service backend wrapped with caching, circuit breaking, retry and
/// lifecycle tracking
pub struct ResilientClient {
    inner: Arc<ClientInner>,
    resources: AsyncResourceManager,
}

impl ResilientClient {
    pub fn new(
        backend: Arc<dyn ServiceBackend>,
        config: ClientConfig,
        cache: Option<Arc<CacheStore>>,
        session: Option<Arc<dyn SessionHandle>>,
    ) -> Result<Self> {
        config.validate().map_err(ResilienceError::ConfigError)?;

        let kind = backend.kind();
        let mut manager_config = config.manager;
        if manager_config.name == ManagerConfig::default().name {
            manager_config.name = format!("{}-client", kind);
        }

        let resources = match session {
            Some(session) => AsyncResourceManager::with_session(manager_config, session),
            None => AsyncResourceManager::new(manager_config),
        };

        info!(service = %kind, cached = cache.is_some(), "Created resilient client");

        Ok(Self {
            inner: Arc::new(ClientInner {
                kind,
                backend,
                breaker: CircuitBreaker::new(kind.as_str(), config.breaker),
                policy: config.retry,
                cache,
            }),
            resources,
        })
    }

    /// Build a client for `kind` from the registry
    pub fn from_registry(
        registry: &BackendRegistry,
        kind: ServiceKind,
        config: ClientConfig,
        cache: Option<Arc<CacheStore>>,
        session: Option<Arc<dyn SessionHandle>>,
    ) -> Result<Self> {
        let backend = registry
            .get(kind)
            .ok_or_else(|| ResilienceError::ConfigError(format!("no backend registered for {}", kind)))?;
        Self::new(backend, config, cache, session)
    }

    pub fn kind(&self) -> ServiceKind {
        self.inner.kind
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn resources(&self) -> &AsyncResourceManager {
        &self.resources
    }

    /// Call the backend through the cache, breaker and retry layers
    pub async fn call(&self, request: &ServiceRequest) -> Result<Value> {
        if self.resources.is_closed() {
            return Err(ResilienceError::ShutdownError(format!("{} client is closed", self.inner.kind)));
        }
        self.inner.call(request).await
    }

    /// Run [`call`](Self::call) as a tracked background task
    pub fn spawn_call(&self, request: ServiceRequest) -> Result<JoinHandle<Result<Value>>> {
        let inner = Arc::clone(&self.inner);
        let label = format!("{}:{}", inner.kind, request.operation);
        self.resources
            .track(label, async move { inner.call(&request).await })
    }

    /// Cancel in-flight calls and release the session
    pub async fn close(&self) -> CloseReport {
        self.resources.close().await
    }
}
