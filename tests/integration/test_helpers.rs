// tests/integration/test_helpers.rs

//! Test helpers: a throwaway upstream server and a fully wired proxy
//! instance listening on an ephemeral port.

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Response as HttpResponse};
use axum::Router;
use citrine::config::Config;
use citrine::core::ProxyError;
use citrine::core::cache::CacheStore;
use citrine::core::invalidate::AdminInvalidator;
use citrine::core::keys::{CreateKeyRequest, KeyRegistry};
use citrine::core::ratelimit::RateLimiter;
use citrine::core::store::StateStore;
use citrine::core::store::memory::MemoryStore;
use citrine::core::upstream::UpstreamClient;
use citrine::server::{AppState, routes};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub const ADMIN_TOKEN: &str = "it-admin-token";

/// A local stand-in for the real upstream API. Counts requests and records
/// the headers of the most recent one.
pub struct TestUpstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    last_headers: Arc<Mutex<Option<HeaderMap>>>,
}

impl TestUpstream {
    pub async fn spawn(cache_control: Option<&'static str>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let last_headers: Arc<Mutex<Option<HeaderMap>>> = Arc::new(Mutex::new(None));

        let hits_handle = hits.clone();
        let headers_handle = last_headers.clone();
        let app = Router::new().fallback(
            move |method: Method, headers: HeaderMap, body: Bytes| {
                let hits = hits_handle.clone();
                let last_headers = headers_handle.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    *last_headers.lock().await = Some(headers);

                    // POST bodies echo back; GETs serve a fixed payload.
                    let payload = if method == Method::POST && !body.is_empty() {
                        String::from_utf8_lossy(&body).to_string()
                    } else {
                        "{\"ok\":true}".to_string()
                    };

                    let mut builder = HttpResponse::builder()
                        .status(200)
                        .header("content-type", "application/json")
                        .header("x-upstream-internal", "not-for-clients");
                    if let Some(cc) = cache_control {
                        builder = builder.header("cache-control", cc);
                    }
                    builder.body(Body::from(payload)).unwrap()
                }
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            hits,
            last_headers,
        }
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub async fn last_headers(&self) -> HeaderMap {
        self.last_headers
            .lock()
            .await
            .clone()
            .expect("upstream was never called")
    }
}

/// A complete proxy wired against [`TestUpstream`] over an in-memory state
/// store, served on an ephemeral port.
pub struct TestProxy {
    pub base: String,
    pub state: Arc<AppState>,
    pub upstream: TestUpstream,
    pub client: reqwest::Client,
}

impl TestProxy {
    pub async fn spawn(
        cache_control: Option<&'static str>,
        mutate: impl FnOnce(&mut Config),
    ) -> Self {
        Self::spawn_with_store(cache_control, mutate, Arc::new(MemoryStore::new())).await
    }

    pub async fn spawn_with_store(
        cache_control: Option<&'static str>,
        mutate: impl FnOnce(&mut Config),
        store: Arc<dyn StateStore>,
    ) -> Self {
        let upstream = TestUpstream::spawn(cache_control).await;

        let mut config = Config::default();
        config.upstream.base_url = format!("http://{}", upstream.addr);
        config.upstream.api_key = "test-key".to_string();
        config.upstream.timeout_ms = 2000;
        config.admin.token = Some(ADMIN_TOKEN.to_string());
        mutate(&mut config);

        let upstream_client = Arc::new(
            UpstreamClient::new(
                &config.upstream.base_url,
                config.upstream.timeout_ms,
                config.upstream.retries,
            )
            .unwrap(),
        );
        let cache = Arc::new(CacheStore::new(
            store.clone(),
            config.cache.ttl_default,
            config.cache.stale_ttl,
        ));
        let registry = Arc::new(KeyRegistry::new(
            store.clone(),
            &config.api_keys.redis_prefix,
        ));
        let limiter = Arc::new(RateLimiter::new(
            store.clone(),
            &config.api_keys.redis_prefix,
            config.api_keys.rate_limit_window_seconds,
            config.api_keys.rate_limit_max_requests,
        ));
        let invalidator = Arc::new(AdminInvalidator::new(store.clone()));
        let state = Arc::new(AppState {
            config: Arc::new(config),
            store,
            cache,
            registry,
            limiter,
            upstream: upstream_client,
            invalidator,
        });

        let app = routes::router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            state,
            upstream,
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Issues a valid client key straight through the registry.
    pub async fn issue_key(&self, owner: &str) -> String {
        let (raw_key, _) = self
            .state
            .registry
            .create(CreateKeyRequest {
                owner: owner.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        raw_key
    }
}

/// Rate-limit counters fail, everything else works. Exercises the paths
/// where the limiter backend errors out from under a live registry and
/// cache.
pub struct BrokenCounterStore {
    inner: MemoryStore,
}

impl BrokenCounterStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl StateStore for BrokenCounterStore {
    async fn ping(&self) -> Result<(), ProxyError> {
        self.inner.ping().await
    }
    async fn get(&self, key: &str) -> Result<Option<String>, ProxyError> {
        self.inner.get(key).await
    }
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), ProxyError> {
        self.inner.set(key, value, ttl).await
    }
    async fn del(&self, keys: &[String]) -> Result<u64, ProxyError> {
        self.inner.del(keys).await
    }
    async fn exists(&self, key: &str) -> Result<bool, ProxyError> {
        self.inner.exists(key).await
    }
    async fn incr(&self, _key: &str) -> Result<i64, ProxyError> {
        Err(ProxyError::Store("counters offline".to_string()))
    }
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ProxyError> {
        self.inner.expire(key, ttl).await
    }
    async fn sadd(&self, key: &str, member: &str) -> Result<(), ProxyError> {
        self.inner.sadd(key, member).await
    }
    async fn srem(&self, key: &str, member: &str) -> Result<(), ProxyError> {
        self.inner.srem(key, member).await
    }
    async fn smembers(&self, key: &str) -> Result<Vec<String>, ProxyError> {
        self.inner.smembers(key).await
    }
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), ProxyError> {
        self.inner.scan(cursor, pattern, count).await
    }
}
