//! Call orchestration.
//!
//! # Responsibilities
//! - Run every backend call through breaker, queue, session and transport
//! - Retry transient failures under the current [`RetryPolicy`]
//! - Validate contract responses and keep the content cache coherent
//! - Own the background tasks and tear them down on `destroy()`
//!
//! # Attempt Pipeline
//! ```text
//! breaker.try_acquire ──open──► CircuitOpen
//!     │
//! queue.submit(job) ──full──► QueueFull
//!     │  job: session.token → transport.send (timeout) → 401? re-auth once
//!     ▼
//! response.into_result → permit.record
//!     │ transient: RetryPolicy delay, cancellable by shutdown
//!     ▼
//! schema validation (contract) / cache update (content)
//! ```

use arc_swap::ArcSwap;
use futures_util::future::{join_all, FutureExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::cache::ContentCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{panic_message, ClientError, ClientResult};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::orchestrator::types::{CallOutcome, ContentOptions, ContractCall, StatusSnapshot};
use crate::queue::{Job, RateLimitedQueue, Request};
use crate::resilience::retries::sleep_or_shutdown;
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{CircuitBreakerRegistry, RetryContext, RetryPolicy};
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::session::{ListenerId, SessionEvent, SessionManager};
use crate::transport::{endpoints, ListMode, Transport, TransportRequest, TransportResponse};
use crate::wallet::WalletProvider;

/// Breaker key shared by all content operations.
pub const CONTENT_CIRCUIT: &str = "content";

type RequestBuilder = Arc<dyn Fn() -> TransportRequest + Send + Sync>;

/// Settings swapped atomically on hot reload.
#[derive(Debug)]
struct RuntimeSettings {
    retry: RetryPolicy,
    timeout: Duration,
}

impl RuntimeSettings {
    fn from_config(config: &ClientConfig) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry.clone()),
            timeout: config.timeout(),
        }
    }
}

/// Resilient client for the contract/content API.
pub struct CallOrchestrator {
    transport: Arc<dyn Transport>,
    session: SessionManager,
    queue: RateLimitedQueue,
    breakers: CircuitBreakerRegistry,
    schemas: SchemaRegistry,
    cache: Option<ContentCache>,
    settings: ArcSwap<RuntimeSettings>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<Shutdown>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CallOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOrchestrator")
            .field("session", &self.session)
            .field("queue", &self.queue)
            .field("cache", &self.cache)
            .field("shut_down", &self.shutdown.is_triggered())
            .finish()
    }
}

impl CallOrchestrator {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        wallet: Option<Arc<dyn WalletProvider>>,
    ) -> ClientResult<Self> {
        Self::with_clock(config, transport, wallet, Arc::new(SystemClock))
    }

    /// Build with an explicit wall clock (session expiry, cache timestamps).
    pub fn with_clock(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        wallet: Option<Arc<dyn WalletProvider>>,
        clock: Arc<dyn Clock>,
    ) -> ClientResult<Self> {
        let schemas = SchemaRegistry::new();
        for (name, definition) in &config.schemas {
            schemas.register(name.clone(), definition)?;
        }

        let cache = if config.cache.enabled {
            let cache = match &config.cache.persistence_path {
                Some(path) => ContentCache::load_from_file(path, clock.clone()).map_err(|e| {
                    ClientError::Config(format!("failed to load cache snapshot {}: {}", path, e))
                })?,
                None => ContentCache::with_clock(None, clock.clone()),
            };
            Some(cache)
        } else {
            None
        };

        let session = SessionManager::new(
            transport.clone(),
            wallet,
            config.session.clone(),
            config.timeout(),
            clock.clone(),
        );

        tracing::info!(
            schemas = schemas.len(),
            cache_enabled = cache.is_some(),
            authenticated = session.snapshot().authenticated,
            "Call orchestrator initialized"
        );

        Ok(Self {
            transport,
            session,
            queue: RateLimitedQueue::new(config.rate_limit.clone()),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            schemas,
            cache,
            settings: ArcSwap::from_pointee(RuntimeSettings::from_config(&config)),
            clock,
            shutdown: Arc::new(Shutdown::new()),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the queue dispatcher and session expiry watcher. Called lazily by
    /// the first call; must run inside a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock();
        tasks.push(self.queue.start(self.shutdown.clone()));
        if let Some(watcher) = self.session.spawn_expiry_watcher(self.shutdown.clone()) {
            tasks.push(watcher);
        }
        tracing::debug!("Background tasks started");
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// `None` when caching is disabled.
    pub fn cache(&self) -> Option<&ContentCache> {
        self.cache.as_ref()
    }

    /// Invoke a contract operation, validating the response if a schema is named.
    ///
    /// Dropping the returned future cancels the call: a queued attempt is
    /// withdrawn before dispatch and a running one is aborted.
    pub async fn call_contract(&self, call: ContractCall) -> ClientResult<Value> {
        let start = Instant::now();
        let result = self.run_contract(call).await;
        metrics::record_call("contract", outcome_label(&result), start);
        result
    }

    /// [`call_contract`](Self::call_contract) that never fails or panics
    /// outward. Every error kind, local rejections included, is returned as a
    /// tagged failure.
    pub async fn safe_call(&self, call: ContractCall) -> CallOutcome {
        match AssertUnwindSafe(self.call_contract(call)).catch_unwind().await {
            Ok(result) => CallOutcome::from(result),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(message = %message, "Panic during orchestrated call");
                CallOutcome::from(Err(ClientError::Internal(message)))
            }
        }
    }

    /// Issue every call concurrently; results are positional and independent.
    pub async fn batch_call_contracts(&self, calls: Vec<ContractCall>) -> Vec<ClientResult<Value>> {
        join_all(calls.into_iter().map(|call| self.call_contract(call))).await
    }

    /// Read content, revalidating any cached copy with its ETag.
    pub async fn get_content(&self, path: &str, options: ContentOptions) -> ClientResult<Value> {
        let start = Instant::now();
        let result = self.run_get_content(path, options).await;
        metrics::record_call("content_get", outcome_label(&result), start);
        result
    }

    /// Write content. The cached copy is dropped before sending and after success.
    pub async fn update_content(&self, path: &str, payload: Value) -> ClientResult<Value> {
        let start = Instant::now();
        self.invalidate_cached(path);

        let endpoint = endpoints::content(path);
        let body = json!({ "payload": payload });
        let request = self.request(CONTENT_CIRCUIT, "put", json!({ "path": path }), None);
        let result = self
            .execute(CONTENT_CIRCUIT, request, Arc::new(move || {
                TransportRequest::put(endpoint.clone(), body.clone())
            }))
            .await
            .map(|response| {
                self.invalidate_cached(path);
                response.body
            });

        metrics::record_call("content_put", outcome_label(&result), start);
        result
    }

    /// List a content directory. Listings are never cached.
    pub async fn list_content(&self, path: &str, mode: ListMode) -> ClientResult<Value> {
        let start = Instant::now();
        let endpoint = endpoints::content_listing(path, mode);
        let request = self.request(
            CONTENT_CIRCUIT,
            "list",
            json!({ "path": path, "mode": mode.as_str() }),
            None,
        );
        let result = self
            .execute(CONTENT_CIRCUIT, request, Arc::new(move || TransportRequest::get(endpoint.clone())))
            .await
            .map(|response| response.body);

        metrics::record_call("content_list", outcome_label(&result), start);
        result
    }

    pub async fn authenticate(&self) -> ClientResult<SessionEvent> {
        if self.shutdown.is_triggered() {
            return Err(ClientError::Shutdown);
        }
        self.session.authenticate().await
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    pub fn on_session_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.session.on_state_change(listener)
    }

    pub fn remove_session_listener(&self, id: ListenerId) -> bool {
        self.session.remove_listener(id)
    }

    /// Register or replace a response schema.
    pub fn register_schema(&self, name: impl Into<String>, definition: &SchemaDefinition) -> ClientResult<()> {
        self.schemas.register(name, definition)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            queue_length: self.queue.len(),
            in_flight: self.queue.in_flight(),
            pause_remaining_ms: self.queue.pause_remaining().map(|d| d.as_millis() as u64),
            circuits: self.breakers.states(),
            session: self.session.snapshot(),
            cached_entries: self.cache.as_ref().map_or(0, ContentCache::len),
            registered_schemas: self.schemas.len(),
            shut_down: self.shutdown.is_triggered(),
        }
    }

    /// Apply a reloaded configuration. Retry policy and timeout take effect
    /// for the next attempt; schemas are registered or replaced. Queue,
    /// breaker and session settings are fixed at construction.
    pub fn apply_config(&self, config: &ClientConfig) -> ClientResult<()> {
        for (name, definition) in &config.schemas {
            self.schemas.register(name.clone(), definition)?;
        }
        self.settings.store(Arc::new(RuntimeSettings::from_config(config)));
        tracing::info!(
            max_retries = config.retry.max_retries,
            timeout_ms = config.timeout_ms,
            "Runtime settings reloaded"
        );
        Ok(())
    }

    /// Stop background work. Pending and in-flight calls fail with
    /// `Shutdown`, retry sleeps are interrupted, the cache is persisted.
    pub async fn destroy(&self) {
        self.shutdown.trigger();
        // Tasks never started still have to unblock anything already queued.
        self.start();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save_to_file() {
                tracing::warn!(error = %e, "Failed to persist content cache");
            }
        }
        tracing::info!("Call orchestrator destroyed");
    }

    async fn run_contract(&self, call: ContractCall) -> ClientResult<Value> {
        if let Some(schema) = &call.schema {
            if !self.schemas.contains(schema) {
                return Err(ClientError::UnknownSchema(schema.clone()));
            }
        }

        let endpoint = endpoints::contract_call(&call.target);
        let body = json!({ "operation": call.operation, "params": call.params });
        let mut request = self.request(&call.target, &call.operation, call.params.clone(), call.priority);
        request.idempotency_key = call.idempotency_key.clone();

        let response = self
            .execute(&call.target, request, Arc::new(move || {
                TransportRequest::post(endpoint.clone(), body.clone())
            }))
            .await?;

        if let Some(schema) = &call.schema {
            self.schemas.validate(&response.body, schema)?;
        }
        Ok(response.body)
    }

    async fn run_get_content(&self, path: &str, options: ContentOptions) -> ClientResult<Value> {
        let cached = self.cache.as_ref().and_then(|cache| cache.get(path));

        if let Some(entry) = &cached {
            if options.allow_stale {
                metrics::record_cache_event("hit");
                tracing::debug!(path = %path, "Serving cached content without revalidation");
                return Ok(entry.payload.clone());
            }
        }

        let response = self
            .fetch_content(path, cached.as_ref().map(|e| e.etag.clone()), options.priority)
            .await?;

        if response.is_not_modified() {
            let still_cached = self.cache.as_ref().is_some_and(|cache| cache.touch(path));
            if let (Some(entry), true) = (cached, still_cached) {
                metrics::record_cache_event("revalidated");
                return Ok(entry.payload);
            }
            // Entry was invalidated while the conditional read was in flight.
            let response = self.fetch_content(path, None, options.priority).await?;
            return self.store_content(path, response);
        }

        self.store_content(path, response)
    }

    async fn fetch_content(
        &self,
        path: &str,
        etag: Option<String>,
        priority: Option<i32>,
    ) -> ClientResult<TransportResponse> {
        let endpoint = endpoints::content(path);
        let request = self.request(CONTENT_CIRCUIT, "get", json!({ "path": path }), priority);
        self.execute(CONTENT_CIRCUIT, request, Arc::new(move || {
            let request = TransportRequest::get(endpoint.clone());
            match &etag {
                Some(tag) => request.with_header("if-none-match", tag.clone()),
                None => request,
            }
        }))
        .await
    }

    fn store_content(&self, path: &str, response: TransportResponse) -> ClientResult<Value> {
        if response.is_not_modified() {
            return Err(ClientError::Internal(format!(
                "backend answered 304 for uncached path '{}'",
                path
            )));
        }
        if let Some(cache) = &self.cache {
            metrics::record_cache_event("miss");
            match response.etag() {
                Some(etag) => cache.put(path, response.body.clone(), etag),
                None => {
                    cache.invalidate(path);
                }
            }
        }
        Ok(response.body)
    }

    fn invalidate_cached(&self, path: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(path);
        }
    }

    fn request(&self, target: &str, operation: &str, params: Value, priority: Option<i32>) -> Request {
        let request = Request::new(target, operation, params, self.clock.now_ms());
        match priority {
            Some(priority) => request.with_priority(priority),
            None => request,
        }
    }

    /// Run one logical call with retries. `build` produces a fresh transport
    /// request for every attempt.
    async fn execute(
        &self,
        circuit: &str,
        request: Request,
        build: RequestBuilder,
    ) -> ClientResult<TransportResponse> {
        if self.shutdown.is_triggered() {
            return Err(ClientError::Shutdown);
        }
        self.start();

        let breaker = self.breakers.get(circuit);
        let mut ctx = RetryContext::new();

        loop {
            let attempt = ctx.begin_attempt();
            let settings = self.settings.load_full();

            let permit = breaker.try_acquire()?;
            tracing::debug!(
                request_id = %request.id,
                target = %request.target,
                operation = %request.operation,
                attempt,
                trial = permit.is_trial(),
                "Submitting attempt"
            );

            let job = self.attempt_job(build.clone(), settings.timeout);
            let result = self
                .queue
                .submit(request.clone(), attempt, job)
                .await
                .and_then(TransportResponse::into_result);

            permit.record(&result);

            let error = match result {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let Some(delay) = settings.retry.next_delay(&mut ctx, &error) else {
                tracing::debug!(
                    request_id = %request.id,
                    attempt,
                    error = %error,
                    "Call failed"
                );
                return Err(error);
            };

            metrics::record_retry(error.kind().as_str());
            tracing::warn!(
                request_id = %request.id,
                target = %request.target,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            sleep_or_shutdown(delay, &self.shutdown).await?;
        }
    }

    /// One transport attempt: attach the session token, send with a deadline,
    /// and re-authenticate once if the backend rejects the token.
    fn attempt_job(&self, build: RequestBuilder, timeout: Duration) -> Job {
        let transport = self.transport.clone();
        let session = self.session.clone();

        async move {
            let token = session.token().await?;
            let response = send_authorized(&*transport, build(), &token, timeout).await?;
            if !response.is_unauthorized() {
                return Ok(response);
            }

            session.mark_rejected(&token);
            let token = session.token().await?;
            send_authorized(&*transport, build(), &token, timeout).await
        }
        .boxed()
    }
}

async fn send_authorized(
    transport: &dyn Transport,
    request: TransportRequest,
    token: &str,
    timeout: Duration,
) -> ClientResult<TransportResponse> {
    let request = request.with_header("authorization", format!("Bearer {}", token));
    with_timeout(timeout, transport.send(request)).await
}

fn outcome_label<T>(result: &ClientResult<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.kind().as_str(),
    }
}
