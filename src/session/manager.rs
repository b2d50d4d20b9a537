//! Challenge-response session manager.
//!
//! # State Transitions
//! ```text
//! Unauthenticated/Expired → Challenging: authenticate() or first authenticated call
//! Challenging → Authenticated: signed challenge accepted
//! Challenging → Unauthenticated: rejection, missing wallet, transport failure
//! Authenticated → Expired: now >= expiry - margin (lazy or watcher), or backend 401
//! any → Unauthenticated: logout()
//! ```
//!
//! # Design Decisions
//! - Concurrent callers share one in-flight challenge (a shared future)
//! - logout() bumps a generation so a challenge started before it is discarded
//! - Listeners run outside the state lock, in registration order; a
//!   reentrant publish lock held across mutate-then-notify keeps event order
//!   equal to transition order across threads

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{ClientError, ClientResult};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;
use crate::session::state::{SessionEvent, SessionState};
use crate::transport::{endpoints, Transport, TransportRequest, TransportResponse};
use crate::wallet::WalletProvider;

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
type ChallengeFuture = Shared<BoxFuture<'static, ClientResult<String>>>;

/// Handle returned by [`SessionManager::on_state_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Deserialize)]
struct ChallengeGrant {
    challenge: String,
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    token: String,
    #[serde(default, alias = "expiresAt")]
    expires_at: Option<u64>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    wallet: Option<Arc<dyn WalletProvider>>,
    config: SessionConfig,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    publish_order: ReentrantMutex<()>,
    /// Bumped by logout(); in-flight challenges from older generations are void.
    generation: AtomicU64,
    inflight: Mutex<Option<(u64, ChallengeFuture)>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    challenges_issued: AtomicU64,
}

/// Owns the session state for one client.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.inner.state.lock().phase())
            .field("has_wallet", &self.inner.wallet.is_some())
            .finish()
    }
}

impl SessionManager {
    /// Build a manager. A configured `session_token` starts it authenticated.
    pub fn new(
        transport: Arc<dyn Transport>,
        wallet: Option<Arc<dyn WalletProvider>>,
        config: SessionConfig,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let initial = match &config.session_token {
            Some(token) => SessionState::Authenticated {
                token: token.clone(),
                expires_at_ms: config.session_token_expires_at_ms,
            },
            None => SessionState::Unauthenticated,
        };

        Self {
            inner: Arc::new(SessionInner {
                transport,
                wallet,
                config,
                timeout,
                clock,
                state: Mutex::new(initial),
                publish_order: ReentrantMutex::new(()),
                generation: AtomicU64::new(0),
                inflight: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                challenges_issued: AtomicU64::new(0),
            }),
        }
    }

    /// Current state, after applying any due expiry.
    pub fn state(&self) -> SessionState {
        self.check_expiry();
        self.inner.state.lock().clone()
    }

    pub fn snapshot(&self) -> SessionEvent {
        self.state().event()
    }

    /// Challenges started over this manager's lifetime.
    pub fn challenges_issued(&self) -> u64 {
        self.inner.challenges_issued.load(Ordering::SeqCst)
    }

    /// Ensure the session is authenticated. Idempotent while the token is
    /// valid; concurrent callers share one challenge.
    pub async fn authenticate(&self) -> ClientResult<SessionEvent> {
        self.token().await?;
        Ok(self.inner.state.lock().event())
    }

    /// A valid session token, authenticating first if needed.
    pub async fn token(&self) -> ClientResult<String> {
        if let Some(token) = self.current_token() {
            return Ok(token);
        }
        let challenge = {
            let mut inflight = self.inner.inflight.lock();
            // No transition here: listeners must not run under this lock.
            if let Some(token) = self.inner.valid_token() {
                return Ok(token);
            }
            match inflight.as_ref() {
                Some((_, fut)) => fut.clone(),
                None => {
                    let generation = self.inner.generation.load(Ordering::SeqCst);
                    let fut = SessionInner::challenge(self.inner.clone(), generation)
                        .boxed()
                        .shared();
                    *inflight = Some((generation, fut.clone()));
                    fut
                }
            }
        };
        challenge.await
    }

    /// Token held right now, if authenticated and not expired.
    pub fn current_token(&self) -> Option<String> {
        self.check_expiry();
        match &*self.inner.state.lock() {
            SessionState::Authenticated { token, .. } => Some(token.clone()),
            _ => None,
        }
    }

    /// Transition `Authenticated → Expired` if the token is within the safety
    /// margin of its expiry. Returns true if a transition happened.
    pub fn check_expiry(&self) -> bool {
        let now = self.inner.clock.now_ms();
        let margin = self.inner.config.expiry_margin_ms;
        let expired = self.inner.transition(|state| match state {
            SessionState::Authenticated {
                expires_at_ms: Some(expires_at),
                ..
            } if now.saturating_add(margin) >= *expires_at => Some(SessionState::Expired),
            _ => None,
        });
        if expired {
            tracing::info!("Session token expired");
        }
        expired
    }

    /// The backend rejected `token`; expire it unless it was already replaced.
    pub fn mark_rejected(&self, token: &str) {
        let rejected = self.inner.transition(|state| match state {
            SessionState::Authenticated { token: current, .. } if current == token => {
                Some(SessionState::Expired)
            }
            _ => None,
        });
        if rejected {
            tracing::warn!("Backend rejected session token, will re-authenticate");
        }
    }

    /// Drop the local token. The backend is not told.
    pub fn logout(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.inflight.lock() = None;
        tracing::info!("Session logged out");
        self.inner.set_state(SessionState::Unauthenticated);
    }

    /// Register a listener; it sees every subsequent transition in order.
    pub fn on_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Periodically expire the token until shutdown. `None` when disabled.
    pub fn spawn_expiry_watcher(&self, shutdown: Arc<Shutdown>) -> Option<JoinHandle<()>> {
        if self.inner.config.expiry_check_interval_ms == 0 {
            return None;
        }
        let manager = self.clone();
        let period = Duration::from_millis(self.inner.config.expiry_check_interval_ms);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.check_expiry();
                    }
                    _ = shutdown.wait() => {
                        tracing::debug!("Session expiry watcher stopping");
                        break;
                    }
                }
            }
        }))
    }
}

impl SessionInner {
    fn valid_token(&self) -> Option<String> {
        let now = self.clock.now_ms();
        match &*self.state.lock() {
            SessionState::Authenticated { token, expires_at_ms }
                if expires_at_ms.map_or(true, |exp| now.saturating_add(self.config.expiry_margin_ms) < exp) =>
            {
                Some(token.clone())
            }
            _ => None,
        }
    }

    async fn challenge(inner: Arc<SessionInner>, generation: u64) -> ClientResult<String> {
        let result = inner.run_challenge(generation).await;

        let mut inflight = inner.inflight.lock();
        if matches!(inflight.as_ref(), Some((g, _)) if *g == generation) {
            *inflight = None;
        }
        result
    }

    async fn run_challenge(&self, generation: u64) -> ClientResult<String> {
        let wallet = match &self.wallet {
            Some(wallet) => wallet.clone(),
            None => {
                self.set_state(SessionState::Unauthenticated);
                return Err(ClientError::Authentication("no wallet available".to_string()));
            }
        };

        self.set_state(SessionState::Challenging);
        self.challenges_issued.fetch_add(1, Ordering::SeqCst);
        let address = wallet.public_address();
        tracing::debug!(address = %address, "Requesting authentication challenge");

        let outcome = async {
            let response = self
                .send(TransportRequest::post(
                    endpoints::AUTH_CHALLENGE,
                    json!({ "address": address }),
                ))
                .await?;
            let grant: ChallengeGrant = parse_body(response, "challenge")?;

            let signature = wallet.sign_message(grant.challenge.as_bytes()).await?;

            let response = self
                .send(TransportRequest::post(
                    endpoints::AUTH_VERIFY,
                    json!({
                        "address": address,
                        "challenge": grant.challenge,
                        "signature": signature,
                    }),
                ))
                .await?;
            parse_body::<TokenGrant>(response, "token")
        }
        .await;

        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(ClientError::Authentication(
                "session logged out during challenge".to_string(),
            ));
        }

        match outcome {
            Ok(grant) => {
                let expires_at_ms = Some(
                    grant
                        .expires_at
                        .unwrap_or_else(|| self.clock.now_ms().saturating_add(self.config.default_token_ttl_ms)),
                );
                tracing::info!(expires_at_ms = ?expires_at_ms, "Session authenticated");
                self.set_state(SessionState::Authenticated {
                    token: grant.token.clone(),
                    expires_at_ms,
                });
                Ok(grant.token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Authentication failed");
                self.set_state(SessionState::Unauthenticated);
                Err(e)
            }
        }
    }

    /// Auth exchanges: 4xx means rejection, anything else keeps its class.
    async fn send(&self, request: TransportRequest) -> ClientResult<TransportResponse> {
        let response = with_timeout(self.timeout, self.transport.send(request)).await?;
        match response.status {
            200..=299 => Ok(response),
            400..=499 if response.status != 429 => Err(ClientError::Authentication(format!(
                "challenge rejected with status {}",
                response.status
            ))),
            _ => response.into_result(),
        }
    }

    fn set_state(&self, next: SessionState) {
        self.transition(|_| Some(next));
    }

    /// Apply `update` and notify listeners before any other transition can
    /// publish. Returns false when the state is unchanged.
    fn transition<F>(&self, update: F) -> bool
    where
        F: FnOnce(&SessionState) -> Option<SessionState>,
    {
        let _order = self.publish_order.lock();
        let next = {
            let mut state = self.state.lock();
            match update(&state) {
                Some(next) if next != *state => {
                    *state = next.clone();
                    next
                }
                _ => return false,
            }
        };
        self.publish(&next);
        true
    }

    fn publish(&self, state: &SessionState) {
        let event = state.event();
        metrics::record_session_transition(event.state.as_str());
        let listeners: Vec<Listener> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(response: TransportResponse, what: &str) -> ClientResult<T> {
    serde_json::from_value(response.body)
        .map_err(|e| ClientError::Authentication(format!("malformed {} response: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicU32;

    const NOW: u64 = 1_700_000_000_000;

    #[derive(Debug)]
    struct AuthBackend {
        clock: Arc<ManualClock>,
        challenges: AtomicU32,
        verifications: AtomicU32,
        delay: Duration,
        reject: bool,
    }

    impl AuthBackend {
        fn new(clock: Arc<ManualClock>) -> Self {
            Self {
                clock,
                challenges: AtomicU32::new(0),
                verifications: AtomicU32::new(0),
                delay: Duration::ZERO,
                reject: false,
            }
        }
    }

    #[async_trait]
    impl Transport for AuthBackend {
        async fn send(&self, request: TransportRequest) -> ClientResult<TransportResponse> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match request.endpoint.as_str() {
                endpoints::AUTH_CHALLENGE => {
                    let n = self.challenges.fetch_add(1, Ordering::SeqCst);
                    Ok(TransportResponse::new(200, json!({ "challenge": format!("nonce-{n}") })))
                }
                endpoints::AUTH_VERIFY => {
                    let n = self.verifications.fetch_add(1, Ordering::SeqCst);
                    if self.reject {
                        return Ok(TransportResponse::new(401, json!({ "error": "bad signature" })));
                    }
                    Ok(TransportResponse::new(
                        200,
                        json!({ "token": format!("token-{n}"), "expires_at": self.clock.now_ms() + 120_000 }),
                    ))
                }
                other => Ok(TransportResponse::new(404, Value::String(other.to_string()))),
            }
        }
    }

    #[derive(Debug)]
    struct StaticWallet;

    #[async_trait]
    impl WalletProvider for StaticWallet {
        fn public_address(&self) -> String {
            "0xabc".to_string()
        }

        async fn sign_message(&self, challenge: &[u8]) -> ClientResult<String> {
            Ok(format!("signed:{}", String::from_utf8_lossy(challenge)))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            expiry_margin_ms: 60_000,
            expiry_check_interval_ms: 0,
            ..SessionConfig::default()
        }
    }

    fn manager(backend: Arc<AuthBackend>, clock: Arc<ManualClock>) -> SessionManager {
        SessionManager::new(backend, Some(Arc::new(StaticWallet)), config(), Duration::from_secs(5), clock)
    }

    #[tokio::test]
    async fn test_authenticate_is_idempotent() {
        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(AuthBackend::new(clock.clone()));
        let session = manager(backend.clone(), clock);

        let event = session.authenticate().await.unwrap();
        assert!(event.authenticated);
        assert_eq!(event.expires_at_ms, Some(NOW + 120_000));

        session.authenticate().await.unwrap();
        assert_eq!(backend.challenges.load(Ordering::SeqCst), 1);
        assert_eq!(session.current_token().as_deref(), Some("token-0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_authenticate_coalesces() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut backend = AuthBackend::new(clock.clone());
        backend.delay = Duration::from_millis(50);
        let backend = Arc::new(backend);
        let session = manager(backend.clone(), clock);

        let other = session.clone();
        let (a, b) = tokio::join!(session.authenticate(), other.authenticate());

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.challenges.load(Ordering::SeqCst), 1);
        assert_eq!(session.challenges_issued(), 1);
    }

    #[tokio::test]
    async fn test_expiry_triggers_single_reauthentication() {
        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(AuthBackend::new(clock.clone()));
        let session = manager(backend.clone(), clock.clone());

        assert_eq!(session.token().await.unwrap(), "token-0");

        // Past expiry - margin (NOW + 120s - 60s).
        clock.advance(61_000);
        assert_eq!(session.state(), SessionState::Expired);

        assert_eq!(session.token().await.unwrap(), "token-1");
        assert_eq!(session.token().await.unwrap(), "token-1");
        assert_eq!(backend.challenges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_returns_to_unauthenticated() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut backend = AuthBackend::new(clock.clone());
        backend.reject = true;
        let session = manager(Arc::new(backend), clock);

        let err = session.authenticate().await.unwrap_err();
        assert!(matches!(err, ClientError::Authentication(_)));
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_missing_wallet() {
        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(AuthBackend::new(clock.clone()));
        let session = SessionManager::new(backend.clone(), None, config(), Duration::from_secs(1), clock);

        let err = session.authenticate().await.unwrap_err();
        assert_eq!(err.to_string(), "authentication failed: no wallet available");
        assert_eq!(backend.challenges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_listeners_see_transitions_in_order() {
        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(AuthBackend::new(clock.clone()));
        let session = manager(backend, clock);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = session.on_state_change(move |event| sink.lock().push(event.state));

        session.authenticate().await.unwrap();
        session.logout();

        use crate::session::state::SessionPhase::*;
        assert_eq!(*seen.lock(), vec![Challenging, Authenticated, Unauthenticated]);

        assert!(session.remove_listener(id));
        session.authenticate().await.unwrap();
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_seeded_token_and_rejection() {
        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(AuthBackend::new(clock.clone()));
        let mut cfg = config();
        cfg.session_token = Some("seeded".to_string());
        let session = SessionManager::new(backend.clone(), Some(Arc::new(StaticWallet)), cfg, Duration::from_secs(1), clock);

        assert_eq!(session.token().await.unwrap(), "seeded");
        assert_eq!(session.snapshot().expires_at_ms, None);

        session.mark_rejected("some-other-token");
        assert!(session.state().is_authenticated());

        session.mark_rejected("seeded");
        assert_eq!(session.state(), SessionState::Expired);
        assert_eq!(session.token().await.unwrap(), "token-0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_discards_inflight_challenge() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut backend = AuthBackend::new(clock.clone());
        backend.delay = Duration::from_millis(100);
        let session = manager(Arc::new(backend), clock);

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.authenticate().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.state(), SessionState::Challenging);

        session.logout();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ClientError::Authentication(_))));
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_publish_in_order() {
        use crate::session::state::SessionPhase::{self, *};

        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(AuthBackend::new(clock.clone()));
        let session = manager(backend, clock);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on_state_change(move |event| sink.lock().push(event.state));

        let mut workers = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            workers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let token = session.token().await.unwrap();
                    session.mark_rejected(&token);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }

        let legal = |from: SessionPhase, to: SessionPhase| {
            matches!(
                (from, to),
                (Unauthenticated | Expired, Challenging)
                    | (Challenging, Authenticated | Unauthenticated)
                    | (Authenticated, Expired)
            )
        };
        let seen = seen.lock();
        assert!(!seen.is_empty());
        assert_eq!(seen[0], Challenging);
        for pair in seen.windows(2) {
            assert!(legal(pair[0], pair[1]), "out of order: {:?} -> {:?}", pair[0], pair[1]);
        }
        assert_eq!(*seen.last().unwrap(), session.inner.state.lock().phase());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_watcher() {
        let clock = Arc::new(ManualClock::new(NOW));
        let backend = Arc::new(AuthBackend::new(clock.clone()));
        let mut cfg = config();
        cfg.expiry_check_interval_ms = 1_000;
        let session = SessionManager::new(backend, Some(Arc::new(StaticWallet)), cfg, Duration::from_secs(1), clock.clone());
        session.authenticate().await.unwrap();

        let shutdown = Arc::new(Shutdown::new());
        let handle = session.spawn_expiry_watcher(shutdown.clone()).unwrap();

        clock.advance(90_000);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(session.inner.state.lock().phase(), crate::session::state::SessionPhase::Expired);

        shutdown.trigger();
        handle.await.unwrap();
    }
}
