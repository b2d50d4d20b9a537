//! Session state and the events published on every transition.

use serde::Serialize;
use std::fmt;

/// Authentication state owned by one [`SessionManager`](super::SessionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// Challenge issued, waiting on signature and verification.
    Challenging,
    Authenticated {
        token: String,
        /// Backend-issued expiry (epoch ms). `None` never expires locally.
        expires_at_ms: Option<u64>,
    },
    Expired,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Unauthenticated => SessionPhase::Unauthenticated,
            SessionState::Challenging => SessionPhase::Challenging,
            SessionState::Authenticated { .. } => SessionPhase::Authenticated,
            SessionState::Expired => SessionPhase::Expired,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    pub fn expires_at_ms(&self) -> Option<u64> {
        match self {
            SessionState::Authenticated { expires_at_ms, .. } => *expires_at_ms,
            _ => None,
        }
    }

    /// Event describing this state, without the token.
    pub fn event(&self) -> SessionEvent {
        SessionEvent {
            state: self.phase(),
            authenticated: self.is_authenticated(),
            expires_at_ms: self.expires_at_ms(),
        }
    }
}

/// Token-free name of a session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unauthenticated,
    Challenging,
    Authenticated,
    Expired,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Unauthenticated => "unauthenticated",
            SessionPhase::Challenging => "challenging",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published to listeners on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub state: SessionPhase,
    pub authenticated: bool,
    pub expires_at_ms: Option<u64>,
}
