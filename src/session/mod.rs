//! Authentication session subsystem.
//!
//! # Data Flow
//! ```text
//! authenticated call
//!     → manager.rs token() (lazy expiry check)
//!         valid → attach Bearer token
//!         missing/expired → shared challenge:
//!             transport POST /auth/challenge → wallet sign → POST /auth/verify
//!     → state.rs SessionState transition → listeners notified in order
//! ```

pub mod manager;
pub mod state;

pub use manager::{ListenerId, SessionManager};
pub use state::{SessionEvent, SessionPhase, SessionState};
