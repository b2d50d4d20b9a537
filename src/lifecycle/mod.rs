//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Teardown (shutdown.rs):
//!     destroy() → trigger → queue ticker aborts in-flight jobs, fails pending
//!                         → session watcher exits
//!                         → retry sleeps return Shutdown
//!
//! Signals (signals.rs):
//!     SIGINT → binary calls destroy()
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
