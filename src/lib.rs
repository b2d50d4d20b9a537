//! Resilient client for a contract-execution and content API.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod orchestrator;
pub mod queue;
pub mod resilience;
pub mod schema;
pub mod session;
pub mod transport;
pub mod wallet;

pub use config::schema::ClientConfig;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use lifecycle::Shutdown;
pub use orchestrator::{CallOrchestrator, CallOutcome, ContentOptions, ContractCall, StatusSnapshot};
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
pub use wallet::{LocalWallet, WalletProvider};
