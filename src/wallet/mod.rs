//! Wallet collaborator interface.
//!
//! # Security Constraints
//! - The core only ever asks for an address and a signature
//! - Key material stays inside the provider and is never logged

pub mod local;

use async_trait::async_trait;

use crate::error::ClientResult;

pub use local::{LocalWallet, PRIVATE_KEY_ENV_VAR};

/// Signs authentication challenges on behalf of the client.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Public identifier the backend associates with signatures.
    fn public_address(&self) -> String;

    /// Sign the raw challenge bytes, returning a 0x-prefixed hex signature.
    async fn sign_message(&self, challenge: &[u8]) -> ClientResult<String>;
}
