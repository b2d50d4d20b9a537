//! Local key wallet.
//!
//! # Security
//! - Private keys are loaded ONLY from environment variables
//! - Keys are never logged or serialized

use alloy::primitives::hex;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;

use crate::error::{ClientError, ClientResult};
use crate::wallet::WalletProvider;

/// Environment variable name for the private key.
pub const PRIVATE_KEY_ENV_VAR: &str = "CONTRACT_CLIENT_PRIVATE_KEY";

/// EIP-191 message signer backed by an in-memory key.
#[derive(Debug, Clone)]
pub struct LocalWallet {
    signer: PrivateKeySigner,
    chain_id: u64,
}

impl LocalWallet {
    /// Create a wallet from a hex-encoded private key (with or without 0x).
    pub fn from_private_key(private_key_hex: &str, chain_id: u64) -> ClientResult<Self> {
        let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);

        let signer: PrivateKeySigner = key_hex.parse().map_err(|e| {
            ClientError::Authentication(format!("Invalid private key format: {}", e))
        })?;
        let signer = signer.with_chain_id(Some(chain_id));

        tracing::info!(address = %signer.address(), chain_id, "Wallet initialized");

        Ok(Self { signer, chain_id })
    }

    /// Load the key from `CONTRACT_CLIENT_PRIVATE_KEY`.
    pub fn from_env(chain_id: u64) -> ClientResult<Self> {
        let private_key = std::env::var(PRIVATE_KEY_ENV_VAR).map_err(|_| {
            ClientError::Authentication(format!(
                "Environment variable {} not set",
                PRIVATE_KEY_ENV_VAR
            ))
        })?;

        Self::from_private_key(&private_key, chain_id)
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl WalletProvider for LocalWallet {
    fn public_address(&self) -> String {
        self.signer.address().to_checksum(None)
    }

    async fn sign_message(&self, challenge: &[u8]) -> ClientResult<String> {
        let signature = self
            .signer
            .sign_message(challenge)
            .await
            .map_err(|e| ClientError::Authentication(format!("Message signing failed: {}", e)))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}
