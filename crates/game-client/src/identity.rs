//! Signing identity
//!
//! A locally held secp256k1 key. Created or loaded once per session and
//! never mutated afterwards.

use crate::error::IdentityError;
use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{hex, Address, Bytes, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// A signed, EIP-2718 encoded transaction ready for `eth_sendRawTransaction`
#[derive(Clone, Debug)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: B256,
}

/// An account able to sign transactions
pub struct SigningIdentity {
    signer: PrivateKeySigner,
}

impl SigningIdentity {
    /// Parse a hex private key, with or without `0x`
    pub fn from_hex(key: &str) -> Result<Self, IdentityError> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|e| IdentityError::InvalidKey(format!("{}", e)))?;
        Ok(Self { signer })
    }

    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    /// Reuse the key stored at `path`, or create a new one and persist it.
    ///
    /// Returns the identity and whether it was newly created.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), IdentityError> {
        if path.exists() {
            let key = std::fs::read_to_string(path)?;
            let identity = Self::from_hex(&key)?;
            tracing::info!("Loaded signing key {} from {}", identity.address(), path.display());
            return Ok((identity, false));
        }

        let identity = Self::random();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // owner-only from the moment the file exists
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(identity.private_key_hex().as_bytes())?;
        tracing::info!("Created signing key {} at {}", identity.address(), path.display());
        Ok((identity, true))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode_prefixed(self.signer.to_bytes())
    }

    /// Sign an EIP-1559 transaction and encode it for broadcast
    pub fn sign_eip1559(&self, tx: TxEip1559) -> Result<SignedTx, IdentityError> {
        let signature = self
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| IdentityError::Signing(e.to_string()))?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        let hash = *envelope.tx_hash();
        Ok(SignedTx {
            raw: Bytes::from(envelope.encoded_2718()),
            hash,
        })
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address())
            .finish()
    }
}
