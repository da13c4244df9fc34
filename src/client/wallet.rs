use crate::error::{Result, X402Error};
use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::Address,
    utils::to_checksum,
};

/// Anything that can sign a payment authorization on the payer's behalf.
#[async_trait]
pub trait SigningWallet: Send + Sync {
    fn address(&self) -> Address;

    /// Signs `message` with the EIP-191 personal-message scheme, returning `0x`-prefixed hex.
    async fn sign(&self, message: &str) -> Result<String>;

    fn checksum_address(&self) -> String {
        to_checksum(&self.address(), None)
    }
}

/// Wallet backed by an in-memory secp256k1 key.
pub struct LocalSigningWallet {
    wallet: LocalWallet,
}

impl LocalSigningWallet {
    /// Accepts a hex private key with or without the `0x` prefix.
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| X402Error::Credentials(format!("Invalid private key: {}", e)))?;

        Ok(Self { wallet })
    }
}

impl std::fmt::Debug for LocalSigningWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigningWallet")
            .field("address", &self.wallet.address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SigningWallet for LocalSigningWallet {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, message: &str) -> Result<String> {
        let signature = self
            .wallet
            .sign_message(message)
            .await
            .map_err(|e| X402Error::Signing(e.to_string()))?;

        Ok(format!("0x{}", hex::encode(signature.to_vec())))
    }
}
