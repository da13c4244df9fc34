use crate::error::{Result, X402Error};
use rand::{rngs::OsRng, TryRngCore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Source of 32-byte authorization nonces.
pub trait NonceSource: Send + Sync {
    fn fill_nonce(&self) -> Result<[u8; 32]>;
}

/// Operating-system CSPRNG. A failing OS source is an error; there is no weaker fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsNonceSource;

impl NonceSource for OsNonceSource {
    fn fill_nonce(&self) -> Result<[u8; 32]> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| X402Error::Nonce(e.to_string()))?;
        Ok(bytes)
    }
}

const MAX_REDRAWS: usize = 8;

/// Remembers every nonce handed out by this process and never repeats one.
///
/// Only covers the current process: restarts start with an empty set.
pub struct FreshNonces {
    source: Arc<dyn NonceSource>,
    issued: Mutex<HashSet<[u8; 32]>>,
}

impl FreshNonces {
    pub fn new(source: Arc<dyn NonceSource>) -> Self {
        Self {
            source,
            issued: Mutex::new(HashSet::new()),
        }
    }

    pub fn next(&self) -> Result<[u8; 32]> {
        let mut issued = self.issued.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        for _ in 0..MAX_REDRAWS {
            let nonce = self.source.fill_nonce()?;
            if issued.insert(nonce) {
                return Ok(nonce);
            }
            tracing::warn!("Nonce source repeated a value, drawing again");
        }

        Err(X402Error::Nonce(format!(
            "no fresh nonce after {} draws",
            MAX_REDRAWS
        )))
    }

    pub fn issued_count(&self) -> usize {
        self.issued.lock().map(|set| set.len()).unwrap_or(0)
    }
}

impl Default for FreshNonces {
    fn default() -> Self {
        Self::new(Arc::new(OsNonceSource))
    }
}
