use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Nonce length used when deriving client-side transaction ids.
pub const TX_NONCE_LEN: usize = 24;

///
/// TxId
///
/// Hex-encoded transaction identifier. Invoke transactions derive it on the
/// client before submission as `sha256(nonce || creator)`, so the id is known
/// before the network sees the proposal.
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a transaction id from an explicit nonce and creator identity.
    #[must_use]
    pub fn derive(nonce: &[u8], creator: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(nonce);
        hasher.update(creator);

        Self(hex::encode(hasher.finalize()))
    }

    /// Derive a fresh transaction id with a random nonce.
    #[must_use]
    pub fn generate(creator: &[u8]) -> Self {
        let nonce: [u8; TX_NONCE_LEN] = rand::random();

        Self::derive(&nonce, creator)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TxId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

///
/// TESTS
///
