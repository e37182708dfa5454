//! Envelope encryption for secret material at rest.
//!
//! Every payload gets its own random AES-256-GCM data key (DEK); the DEK is
//! wrapped by the instance master key (KEK). Storage backends only ever see
//! [`SealedPayload`] values.

pub mod builtin;

pub use builtin::VaultCrypto;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Ciphertext plus the wrapped DEK needed to open it. Serialized as base64
/// strings so it can live inside JSON documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    #[serde(with = "b64")]
    pub encrypted_dek: Vec<u8>,
    #[serde(with = "b64")]
    pub dek_nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
}

mod b64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
