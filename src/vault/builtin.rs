use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use zeroize::Zeroizing;

use super::SealedPayload;

/// Built-in envelope cipher keyed by the instance master key.
pub struct VaultCrypto {
    kek: Zeroizing<[u8; 32]>,
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        let kek = parse_master_key(master_key_hex)?;
        Ok(Self {
            kek: Zeroizing::new(kek),
        })
    }

    /// Encrypts `plaintext` under a fresh DEK and wraps the DEK with the KEK.
    pub fn seal(&self, plaintext: &[u8]) -> anyhow::Result<SealedPayload> {
        // 1. Generate a random DEK
        let mut dek = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut dek[..]);

        // 2. Encrypt the payload with the DEK
        let payload_cipher = Aes256Gcm::new_from_slice(&dek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let nonce_bytes = generate_nonce();
        let ciphertext = payload_cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| anyhow::anyhow!("payload encryption failed: {}", e))?;

        // 3. Wrap the DEK with the master KEK
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce_bytes = generate_nonce();
        let encrypted_dek = kek_cipher
            .encrypt(Nonce::from_slice(&dek_nonce_bytes), &dek[..])
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        Ok(SealedPayload {
            encrypted_dek,
            dek_nonce: dek_nonce_bytes.to_vec(),
            ciphertext,
            nonce: nonce_bytes.to_vec(),
        })
    }

    /// Unwraps the DEK and decrypts the payload.
    pub fn open(&self, sealed: &SealedPayload) -> anyhow::Result<Zeroizing<Vec<u8>>> {
        if sealed.dek_nonce.len() != 12 || sealed.nonce.len() != 12 {
            anyhow::bail!("sealed payload has malformed nonces");
        }

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_bytes = Zeroizing::new(
            kek_cipher
                .decrypt(Nonce::from_slice(&sealed.dek_nonce), sealed.encrypted_dek.as_slice())
                .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?,
        );

        let payload_cipher = Aes256Gcm::new_from_slice(&dek_bytes)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let plaintext = payload_cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|e| anyhow::anyhow!("payload decryption failed: {}", e))?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Seal a serializable value as JSON.
    pub fn seal_json<T: Serialize>(&self, value: &T) -> anyhow::Result<SealedPayload> {
        let json = Zeroizing::new(serde_json::to_vec(value)?);
        self.seal(&json)
    }

    pub fn open_json<T: DeserializeOwned>(&self, sealed: &SealedPayload) -> anyhow::Result<T> {
        let plaintext = self.open(sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "SMGR_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
