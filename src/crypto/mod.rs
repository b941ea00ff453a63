//! Crypto Module - Password hashing, code hashing, and payload sealing

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Crypto utilities
pub struct Crypto;

impl Crypto {
    /// SHA-256 hash as a hex string
    pub fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Generate random bytes
    pub fn random_bytes(len: usize) -> Vec<u8> {
        use ring::rand::{SecureRandom, SystemRandom};
        let rng = SystemRandom::new();
        let mut bytes = vec![0u8; len];
        rng.fill(&mut bytes).expect("Failed to generate random bytes");
        bytes
    }

    /// Derive key using PBKDF2
    pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32, key_len: usize) -> Vec<u8> {
        use ring::pbkdf2;
        let mut key = vec![0u8; key_len];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            std::num::NonZeroU32::new(iterations).unwrap(),
            salt,
            password,
            &mut key,
        );
        key
    }

    /// Hash password for storage
    pub fn hash_password(password: &str) -> String {
        let salt = Self::random_bytes(16);
        let key = Self::derive_key(password.as_bytes(), &salt, 100_000, 32);
        format!("{}${}", hex::encode(&salt), hex::encode(&key))
    }

    /// Verify password against hash
    pub fn verify_password(password: &str, hash: &str) -> bool {
        let parts: Vec<&str> = hash.split('$').collect();
        if parts.len() != 2 {
            return false;
        }

        let salt = match hex::decode(parts[0]) {
            Ok(s) => s,
            Err(_) => return false,
        };

        let stored_key = match hex::decode(parts[1]) {
            Ok(k) => k,
            Err(_) => return false,
        };

        let computed_key = Self::derive_key(password.as_bytes(), &salt, 100_000, 32);
        constant_time_eq(&computed_key, &stored_key)
    }
}

/// Constant-time comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// AES-256-GCM cipher for redemption code payloads.
///
/// The 12-byte nonce is prepended to the ciphertext and the whole blob is
/// base64 encoded, so the output can travel inside a QR code as text.
#[derive(Clone)]
pub struct CodeCipher {
    cipher: Aes256Gcm,
}

impl CodeCipher {
    /// Create a new `CodeCipher` from a 32-byte key.
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Create a cipher from a 64-character hex key string.
    pub fn from_hex(hex_key: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_key).map_err(|e| format!("Invalid hex key: {}", e))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "Key must be 32 bytes for AES-256".to_string())?;
        Ok(Self::new(&key))
    }

    /// Seal `plaintext` and return base64(`nonce || ciphertext`).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, String> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| format!("Encryption error: {}", e))?;
        let mut blob = nonce_bytes.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Open data previously produced by `encrypt()`.
    /// Fails on tampering, truncation, or a wrong key.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, String> {
        let data = BASE64
            .decode(encoded)
            .map_err(|e| format!("Invalid base64: {}", e))?;
        if data.len() < 12 {
            return Err("Invalid ciphertext: too short".to_string());
        }
        let (nonce_bytes, ciphertext) = data.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| format!("Decryption error: {}", e))
    }
}
