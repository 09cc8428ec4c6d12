//! One-time Signing Secret
//!
//! Derived keys are wrapped so they cannot be printed, serialized or cloned,
//! and are wiped when dropped. The sweep path derives one, signs once, and
//! lets it go out of scope.

use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

/// Opaque secp256k1 private key for a single signing operation
pub struct SigningKey {
    secret: SecretKey,
}

impl SigningKey {
    pub(crate) fn from_secret(secret: SecretKey) -> Self {
        Self { secret }
    }

    /// Public key matching this secret
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(SECP256K1, &self.secret)
    }

    /// Sign a 32-byte digest, returning the compact `r || s` signature and
    /// the recovery id (0 or 1)
    pub fn sign_recoverable(&self, digest: &[u8; 32]) -> ([u8; 64], u8) {
        let msg = Message::from_digest(*digest);
        let sig = SECP256K1.sign_ecdsa_recoverable(&msg, &self.secret);
        let (recovery_id, compact) = sig.serialize_compact();
        (compact, recovery_id.to_i32() as u8)
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}
