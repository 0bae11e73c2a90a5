//! Key agreement and request signing primitives.
//!
//! - Key pairs are X25519; public keys travel as their raw 32 bytes.
//! - The shared key between a node and the broker is HKDF-SHA256 over the
//!   X25519 shared secret (no salt, info `b"encryption key"`, 32 bytes).
//! - Requests are signed with HMAC-SHA256 under the shared key and
//!   verified in constant time.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use hkdf::Hkdf;
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const SHARED_KEY_INFO: &[u8] = b"encryption key";

/// Length of a raw public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// An X25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the OS random source.
    pub fn generate() -> Self {
        let secret = StaticSecret::random();
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuilds a key pair from its raw 32-byte secret.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The private half.
    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// The public half.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// The raw public key.
    pub fn public_bytes(&self) -> Vec<u8> {
        public_key_to_bytes(&self.public)
    }

    /// Derives the key shared with the owner of `peer`.
    pub fn shared_key(&self, peer: &PublicKey) -> Result<[u8; 32]> {
        generate_shared_key(&self.secret, peer)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &encode_base64(self.public.as_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Generates a fresh key pair. Shorthand for [`KeyPair::generate`].
pub fn generate_key_pair() -> KeyPair {
    KeyPair::generate()
}

/// Serializes a public key to its raw bytes.
pub fn public_key_to_bytes(public_key: &PublicKey) -> Vec<u8> {
    public_key.as_bytes().to_vec()
}

/// Parses raw public key bytes.
///
/// # Errors
///
/// [`Error::Crypto`] if `bytes` is not exactly 32 bytes long.
pub fn bytes_to_public_key(bytes: &[u8]) -> Result<PublicKey> {
    let raw: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        Error::Crypto(format!(
            "public key must be {PUBLIC_KEY_LEN} bytes (got {})",
            bytes.len()
        ))
    })?;
    Ok(PublicKey::from(raw))
}

/// Derives the 32-byte key shared between `private_key` and `public_key`.
///
/// Both sides arrive at the same key:
///
/// ```
/// use fleetbroker::shared::crypto::generate_key_pair;
///
/// let node = generate_key_pair();
/// let broker = generate_key_pair();
/// assert_eq!(
///     node.shared_key(broker.public()).unwrap(),
///     broker.shared_key(node.public()).unwrap(),
/// );
/// ```
pub fn generate_shared_key(private_key: &StaticSecret, public_key: &PublicKey) -> Result<[u8; 32]> {
    let shared_secret = private_key.diffie_hellman(public_key);
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(SHARED_KEY_INFO, &mut key)
        .map_err(|e| Error::Crypto(format!("key derivation failed: {e}")))?;
    Ok(key)
}

/// HMAC-SHA256 of `message` under `key`.
pub fn compute_hmac(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("invalid hmac key: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Checks `tag` against the HMAC-SHA256 of `message` in constant time.
pub fn verify_hmac(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as KeyInit>::new_from_slice(key) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

/// base64url (padded) encoding used for metadata values.
pub fn encode_base64(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Inverse of [`encode_base64`].
///
/// # Errors
///
/// [`Error::Crypto`] if `value` is not valid base64url.
pub fn decode_base64(value: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(value)
        .map_err(|e| Error::Crypto(format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hmac_verifies_only_the_signed_message() {
        let key = [7u8; 32];
        let tag = compute_hmac(&key, b"payload").unwrap();
        assert!(verify_hmac(&key, b"payload", &tag));
        assert!(!verify_hmac(&key, b"payload!", &tag));
        assert!(!verify_hmac(&[8u8; 32], b"payload", &tag));
        assert!(!verify_hmac(&key, b"payload", &tag[..16]));
    }

    #[test]
    fn shared_key_differs_per_peer() {
        let broker = KeyPair::generate();
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(
            broker.shared_key(a.public()).unwrap(),
            broker.shared_key(b.public()).unwrap()
        );
    }

    #[test]
    fn public_key_bytes_round_trip() {
        let pair = KeyPair::generate();
        let bytes = pair.public_bytes();
        assert_eq!(bytes.len(), PUBLIC_KEY_LEN);
        assert_eq!(bytes_to_public_key(&bytes).unwrap(), *pair.public());
    }

    #[test]
    fn short_public_key_is_rejected() {
        let err = bytes_to_public_key(&[1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn secret_bytes_reproduce_the_public_key() {
        let a = KeyPair::from_secret_bytes([42u8; 32]);
        let b = KeyPair::from_secret_bytes([42u8; 32]);
        assert_eq!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn debug_redacts_the_secret() {
        let rendered = format!("{:?}", KeyPair::generate());
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn base64_is_url_safe() {
        let encoded = encode_base64(&[0xfb, 0xff]);
        assert_eq!(encoded, "-_8=");
        assert_eq!(decode_base64(&encoded).unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64("not base64!").is_err());
    }
}
