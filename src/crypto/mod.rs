//! Secretbox codec: XSalsa20-Poly1305 over the negotiated session key.

use xsalsa20poly1305::XSalsa20Poly1305;
use xsalsa20poly1305::aead::{Aead, KeyInit};

use crate::common::errors::VoiceError;
use crate::rtp::NONCE_LEN;

/// Length of the shared session key.
pub const KEY_LEN: usize = 32;

/// Length of the Poly1305 tag prefixed to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Authenticated encryption bound to one session key.
pub struct SecretBox {
    cipher: XSalsa20Poly1305,
}

impl SecretBox {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: XSalsa20Poly1305::new(&key.into()),
        }
    }

    /// Encrypts `plaintext`; the output is `plaintext.len() + TAG_LEN` bytes.
    pub fn seal(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>, VoiceError> {
        self.cipher
            .encrypt(nonce.into(), plaintext)
            .map_err(|_| VoiceError::CodecFailure("secretbox seal failed".into()))
    }

    /// Decrypts and verifies `ciphertext`.
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>, VoiceError> {
        self.cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|_| VoiceError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp;

    fn test_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    #[test]
    fn seal_open_roundtrip() {
        let secret = SecretBox::new(test_key());
        let nonce = rtp::make_nonce(&rtp::build_header(1, 960, 42));
        let plaintext = b"opus frame bytes";

        let ciphertext = secret.seal(plaintext, &nonce).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);
        assert_eq!(secret.open(&ciphertext, &nonce).unwrap(), plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let secret = SecretBox::new(test_key());
        let nonce = rtp::make_nonce(&rtp::build_header(1, 960, 42));

        let mut ciphertext = secret.seal(b"payload", &nonce).unwrap();
        ciphertext[0] ^= 0xFF;
        assert!(matches!(
            secret.open(&ciphertext, &nonce),
            Err(VoiceError::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_nonce_fails_authentication() {
        let secret = SecretBox::new(test_key());
        let nonce = rtp::make_nonce(&rtp::build_header(1, 960, 42));
        let other = rtp::make_nonce(&rtp::build_header(2, 1920, 42));

        let ciphertext = secret.seal(b"payload", &nonce).unwrap();
        assert!(secret.open(&ciphertext, &other).is_err());
    }
}
