//! AEAD ciphers negotiable during the handshake, and the registry of cipher names each
//! endpoint advertises.
//!
//! Grounded on `original_source/hyphen0/protocol/encryption/aes256.py`'s wire layout
//! (`nonce || tag || ciphertext`, 15-byte nonce, AES in OCB mode) and on the registry
//! shape `hyphen0.server.Hyphen0Server.ENCRYPTION_MODES`/`client.Hyphen0Client`'s mirror
//! of it — a name-to-constructor map both peers intersect during negotiation.

use aead::{Aead, KeyInit};
use ocb3::consts::{U15, U16};
use ocb3::Ocb3;
use rand::RngCore;

use crate::error::{Error, Result};

type Aes256Ocb = Ocb3<aes::Aes256, U15, U16>;

const NONCE_LEN: usize = 15;
const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// A negotiated symmetric cipher, keyed once and reused for the life of a connection.
pub trait AeadCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256 in OCB3 mode, wire format `nonce(15) || tag(16) || ciphertext`.
pub struct AesOcbCipher {
    cipher: Aes256Ocb,
}

impl AesOcbCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Ocb::new(key.into()),
        }
    }
}

impl AeadCipher for AesOcbCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(ocb3::Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| Error::Crypto(format!("aes-ocb encrypt failed: {e}")))?;
        // `ciphertext` is `ct || tag`; the wire layout wants `nonce || tag || ct`.
        let split = ciphertext.len() - TAG_LEN;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext[split..]);
        out.extend_from_slice(&ciphertext[..split]);
        Ok(out)
    }

    fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>> {
        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Crypto("ciphertext shorter than nonce+tag".into()));
        }
        let (nonce, rest) = framed.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut buf = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        buf.extend_from_slice(ciphertext);
        buf.extend_from_slice(tag);

        self.cipher
            .decrypt(ocb3::Nonce::from_slice(nonce), buf.as_slice())
            .map_err(|e| Error::Crypto(format!("aes-ocb decrypt/verify failed: {e}")))
    }
}

/// The names a connection endpoint is willing to speak, in preference order, and the
/// machinery to pick a mutually supported one from a peer's offer list.
#[derive(Clone, Debug, Default)]
pub struct CipherRegistry {
    modes: Vec<String>,
}

impl CipherRegistry {
    pub fn new(modes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            modes: modes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn modes(&self) -> &[String] {
        &self.modes
    }

    /// Picks the first of our own modes (preference order) also present in `offered`,
    /// mirroring the reference implementation's set intersection but keeping our side's
    /// ordering rather than whatever the set produces.
    pub fn negotiate(&self, offered: &[String]) -> Option<String> {
        self.modes.iter().find(|m| offered.contains(m)).cloned()
    }
}
