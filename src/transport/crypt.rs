//! Arc4 wire encryption
//!
//! Both directions are keyed with the SRP session key but keep independent
//! keystreams, so the reader and writer each own one instance.

use rc4::consts::U20;
use rc4::{KeyInit, Rc4, StreamCipher};

use crate::error::{Error, Result};

/// One direction of an Arc4-encrypted channel
pub struct Arc4 {
    cipher: Rc4<U20>,
}

impl Arc4 {
    /// Key a new keystream with the 20-byte session key
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Rc4::<U20>::new_from_slice(key).map_err(|_| {
            Error::AuthenticationFailed(format!(
                "wire crypt key must be 20 bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self { cipher })
    }

    /// Encrypt or decrypt in place
    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}

impl std::fmt::Debug for Arc4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Arc4")
    }
}
