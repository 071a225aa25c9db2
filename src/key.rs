//! Scoped, zeroising encryption key (spec component C7).
//!
//! The stored key is copied on construction and guarded by an `RwLock` so
//! that concurrent [`Key::use_key`] calls can copy bytes out in parallel
//! (read access), while [`Key::zero`] takes exclusive access to clear the
//! stored buffer. Every copy handed to a caller is wrapped in
//! [`zeroize::Zeroizing`], which overwrites it on drop — including on an
//! early return or a panic unwinding through the caller's closure.

use std::sync::RwLock;
use zeroize::{Zeroize, Zeroizing};

/// SQLCipher keys are 256-bit (32-byte) raw key material.
pub const KEY_LEN: usize = 32;

/// A 32-byte key buffer with deterministic zeroisation.
pub struct Key {
    bytes: RwLock<[u8; KEY_LEN]>,
}

impl Key {
    /// Copies `source` into a freshly allocated, zero-padded 32-byte
    /// buffer. Input longer than [`KEY_LEN`] is truncated.
    #[must_use]
    pub fn from_bytes(source: &[u8]) -> Self {
        let mut buf = [0u8; KEY_LEN];
        let n = source.len().min(KEY_LEN);
        buf[..n].copy_from_slice(&source[..n]);
        Self {
            bytes: RwLock::new(buf),
        }
    }

    /// Hands `action` an independent, zeroising copy of the stored key.
    /// The copy is cleared as soon as `action` returns, including via an
    /// unwinding panic.
    pub fn use_key<R>(&self, action: impl FnOnce(&[u8; KEY_LEN]) -> R) -> R {
        let copy: Zeroizing<[u8; KEY_LEN]> = {
            let guard = self
                .bytes
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Zeroizing::new(*guard)
        };
        action(&copy)
    }

    /// Overwrites the stored buffer with zero bytes. Idempotent.
    pub fn zero(&self) {
        let mut guard = self
            .bytes
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_key_sees_original_bytes() {
        let key = Key::from_bytes(b"0123456789abcdef0123456789abcdef");
        key.use_key(|buf| {
            assert_eq!(&buf[..8], b"01234567");
        });
    }

    #[test]
    fn short_input_is_zero_padded() {
        let key = Key::from_bytes(b"abc");
        key.use_key(|buf| {
            assert_eq!(&buf[..3], b"abc");
            assert!(buf[3..].iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn zero_clears_subsequent_use_calls() {
        let key = Key::from_bytes(b"secretsecretsecretsecretsecretse");
        key.zero();
        key.use_key(|buf| {
            assert!(buf.iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn use_key_returns_action_result() {
        let key = Key::from_bytes(b"k");
        let len = key.use_key(|buf| buf.len());
        assert_eq!(len, KEY_LEN);
    }

    #[test]
    fn concurrent_use_calls_are_independent() {
        use std::sync::Arc;
        use std::thread;

        let key = Arc::new(Key::from_bytes(b"0123456789abcdef0123456789abcdef"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let key = Arc::clone(&key);
                thread::spawn(move || {
                    key.use_key(|buf| {
                        let mut copy = *buf;
                        copy[0] = 0xFF;
                        copy[0]
                    })
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 0xFF);
        }
        // The stored key is untouched by those independent copies.
        key.use_key(|buf| assert_eq!(buf[0], b'0'));
    }
}
