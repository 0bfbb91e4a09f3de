//! Shared key material for unit tests. RSA generation is slow, so each test
//! binary generates its keys once.

use crate::crypto::KeyPair;
use std::sync::OnceLock;

pub(crate) fn keypairs() -> &'static [KeyPair] {
    static KEYS: OnceLock<Vec<KeyPair>> = OnceLock::new();
    KEYS.get_or_init(|| {
        (0..4)
            .map(|_| KeyPair::generate().expect("key generation should not fail"))
            .collect()
    })
}
