use minledger_core::KeyPair;
use std::sync::OnceLock;

/// Keys shared by every test in the binary; RSA generation is slow.
pub fn keys() -> &'static [KeyPair] {
    static KEYS: OnceLock<Vec<KeyPair>> = OnceLock::new();
    KEYS.get_or_init(|| (0..4).map(|_| KeyPair::generate().unwrap()).collect())
}
