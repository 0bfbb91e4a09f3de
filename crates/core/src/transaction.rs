//! Multi-party transactions and their signing rules.
//!
//! A transaction moves amounts from inputs to outputs. Every input owner and
//! every `required` third party must sign the canonical payload:
//!
//! ```text
//! [input entries..., output entries..., required keys...]
//! ```
//!
//! Inputs and outputs are keyed by the owner's PEM public key. Adding a second
//! entry for the same key overwrites the amount but keeps the original position.

use crate::canonical;
use crate::crypto::{CryptoError, KeyPair, PublicKey, Signature};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Reward a block-level accounting pass would allow on top of the inputs.
/// Conservation of value is not checked by [`Transaction::validate`].
pub const MINING_REWARD: f64 = 25.0;

/// Errors that can occur while building or decoding transactions.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("malformed transaction JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("amount must be finite, got {0}")]
    NonFiniteAmount(f64),
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// Why a transaction is invalid. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("input signature missing")]
    MissingInputSignature,
    #[error("required signature missing")]
    MissingRequiredSignature,
    #[error("negative amount detected")]
    NegativeAmount,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// Largest magnitude below which every whole f64 is an exact integer (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A signed amount of value.
///
/// An amount keeps the exact JSON text it was decoded from, so a payload
/// signed over `1.0` still reads `1.0` after a round trip. Amounts built from
/// an `f64` write whole values as integers (`1`) and everything else as
/// floats (`1.1`). Only finite amounts exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Number);

impl Amount {
    /// Numeric value. Text beyond the f64 range saturates to an infinity.
    pub fn value(&self) -> f64 {
        self.0.as_f64().unwrap_or_else(|| {
            if self.0.to_string().starts_with('-') {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            }
        })
    }

    /// False for negative amounts. `-0` counts as non-negative.
    pub fn is_non_negative(&self) -> bool {
        self.value() >= 0.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<i32> for Amount {
    fn from(value: i32) -> Self {
        Self(Number::from(value))
    }
}

impl TryFrom<f64> for Amount {
    type Error = TransactionError;

    fn try_from(value: f64) -> Result<Self> {
        if value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER {
            return Ok(Self(Number::from(value as i64)));
        }
        Number::from_f64(value)
            .map(Self)
            .ok_or(TransactionError::NonFiniteAmount(value))
    }
}

impl FromStr for Amount {
    type Err = TransactionError;

    /// Parse a JSON number, keeping its spelling.
    fn from_str(s: &str) -> Result<Self> {
        s.parse::<Number>()
            .map(Self)
            .map_err(|_| TransactionError::InvalidAmount(s.to_owned()))
    }
}

/// One input or output: who, and how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// PEM text of the owner's public key.
    pub pub_key: String,
    pub amount: Amount,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadItem<'a> {
    Entry(&'a Entry),
    Key(&'a str),
}

/// A transaction with any number of inputs, outputs and co-signers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    inputs: IndexMap<String, Entry>,
    outputs: IndexMap<String, Entry>,
    required: Vec<String>,
    signatures: IndexMap<String, Signature>,
}

fn entry(key: &PublicKey, amount: Amount) -> (String, Entry) {
    let pem = key.to_pem().to_owned();
    let entry = Entry {
        pub_key: pem.clone(),
        amount,
    };
    (pem, entry)
}

impl Transaction {
    /// Create an empty, unsigned transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unsigned transaction from `(key, amount)` pairs and co-signers.
    pub fn from_parts<'a>(
        inputs: impl IntoIterator<Item = (&'a PublicKey, Amount)>,
        outputs: impl IntoIterator<Item = (&'a PublicKey, Amount)>,
        required: impl IntoIterator<Item = &'a PublicKey>,
    ) -> Self {
        let mut tx = Self::new();
        for (key, amount) in inputs {
            tx.add_input(key, amount);
        }
        for (key, amount) in outputs {
            tx.add_output(key, amount);
        }
        for key in required {
            tx.add_required(key);
        }
        tx
    }

    /// Add (or overwrite) the input owned by `key`.
    pub fn add_input(&mut self, key: &PublicKey, amount: impl Into<Amount>) {
        let (pem, entry) = entry(key, amount.into());
        self.inputs.insert(pem, entry);
    }

    /// Add (or overwrite) the output paid to `key`.
    pub fn add_output(&mut self, key: &PublicKey, amount: impl Into<Amount>) {
        let (pem, entry) = entry(key, amount.into());
        self.outputs.insert(pem, entry);
    }

    /// Require `key` to co-sign the transaction.
    pub fn add_required(&mut self, key: &PublicKey) {
        self.required.push(key.to_pem().to_owned());
    }

    pub fn with_input(mut self, key: &PublicKey, amount: impl Into<Amount>) -> Self {
        self.add_input(key, amount);
        self
    }

    pub fn with_output(mut self, key: &PublicKey, amount: impl Into<Amount>) -> Self {
        self.add_output(key, amount);
        self
    }

    pub fn with_required(mut self, key: &PublicKey) -> Self {
        self.add_required(key);
        self
    }

    /// Inputs in insertion order, keyed by PEM public key.
    pub fn inputs(&self) -> &IndexMap<String, Entry> {
        &self.inputs
    }

    /// Outputs in insertion order, keyed by PEM public key.
    pub fn outputs(&self) -> &IndexMap<String, Entry> {
        &self.outputs
    }

    /// PEM public keys of required co-signers.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Signatures keyed by the signer's PEM public key.
    pub fn signatures(&self) -> &IndexMap<String, Signature> {
        &self.signatures
    }

    /// Sum of all input amounts.
    pub fn total_input(&self) -> f64 {
        self.inputs.values().map(|e| e.amount.value()).sum()
    }

    /// Sum of all output amounts.
    pub fn total_output(&self) -> f64 {
        self.outputs.values().map(|e| e.amount.value()).sum()
    }

    /// True if the transaction creates value out of nothing.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// The canonical bytes every signature is computed over.
    pub fn payload(&self) -> Vec<u8> {
        let items: Vec<PayloadItem<'_>> = self
            .inputs
            .values()
            .map(PayloadItem::Entry)
            .chain(self.outputs.values().map(PayloadItem::Entry))
            .chain(self.required.iter().map(|key| PayloadItem::Key(key)))
            .collect();
        canonical::to_vec(&items)
    }

    /// Sign the current payload with `keypair`, replacing any earlier
    /// signature by the same key.
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<()> {
        let signature = keypair.sign(&self.payload())?;
        self.signatures
            .insert(keypair.public_key.to_pem().to_owned(), signature);
        Ok(())
    }

    /// Create a signed transaction.
    pub fn signed(mut self, keypair: &KeyPair) -> Result<Self> {
        self.sign(keypair)?;
        Ok(self)
    }

    /// Check the signing rules, reporting the first one that fails.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        // all inputs must have signed the transaction.
        if !self.inputs.keys().all(|k| self.signatures.contains_key(k)) {
            return Err(ValidationError::MissingInputSignature);
        }

        // all required must have signed the transaction.
        if !self.required.iter().all(|k| self.signatures.contains_key(k)) {
            return Err(ValidationError::MissingRequiredSignature);
        }

        if !self
            .inputs
            .values()
            .chain(self.outputs.values())
            .all(|e| e.amount.is_non_negative())
        {
            return Err(ValidationError::NegativeAmount);
        }

        let message = self.payload();
        for (pem, signature) in &self.signatures {
            let verified = PublicKey::from_pem(pem)
                .map(|key| key.verify(&message, signature))
                .unwrap_or(false);
            if !verified {
                return Err(ValidationError::VerificationFailed);
            }
        }

        Ok(())
    }

    /// Whether the transaction passes every signing rule.
    pub fn is_valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(reason) => {
                debug!(%reason, "transaction rejected");
                false
            }
        }
    }

    /// Encode as single-line JSON.
    pub fn to_json(&self) -> String {
        canonical::to_string(self)
    }

    /// Decode from JSON. All four fields must be present.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::keypairs;

    fn amount(text: &str) -> Amount {
        text.parse().unwrap()
    }

    fn raw_entry(key: &str, amount_text: &str) -> (String, Entry) {
        (
            key.to_string(),
            Entry {
                pub_key: key.to_string(),
                amount: amount(amount_text),
            },
        )
    }

    #[test]
    fn test_one_to_one() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1)
            .signed(&k[0])
            .unwrap();

        assert!(tx.is_valid());
    }

    #[test]
    fn test_tampered_output_key() {
        let k = keypairs();
        let mut tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1)
            .signed(&k[0])
            .unwrap();

        // redirect the funds after signing.
        let pem = k[1].public_key.to_pem();
        tx.outputs.get_mut(pem).unwrap().pub_key = k[2].public_key.to_pem().to_owned();

        assert_eq!(tx.validate(), Err(ValidationError::VerificationFailed));
    }

    #[test]
    fn test_tampered_output_amount() {
        let k = keypairs();
        let mut tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1)
            .signed(&k[0])
            .unwrap();

        tx.add_output(&k[1].public_key, 2);

        assert!(!tx.is_valid());
    }

    #[test]
    fn test_negative_input_amount() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, -1)
            .with_output(&k[1].public_key, 1)
            .signed(&k[0])
            .unwrap();

        assert_eq!(tx.validate(), Err(ValidationError::NegativeAmount));
    }

    #[test]
    fn test_negative_output_amount() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, amount("0.1"))
            .with_output(&k[1].public_key, amount("-0.1"))
            .signed(&k[0])
            .unwrap();

        assert_eq!(tx.validate(), Err(ValidationError::NegativeAmount));
    }

    #[test]
    fn test_non_finite_amount_is_rejected() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                Amount::try_from(value),
                Err(TransactionError::NonFiniteAmount(_))
            ));
        }
        assert!(matches!(
            "NaN".parse::<Amount>(),
            Err(TransactionError::InvalidAmount(_))
        ));

        let json = r#"{"inputs": {}, "outputs": {"k": {"pub_key": "k", "amount": null}}, "required": [], "signatures": {}}"#;
        assert!(Transaction::from_json(json).is_err());
    }

    #[test]
    fn test_negative_zero_is_not_negative() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_output(&k[1].public_key, amount("-0.0"))
            .signed(&k[0])
            .unwrap();

        assert!(tx.is_valid());
    }

    #[test]
    fn test_out_of_range_amount_keeps_sign() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_output(&k[1].public_key, amount("-1e400"))
            .signed(&k[0])
            .unwrap();

        assert_eq!(tx.outputs()[0].amount.value(), f64::NEG_INFINITY);
        assert_eq!(tx.validate(), Err(ValidationError::NegativeAmount));
        let decoded = Transaction::from_json(&tx.to_json()).unwrap();
        assert_eq!(decoded.validate(), Err(ValidationError::NegativeAmount));
    }

    #[test]
    fn test_missing_signature() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_input(&k[1].public_key, 1)
            .with_output(&k[2].public_key, 1)
            .signed(&k[0])
            .unwrap();

        assert_eq!(tx.validate(), Err(ValidationError::MissingInputSignature));
    }

    #[test]
    fn test_unsigned() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1);

        assert!(!tx.is_valid());
    }

    #[test]
    fn test_wrong_signature() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1)
            .signed(&k[2])
            .unwrap();

        assert_eq!(tx.validate(), Err(ValidationError::MissingInputSignature));
    }

    #[test]
    fn test_forged_signature_under_input_key() {
        let k = keypairs();
        let mut tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1);
        let forged = k[2].sign(&tx.payload()).unwrap();
        tx.signatures
            .insert(k[0].public_key.to_pem().to_owned(), forged);

        assert_eq!(tx.validate(), Err(ValidationError::VerificationFailed));
    }

    #[test]
    fn test_unparseable_signer_key() {
        let k = keypairs();
        let mut tx = Transaction::new().with_output(&k[1].public_key, 1);
        let sig = k[0].sign(&tx.payload()).unwrap();
        tx.signatures.insert("not a pem".to_string(), sig);

        assert_eq!(tx.validate(), Err(ValidationError::VerificationFailed));
    }

    #[test]
    fn test_output_exceeding_input_is_not_checked() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_input(&k[1].public_key, 1)
            .with_output(&k[2].public_key, 4)
            .signed(&k[0])
            .unwrap()
            .signed(&k[1])
            .unwrap();

        assert!(tx.total_output() > tx.total_input());
        assert!(tx.is_valid());
    }

    #[test]
    fn test_coinbase() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_output(&k[3].public_key, amount("25.1"))
            .signed(&k[2])
            .unwrap();

        assert!(tx.is_coinbase());
        assert!(tx.is_valid());
    }

    #[test]
    fn test_unsigned_escrow() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1)
            .with_required(&k[2].public_key)
            .signed(&k[0])
            .unwrap();

        assert_eq!(tx.validate(), Err(ValidationError::MissingRequiredSignature));
    }

    #[test]
    fn test_signed_escrow() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1)
            .with_required(&k[2].public_key)
            .signed(&k[0])
            .unwrap()
            .signed(&k[2])
            .unwrap();

        assert!(tx.is_valid());
    }

    #[test]
    fn test_escrow_signed_only_by_required_party() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1)
            .with_required(&k[2].public_key)
            .signed(&k[2])
            .unwrap();

        assert_eq!(tx.validate(), Err(ValidationError::MissingInputSignature));
    }

    #[test]
    fn test_input_overwrite_keeps_position() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_input(&k[1].public_key, 2)
            .with_input(&k[0].public_key, 5);

        let keys: Vec<&String> = tx.inputs().keys().collect();
        assert_eq!(keys, vec![k[0].public_key.to_pem(), k[1].public_key.to_pem()]);
        assert_eq!(tx.inputs()[0].amount, Amount::from(5));
        assert_eq!(tx.total_input(), 7.0);
    }

    #[test]
    fn test_payload_layout() {
        let mut tx = Transaction::new();
        tx.inputs.extend([raw_entry("A", "1")]);
        tx.outputs.extend([raw_entry("B", "1.5"), raw_entry("C", "0.0")]);
        tx.required.push("D".to_string());

        assert_eq!(
            String::from_utf8(tx.payload()).unwrap(),
            r#"[{"pub_key": "A", "amount": 1}, {"pub_key": "B", "amount": 1.5}, {"pub_key": "C", "amount": 0.0}, "D"]"#
        );
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(Transaction::new().payload(), b"[]");
    }

    #[test]
    fn test_json_shape() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, 1)
            .with_output(&k[1].public_key, 1)
            .with_required(&k[2].public_key)
            .signed(&k[0])
            .unwrap();

        let json = tx.to_json();
        assert!(!json.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let pem = k[0].public_key.to_pem();
        assert_eq!(value["inputs"][pem]["pub_key"], pem);
        assert_eq!(value["inputs"][pem]["amount"], 1);
        assert_eq!(value["required"][0], k[2].public_key.to_pem());
        assert_eq!(
            value["signatures"][pem],
            tx.signatures()[pem].to_base64().as_str()
        );
    }

    #[test]
    fn test_serdes() {
        let k = keypairs();
        let tx = Transaction::new()
            .with_input(&k[0].public_key, amount("1.25"))
            .with_output(&k[1].public_key, 1)
            .with_output(&k[2].public_key, amount("0.25"))
            .signed(&k[0])
            .unwrap();

        let decoded = Transaction::from_json(&tx.to_json()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.payload(), tx.payload());
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_from_json_missing_field() {
        let err = Transaction::from_json(r#"{"inputs": {}, "outputs": {}, "required": []}"#);
        assert!(matches!(err, Err(TransactionError::Json(_))));
    }

    #[test]
    fn test_from_json_bad_signature_encoding() {
        let json =
            r#"{"inputs": {}, "outputs": {}, "required": [], "signatures": {"k": "%%%"}}"#;
        assert!(Transaction::from_json(json).is_err());
    }

    #[test]
    fn test_amount_from_f64() {
        let text = |v: f64| serde_json::to_string(&Amount::try_from(v).unwrap()).unwrap();
        assert_eq!(text(1.0), "1");
        assert_eq!(text(-3.0), "-3");
        assert_eq!(text(1.1), "1.1");
        assert_eq!(text(1e300), "1e300");
    }

    #[test]
    fn test_amount_keeps_spelling() {
        for spelling in ["1", "1.0", "1e+16", "1e-05", "-0.0", "0.30000000000000004"] {
            assert_eq!(amount(spelling).to_string(), spelling);
            assert_eq!(serde_json::to_string(&amount(spelling)).unwrap(), spelling);
        }
        assert_ne!(amount("1"), amount("1.0"));
        assert_eq!(amount("1.0").value(), 1.0);
    }

    #[test]
    fn test_float_spelled_amount_survives_decoding() {
        let k = keypairs();
        let pem = serde_json::to_string(k[0].public_key.to_pem()).unwrap();
        let payload = format!(
            r#"[{{"pub_key": {pem}, "amount": 1.0}}, {{"pub_key": {pem}, "amount": 1.0}}]"#
        );
        let signature = k[0].sign(payload.as_bytes()).unwrap().to_base64();
        let json = format!(
            r#"{{"inputs": {{{pem}: {{"pub_key": {pem}, "amount": 1.0}}}}, "outputs": {{{pem}: {{"pub_key": {pem}, "amount": 1.0}}}}, "required": [], "signatures": {{{pem}: "{signature}"}}}}"#
        );

        let tx = Transaction::from_json(&json).unwrap();
        assert_eq!(String::from_utf8(tx.payload()).unwrap(), payload);
        assert!(tx.is_valid());
        assert_eq!(tx.to_json(), json);
    }
}
