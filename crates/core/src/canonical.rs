//! Canonical JSON text used for signing payloads and for the wire format.
//!
//! Compact JSON with `", "` between elements and `": "` after keys, all on one
//! line. Key order is the order of the serialized value, never sorted.

use serde::Serialize;
use serde_json::ser::Formatter;
use std::io;

struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serialize `value` to canonical JSON bytes.
pub(crate) fn to_vec<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter);
    value
        .serialize(&mut serializer)
        .expect("serialization should not fail");
    out
}

/// Serialize `value` to canonical JSON text.
pub(crate) fn to_string<T: Serialize + ?Sized>(value: &T) -> String {
    // The serializer only ever writes valid UTF-8.
    String::from_utf8(to_vec(value)).expect("JSON output is UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_separators() {
        let value = json!([{"amount": 1, "pub_key": "A"}, "B"]);
        assert_eq!(to_string(&value), r#"[{"amount": 1, "pub_key": "A"}, "B"]"#);
    }

    #[test]
    fn test_newlines_are_escaped() {
        assert_eq!(to_string("a\nb"), r#""a\nb""#);
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(to_string(&json!({"a": [], "b": {}})), r#"{"a": [], "b": {}}"#);
    }
}
