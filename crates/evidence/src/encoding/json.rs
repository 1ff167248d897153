use std::io;

use serde::Serialize;
use serde_json::{
    Map, Value,
    ser::{Formatter, PrettyFormatter},
};

use crate::error::{EvidenceError, Result};
use crate::evidence::EvidenceRecord;

/// Indentation used by the canonical form. Part of the signed format.
pub const CANONICAL_INDENT: &[u8] = b"  ";

/// Encodes evidence as canonical JSON: keys sorted at every depth, two-space
/// indentation, `"key": value` separators, ASCII-only output.
///
/// Non-ASCII characters are written as `\uXXXX` escapes (surrogate pairs
/// above U+FFFF) and floats use the shortest round-trip digits with a signed,
/// two-digit exponent outside `1e-4 <= |x| < 1e16`. This is the same byte
/// form as Python's `json.dumps(obj, indent=2, sort_keys=True)`.
///
/// Verifiers re-derive the signed bytes from the stored record, so this
/// output must stay byte-for-byte stable.
pub struct CanonicalJson;

impl CanonicalJson {
    pub fn encode(record: &EvidenceRecord) -> Result<Vec<u8>> {
        Self::encode_value(record)
    }

    pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        let value = sort_keys(serde_json::to_value(value)?);

        let mut out = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter::new());
        value
            .serialize(&mut serializer)
            .map_err(|e| EvidenceError::Serialization(e.to_string()))?;
        Ok(out)
    }
}

// serde_json's map ordering depends on the `preserve_order` feature, which
// any crate in the graph can turn on. Rebuild maps in sorted order instead.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Pretty layout from `PrettyFormatter`, with ASCII escaping and the float
/// notation of the canonical form.
struct CanonicalFormatter {
    pretty: PrettyFormatter<'static>,
}

impl CanonicalFormatter {
    fn new() -> Self {
        Self {
            pretty: PrettyFormatter::with_indent(CANONICAL_INDENT),
        }
    }
}

impl Formatter for CanonicalFormatter {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.pretty.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.pretty.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object_value(writer)
    }

    // Quotes, backslashes and C0 controls are escaped by serde_json before
    // fragments get here; DEL and everything above it is escaped here.
    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut start = 0;
        for (at, ch) in fragment.char_indices() {
            if ch < '\u{7f}' {
                continue;
            }
            writer.write_all(fragment[start..at].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = at + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }

    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        writer.write_all(float_repr(value).as_bytes())
    }
}

/// Shortest round-trip rendering of a finite float: positional notation for
/// `1e-4 <= |x| < 1e16` (always with a fractional part), otherwise
/// `d[.ddd]e±XX`.
fn float_repr(value: f64) -> String {
    // `{:e}` yields the shortest digits that round-trip, e.g. `1.5e-7`.
    let scientific = format!("{:e}", value.abs());
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let point = exponent + 1;

    let mut out = String::new();
    if value.is_sign_negative() {
        out.push('-');
    }
    if -4 < point && point <= 16 {
        if point <= 0 {
            out.push_str("0.");
            out.extend(std::iter::repeat_n('0', point.unsigned_abs() as usize));
            out.push_str(&digits);
        } else {
            let point = point as usize;
            if digits.len() <= point {
                out.push_str(&digits);
                out.extend(std::iter::repeat_n('0', point - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..point]);
                out.push('.');
                out.push_str(&digits[point..]);
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exponent < 0 { '-' } else { '+' };
        out.push_str(&format!("e{sign}{:02}", exponent.unsigned_abs()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::create_evidence_at;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    fn record(payload: Value) -> EvidenceRecord {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        create_evidence_at(payload, now, "0123abcd")
    }

    #[test]
    fn exact_layout() {
        let encoded = CanonicalJson::encode(&record(json!({"b": 2, "a": 1}))).unwrap();
        let expected = r#"{
  "evidence_id": "EV-20240501T120000Z-0123abcd",
  "payload": {
    "a": 1,
    "b": 2
  },
  "timestamp": "2024-05-01T12:00:00.000000Z"
}"#;
        assert_eq!(String::from_utf8(encoded).unwrap(), expected);
    }

    #[test]
    fn independent_of_input_key_order() {
        let first: Value =
            serde_json::from_str(r#"{"z": {"y": 1, "x": [{"q": 1, "p": 2}]}, "a": true}"#).unwrap();
        let second: Value =
            serde_json::from_str(r#"{"a": true, "z": {"x": [{"p": 2, "q": 1}], "y": 1}}"#).unwrap();

        let enc1 = CanonicalJson::encode(&record(first)).unwrap();
        let enc2 = CanonicalJson::encode(&record(second)).unwrap();
        assert_eq!(enc1, enc2);
    }

    #[test]
    fn deterministic_encoding() {
        let rec = record(json!({"action": "approve", "amount": 100}));
        assert_eq!(
            CanonicalJson::encode(&rec).unwrap(),
            CanonicalJson::encode(&rec).unwrap()
        );
    }

    #[test]
    fn nested_keys_are_sorted() {
        let value = json!({"outer": {"b": {"d": 1, "c": 2}, "a": 0}});
        let encoded = CanonicalJson::encode_value(&value).unwrap();
        let text = String::from_utf8(encoded).unwrap();
        let a = text.find("\"a\"").unwrap();
        let b = text.find("\"b\"").unwrap();
        let c = text.find("\"c\"").unwrap();
        let d = text.find("\"d\"").unwrap();
        assert!(a < b && c < d);
    }

    #[test]
    fn roundtrip_preserves_record() {
        let rec = record(json!({"nested": {"list": [1, "two", null]}}));
        let encoded = CanonicalJson::encode(&rec).unwrap();
        let decoded: EvidenceRecord = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn rejects_non_string_map_keys() {
        let mut unserializable = HashMap::new();
        unserializable.insert((1u8, 2u8), "pair-keyed");

        let err = CanonicalJson::encode_value(&unserializable).unwrap_err();
        assert!(matches!(err, EvidenceError::Serialization(_)));
    }

    #[test]
    fn non_ascii_and_floats_use_escaped_layout() {
        let value = json!({
            "approver": "José",
            "ratio": 1.5e-7,
            "big": 1e16,
            "emoji": "\u{1F600}",
            "del": "\u{7f}"
        });
        let encoded = CanonicalJson::encode_value(&value).unwrap();
        let expected = r#"{
  "approver": "Jos\u00e9",
  "big": 1e+16,
  "del": "\u007f",
  "emoji": "\ud83d\ude00",
  "ratio": 1.5e-07
}"#;
        assert_eq!(String::from_utf8(encoded).unwrap(), expected);
    }

    #[test]
    fn escaped_output_parses_back_to_same_text() {
        let rec = record(json!({"city": "Zürich", "note": "línea\nnueva"}));
        let encoded = CanonicalJson::encode(&rec).unwrap();
        assert!(encoded.is_ascii());
        let decoded: EvidenceRecord = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn float_notation() {
        let cases = [
            (0.0, "0.0"),
            (-0.0, "-0.0"),
            (100.0, "100.0"),
            (-0.5, "-0.5"),
            (123.456, "123.456"),
            (0.0001, "0.0001"),
            (0.00001234, "1.234e-05"),
            (1e15, "1000000000000000.0"),
            (1e16, "1e+16"),
            (1e21, "1e+21"),
            (5e-324, "5e-324"),
            (1.7976931348623157e308, "1.7976931348623157e+308"),
        ];
        for (value, expected) in cases {
            assert_eq!(float_repr(value), expected, "{value:e}");
        }
    }
}
