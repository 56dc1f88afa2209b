//! Decoded scalar values and their textual previews.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_type::BuiltinType;

/// Joined field previews stop growing once they reach this many characters.
pub const MAX_PREVIEW_LENGTH: usize = 24;

/// Preview shown for a field that has not been resolved yet.
pub const NOT_LOADED_PREVIEW: &str = "<?>";

/// Preview shown for a field whose presence condition is false.
pub const NOT_PRESENT_PREVIEW: &str = "<not present>";

/// A single scalar element decoded from file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    /// A padding byte. Has no value and no preview.
    Pad,
    /// A raw character byte.
    Char(u8),
    /// An integer, sign or zero extended to 64 bits.
    Int(i64),
    /// A float, widened to 64 bits.
    Float(f64),
}

impl ScalarValue {
    /// Decode one element of type `ty` from the front of `bytes`.
    ///
    /// `bytes` must hold at least `ty.size()` bytes.
    pub fn decode(ty: BuiltinType, bytes: &[u8]) -> Self {
        match ty {
            BuiltinType::Pad => ScalarValue::Pad,
            BuiltinType::Char => ScalarValue::Char(bytes[0]),
            BuiltinType::Int(int_type) => ScalarValue::Int(int_type.decode(bytes)),
            BuiltinType::F32 => {
                let bits = [bytes[0], bytes[1], bytes[2], bytes[3]];
                ScalarValue::Float(f32::from_le_bytes(bits) as f64)
            }
            BuiltinType::F64 => {
                let mut bits = [0; 8];
                bits.copy_from_slice(&bytes[..8]);
                ScalarValue::Float(f64::from_le_bytes(bits))
            }
        }
    }

    /// The integer interpretation of the value.
    ///
    /// Characters are treated as signed bytes and floats are truncated toward zero.
    pub fn to_int(&self) -> i64 {
        match *self {
            ScalarValue::Pad => 0,
            ScalarValue::Char(c) => c as i8 as i64,
            ScalarValue::Int(n) => n,
            ScalarValue::Float(x) => x as i64,
        }
    }

    /// Append the element preview to `out`.
    pub fn write_preview(&self, out: &mut String) {
        match *self {
            ScalarValue::Pad => {}
            ScalarValue::Char(c) => push_escaped_char(out, c),
            ScalarValue::Int(n) => out.push_str(&n.to_string()),
            ScalarValue::Float(x) => out.push_str(&x.to_string()),
        }
    }

    /// The element preview as an owned string.
    pub fn preview(&self) -> String {
        let mut out = String::new();
        self.write_preview(&mut out);
        out
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.preview())
    }
}

/// Push a printable character as is, and anything else as `\xNN`.
pub fn push_escaped_char(out: &mut String, c: u8) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    if (0x20..0x7f).contains(&c) {
        out.push(c as char);
    } else {
        out.push('\\');
        out.push('x');
        out.push(HEX[(c >> 4) as usize] as char);
        out.push(HEX[(c & 15) as usize] as char);
    }
}

/// Join element previews into a single field preview.
///
/// Elements are appended until the text reaches [MAX_PREVIEW_LENGTH]. If the result
/// overflows the limit or nothing was produced, `...` is appended.
pub fn join_previews<I>(separated: bool, previews: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut joined = String::new();
    for (n, preview) in previews.into_iter().enumerate() {
        if preview.is_empty() {
            break;
        }
        if n > 0 && separated {
            joined.push_str(", ");
        }
        joined.push_str(&preview);
        if joined.len() >= MAX_PREVIEW_LENGTH {
            break;
        }
    }
    if joined.len() > MAX_PREVIEW_LENGTH || joined.is_empty() {
        joined.push_str("...");
    }
    joined
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::IntType;

    #[test]
    fn test_decode() {
        let bytes = 5i32.to_le_bytes();
        let value = ScalarValue::decode(BuiltinType::Int(IntType::I32), &bytes);
        assert_eq!(value, ScalarValue::Int(5));
        assert_eq!(value.preview(), "5");

        let bytes = (-2.75f32).to_le_bytes();
        let value = ScalarValue::decode(BuiltinType::F32, &bytes);
        assert_eq!(value.to_int(), -2);
        assert_eq!(value.preview(), "-2.75");

        assert_eq!(ScalarValue::decode(BuiltinType::Pad, &[7]).preview(), "");
        assert_eq!(ScalarValue::Char(0xff).to_int(), -1);
    }

    #[test]
    fn test_char_escape() {
        let mut out = String::new();
        for &c in b"A\n\x7f~" {
            push_escaped_char(&mut out, c);
        }
        assert_eq!(out, "A\\x0a\\x7f~");
    }

    #[test]
    fn test_join_previews() {
        let short = join_previews(true, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(short, "1, 2");

        let chars = join_previews(false, "abc".chars().map(|c| c.to_string()));
        assert_eq!(chars, "abc");

        let long = join_previews(true, (0..100).map(|n| (n * 1000).to_string()));
        assert!(long.ends_with("..."));
        assert!(long.len() <= MAX_PREVIEW_LENGTH + 3 + 8);

        assert_eq!(join_previews(true, Vec::new()), "...");
    }
}
