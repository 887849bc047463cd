//! Type-tagged field values used in method arguments and message headers.
//!
//! # Why an explicit variant per wire type? (for beginners)
//!
//! On the wire every value in a field table is preceded by a one-byte tag
//! that says how the following bytes must be read (`'I'` = signed 32-bit
//! integer, `'S'` = long string, `'F'` = nested table, ...).  Modelling each
//! tag as its own enum variant means that decoding and re-encoding a value
//! always produces exactly the same tag: a `U16` stays a `U16`.
//!
//! The one place where a wire type has to be *chosen* rather than preserved
//! is [`FieldValue::from_number`], which keeps the magnitude-based selection
//! that peers of this client already rely on.

use std::collections::BTreeMap;

use serde::Serialize;

/// A field table: short-string keys mapped to type-tagged values.
///
/// A `BTreeMap` keeps encoding deterministic (keys are written in sorted
/// order).
pub type FieldTable = BTreeMap<String, FieldValue>;

/// 2^32, the magnitude boundary used by [`FieldValue::from_number`].
const TWO_POW_32: f64 = 4_294_967_296.0;

/// One type-tagged value inside a field table or field array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// `'V'` – no value.
    Null,
    /// `'t'` – boolean stored as one octet.
    Bool(bool),
    /// `'b'` – signed 8-bit integer.
    I8(i8),
    /// `'B'` – unsigned 8-bit integer.
    U8(u8),
    /// `'s'` – signed 16-bit integer.
    I16(i16),
    /// `'u'` – unsigned 16-bit integer.
    U16(u16),
    /// `'I'` – signed 32-bit integer.
    I32(i32),
    /// `'i'` – unsigned 32-bit integer.
    U32(u32),
    /// `'l'` – signed 64-bit integer.
    I64(i64),
    /// `'f'` – IEEE-754 single precision float.
    F32(f32),
    /// `'d'` – IEEE-754 double precision float.
    F64(f64),
    /// `'S'` – long string (4-byte length prefix).
    Str(String),
    /// `'F'` – nested field table.
    Table(FieldTable),
    /// `'A'` – field array (values without keys).
    Array(Vec<FieldValue>),
    /// `'x'` – raw byte array.
    Bytes(Vec<u8>),
    /// `'T'` – seconds since the Unix epoch, signed so dates before 1970
    /// survive a round trip.
    Timestamp(i64),
    /// `'D'` – decimal: `value / 10^scale`.  Decoded only; encoding a
    /// decimal is rejected with [`crate::ProtocolError::UnsupportedEncoding`].
    Decimal { scale: u8, value: u32 },
}

impl FieldValue {
    /// Picks a wire type for a generic number by magnitude.
    ///
    /// - integral and within ±2^32 (exclusive) → `I32` (values above
    ///   `i32::MAX` wrap, as a 32-bit store does)
    /// - integral and larger → `I64`
    /// - fractional and within ±2^32 → `F32`
    /// - anything else (including NaN and infinities) → `F64`
    ///
    /// Known limitation: the selection is not symmetric with decoding (an
    /// `F32` loses precision, a wrapped `I32` comes back negative).  It is
    /// kept because existing peers expect these tags.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use amqp_wire::FieldValue;
    ///
    /// assert_eq!(FieldValue::from_number(42.0), FieldValue::I32(42));
    /// assert_eq!(FieldValue::from_number(1e10), FieldValue::I64(10_000_000_000));
    /// assert_eq!(FieldValue::from_number(1.5), FieldValue::F32(1.5));
    /// ```
    pub fn from_number(n: f64) -> Self {
        let in_range = -TWO_POW_32 < n && n < TWO_POW_32;
        if n.is_finite() && n.fract() == 0.0 {
            if in_range {
                FieldValue::I32(n as i64 as i32)
            } else {
                FieldValue::I64(n as i64)
            }
        } else if in_range {
            FieldValue::F32(n as f32)
        } else {
            FieldValue::F64(n)
        }
    }

    /// Returns the single-byte wire tag for this value.
    pub fn tag(&self) -> u8 {
        match self {
            FieldValue::Null => b'V',
            FieldValue::Bool(_) => b't',
            FieldValue::I8(_) => b'b',
            FieldValue::U8(_) => b'B',
            FieldValue::I16(_) => b's',
            FieldValue::U16(_) => b'u',
            FieldValue::I32(_) => b'I',
            FieldValue::U32(_) => b'i',
            FieldValue::I64(_) => b'l',
            FieldValue::F32(_) => b'f',
            FieldValue::F64(_) => b'd',
            FieldValue::Str(_) => b'S',
            FieldValue::Table(_) => b'F',
            FieldValue::Array(_) => b'A',
            FieldValue::Bytes(_) => b'x',
            FieldValue::Timestamp(_) => b'T',
            FieldValue::Decimal { .. } => b'D',
        }
    }

    /// Returns the string payload if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the decimal as a float (`value / 10^scale`).
    pub fn decimal_as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Decimal { scale, value } => {
                Some(f64::from(*value) / 10f64.powi(i32::from(*scale)))
            }
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I32(v)
    }
}

impl From<i64> for FieldValue {
    /// Same magnitude rule as [`FieldValue::from_number`] for integers.
    fn from(v: i64) -> Self {
        if -(1i64 << 32) < v && v < (1i64 << 32) {
            FieldValue::I32(v as i32)
        } else {
            FieldValue::I64(v)
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::from_number(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<FieldTable> for FieldValue {
    fn from(v: FieldTable) -> Self {
        FieldValue::Table(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::Array(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
