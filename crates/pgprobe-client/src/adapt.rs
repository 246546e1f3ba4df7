//! Adapting Rust values for the server
//!
//! A [`Value`] can reach PostgreSQL two ways:
//!
//! - **quoted**: rendered as a SQL literal and spliced into the query text
//!   (plain cursor, client-side interpolation);
//! - **bound**: sent out-of-band as a typed parameter in binary format
//!   (binary cursor, `$N` placeholders).
//!
//! ```
//! use pgprobe_client::Value;
//!
//! let v = Value::from("O'Reilly");
//! assert_eq!(v.quoted().unwrap(), "'O''Reilly'");
//! assert_eq!(v.pg_type(), postgres_types::Type::TEXT);
//! ```

use crate::error::{Error, Result};
use crate::types::Value;
use bytes::{BufMut, BytesMut};
use postgres_types::{to_sql_checked, IsNull, Kind, ToSql, Type};
use std::error::Error as StdError;
use std::fmt::Write as _;

type BoxError = Box<dyn StdError + Sync + Send>;

impl Value {
    /// Render the value as a SQL literal
    pub fn quoted(&self) -> Result<String> {
        let literal = match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(i) => quote_number(i64::from(*i)),
            Value::BigInt(i) => quote_number(*i),
            Value::Float(f) => {
                if f.is_nan() {
                    "'NaN'::float8".to_string()
                } else if f.is_infinite() {
                    let sign = if *f > 0.0 { "" } else { "-" };
                    format!("'{}Infinity'::float8", sign)
                } else if *f < 0.0 {
                    format!(" {:?}", f)
                } else {
                    format!("{:?}", f)
                }
            }
            Value::Numeric(s) => {
                // validates the text as well
                NumericDigits::parse(s)?;
                format!("{}::numeric", quote_text(s)?)
            }
            Value::Text(s) => quote_text(s)?,
            Value::Bytes(b) => {
                let mut literal = String::with_capacity(b.len() * 2 + 16);
                literal.push_str("E'\\\\x");
                for byte in b {
                    let _ = write!(literal, "{:02x}", byte);
                }
                literal.push_str("'::bytea");
                literal
            }
            Value::Uuid(u) => format!("'{}'::uuid", u),
            Value::Date(_) => format!("'{}'::date", self),
            Value::Timestamp(_) => format!("'{}'::timestamp", self),
            Value::TimestampTz(_) => format!("'{}'::timestamptz", self),
            Value::Json(j) => format!("{}::jsonb", quote_text(&j.to_string())?),
            Value::Array(items) => {
                if items.is_empty() {
                    "'{}'".to_string()
                } else {
                    let parts = items
                        .iter()
                        .map(|item| item.quoted().map(|q| q.trim_start().to_string()))
                        .collect::<Result<Vec<_>>>()?;
                    format!("ARRAY[{}]", parts.join(","))
                }
            }
        };
        Ok(literal)
    }

    /// Parameter type declared to the server when binding this value
    pub fn pg_type(&self) -> Type {
        match self {
            Value::Null => Type::UNKNOWN,
            Value::Bool(_) => Type::BOOL,
            Value::Int(_) => Type::INT4,
            Value::BigInt(_) => Type::INT8,
            Value::Float(_) => Type::FLOAT8,
            Value::Numeric(_) => Type::NUMERIC,
            Value::Text(_) => Type::TEXT,
            Value::Bytes(_) => Type::BYTEA,
            Value::Uuid(_) => Type::UUID,
            Value::Date(_) => Type::DATE,
            Value::Timestamp(_) => Type::TIMESTAMP,
            Value::TimestampTz(_) => Type::TIMESTAMPTZ,
            Value::Json(_) => Type::JSONB,
            Value::Array(items) => array_type(items),
        }
    }

    /// Encode the value as a bound parameter of its declared type
    ///
    /// Returns `None` for NULL.
    pub fn encode_binary(&self) -> Result<Option<Vec<u8>>> {
        let ty = self.pg_type();
        let mut buf = BytesMut::new();
        match self
            .to_sql(&ty, &mut buf)
            .map_err(|e| Error::Encode(e.to_string()))?
        {
            IsNull::Yes => Ok(None),
            IsNull::No => Ok(Some(buf.to_vec())),
        }
    }

    /// Human-readable binding: declared type plus payload in hex
    pub fn describe_binding(&self) -> Result<String> {
        let ty = self.pg_type();
        match self.encode_binary()? {
            None => Ok(format!("{} NULL", ty.name())),
            Some(bytes) => {
                let mut out = format!("{} [{} bytes] ", ty.name(), bytes.len());
                for byte in &bytes {
                    let _ = write!(out, "{:02x}", byte);
                }
                Ok(out)
            }
        }
    }
}

fn quote_number(i: i64) -> String {
    // keeps "x - -1" from turning into a comment
    if i < 0 {
        format!(" {}", i)
    } else {
        i.to_string()
    }
}

fn quote_text(s: &str) -> Result<String> {
    if s.contains('\0') {
        return Err(Error::Encode(
            "A string literal cannot contain NUL (0x00) characters".to_string(),
        ));
    }

    let escape_backslashes = s.contains('\\');
    let mut out = String::with_capacity(s.len() + 3);
    if escape_backslashes {
        out.push('E');
    }
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if escape_backslashes => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    Ok(out)
}

fn array_type(items: &[Value]) -> Type {
    let mut element: Option<Type> = None;
    for item in items {
        let ty = match item {
            Value::Null => continue,
            Value::Array(inner) => match array_type(inner).kind() {
                Kind::Array(member) => member.clone(),
                _ => continue,
            },
            other => other.pg_type(),
        };
        element = Some(match element {
            // int and bigint mix into bigint
            Some(prev) if prev == Type::INT4 && ty == Type::INT8 => Type::INT8,
            Some(prev) => prev,
            None => ty,
        });
    }

    match element.unwrap_or(Type::TEXT) {
        t if t == Type::BOOL => Type::BOOL_ARRAY,
        t if t == Type::INT4 => Type::INT4_ARRAY,
        t if t == Type::INT8 => Type::INT8_ARRAY,
        t if t == Type::FLOAT8 => Type::FLOAT8_ARRAY,
        t if t == Type::NUMERIC => Type::NUMERIC_ARRAY,
        t if t == Type::BYTEA => Type::BYTEA_ARRAY,
        t if t == Type::UUID => Type::UUID_ARRAY,
        t if t == Type::DATE => Type::DATE_ARRAY,
        t if t == Type::TIMESTAMP => Type::TIMESTAMP_ARRAY,
        t if t == Type::TIMESTAMPTZ => Type::TIMESTAMPTZ_ARRAY,
        t if t == Type::JSONB => Type::JSONB_ARRAY,
        _ => Type::TEXT_ARRAY,
    }
}

fn is_text_like(ty: &Type) -> bool {
    [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN].contains(ty)
}

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    format!("cannot bind {} value as {}", value.kind(), ty.name()).into()
}

fn encode_int(
    v: i64,
    value: &Value,
    ty: &Type,
    out: &mut BytesMut,
) -> std::result::Result<IsNull, BoxError> {
    let out_of_range = || format!("{} is out of range for {}", v, ty.name());
    match *ty {
        Type::INT2 => out.put_i16(i16::try_from(v).map_err(|_| out_of_range())?),
        Type::INT4 => out.put_i32(i32::try_from(v).map_err(|_| out_of_range())?),
        Type::INT8 => out.put_i64(v),
        Type::OID => out.put_u32(u32::try_from(v).map_err(|_| out_of_range())?),
        Type::FLOAT4 => out.put_f32(v as f32),
        Type::FLOAT8 => out.put_f64(v as f64),
        Type::NUMERIC => NumericDigits::parse(&v.to_string())?.write(out),
        _ => return Err(mismatch(value, ty)),
    }
    Ok(IsNull::No)
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }

        // the server resolved a text parameter: send our text form
        if is_text_like(ty) {
            return match self {
                Value::Text(s) => s.as_str().to_sql(ty, out),
                Value::Array(_) | Value::Bytes(_) => Err(mismatch(self, ty)),
                other => other.to_string().as_str().to_sql(ty, out),
            };
        }

        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) if *ty == Type::BOOL => b.to_sql(ty, out),
            Value::Int(i) => encode_int(i64::from(*i), self, ty, out),
            Value::BigInt(i) => encode_int(*i, self, ty, out),
            Value::Float(f) => match *ty {
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::NUMERIC => {
                    let digits = if f.is_nan() {
                        NumericDigits::nan()
                    } else {
                        NumericDigits::parse(&f.to_string())?
                    };
                    digits.write(out);
                    Ok(IsNull::No)
                }
                _ => Err(mismatch(self, ty)),
            },
            Value::Numeric(s) => match *ty {
                Type::NUMERIC => {
                    NumericDigits::parse(s)?.write(out);
                    Ok(IsNull::No)
                }
                Type::FLOAT8 => s.parse::<f64>()?.to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Text(s) if *ty == Type::JSON || *ty == Type::JSONB => {
                let json: serde_json::Value = serde_json::from_str(s)?;
                json.to_sql(ty, out)
            }
            Value::Bytes(b) if *ty == Type::BYTEA => b.as_slice().to_sql(ty, out),
            Value::Uuid(u) if *ty == Type::UUID => u.to_sql(ty, out),
            Value::Date(d) if *ty == Type::DATE => d.to_sql(ty, out),
            Value::Timestamp(ts) if *ty == Type::TIMESTAMP => ts.to_sql(ty, out),
            Value::TimestampTz(ts) if *ty == Type::TIMESTAMPTZ => ts.to_sql(ty, out),
            Value::Json(j) if *ty == Type::JSON || *ty == Type::JSONB => j.to_sql(ty, out),
            Value::Array(items) => match ty.kind() {
                Kind::Array(_) => {
                    if items.iter().any(|item| matches!(item, Value::Array(_))) {
                        return Err("nested arrays cannot be bound as parameters".into());
                    }
                    items.as_slice().to_sql(ty, out)
                }
                _ => Err(mismatch(self, ty)),
            },
            _ => Err(mismatch(self, ty)),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Binary `numeric`: base-10000 digits with weight, sign and display scale
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NumericDigits {
    pub weight: i16,
    pub sign: u16,
    pub dscale: u16,
    pub digits: Vec<i16>,
}

impl NumericDigits {
    fn nan() -> Self {
        Self {
            weight: 0,
            sign: NUMERIC_NAN,
            dscale: 0,
            digits: Vec::new(),
        }
    }

    /// Parse plain decimal text (`-12.50`, `NaN`, `Infinity`)
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let special = |sign| Self {
            sign,
            ..Self::nan()
        };
        match text.to_ascii_lowercase().as_str() {
            "nan" => return Ok(special(NUMERIC_NAN)),
            "infinity" | "+infinity" | "inf" => return Ok(special(NUMERIC_PINF)),
            "-infinity" | "-inf" => return Ok(special(NUMERIC_NINF)),
            _ => {}
        }

        let invalid = || Error::Encode(format!("invalid numeric value: '{}'", text));

        let (negative, unsigned) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_part) || !all_digits(frac_part) {
            return Err(invalid());
        }

        let dscale = u16::try_from(frac_part.len()).map_err(|_| invalid())?;

        // left-pad the integer part and right-pad the fraction to whole groups
        let int_pad = (4 - int_part.len() % 4) % 4;
        let frac_pad = (4 - frac_part.len() % 4) % 4;
        let padded_int = format!("{}{}", "0".repeat(int_pad), int_part);
        let padded_frac = format!("{}{}", frac_part, "0".repeat(frac_pad));

        let group = |chunk: &[u8]| -> i16 {
            chunk.iter().fold(0i16, |acc, d| acc * 10 + i16::from(d - b'0'))
        };
        let int_groups: Vec<i16> = padded_int.as_bytes().chunks(4).map(group).collect();
        let frac_groups: Vec<i16> = padded_frac.as_bytes().chunks(4).map(group).collect();

        let mut weight = int_groups.len() as i32 - 1;
        let mut digits: Vec<i16> = int_groups.into_iter().chain(frac_groups).collect();

        while digits.first() == Some(&0) {
            digits.remove(0);
            weight -= 1;
        }
        while digits.last() == Some(&0) {
            digits.pop();
        }

        if digits.is_empty() {
            return Ok(Self {
                weight: 0,
                sign: NUMERIC_POS,
                dscale,
                digits,
            });
        }

        Ok(Self {
            weight: i16::try_from(weight).map_err(|_| invalid())?,
            sign: if negative { NUMERIC_NEG } else { NUMERIC_POS },
            dscale,
            digits,
        })
    }

    /// Decode from the wire format
    pub(crate) fn from_wire(raw: &[u8]) -> Result<Self> {
        let bad = |msg: &str| Error::decode("numeric", msg);
        if raw.len() < 8 {
            return Err(bad("header too short"));
        }
        let read_u16 = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
        let ndigits = read_u16(0) as usize;
        if raw.len() != 8 + ndigits * 2 {
            return Err(bad("length does not match digit count"));
        }
        let digits = (0..ndigits)
            .map(|i| read_u16(8 + i * 2) as i16)
            .collect();
        Ok(Self {
            weight: read_u16(2) as i16,
            sign: read_u16(4),
            dscale: read_u16(6),
            digits,
        })
    }

    pub(crate) fn write(&self, out: &mut BytesMut) {
        out.put_u16(self.digits.len() as u16);
        out.put_i16(self.weight);
        out.put_u16(self.sign);
        out.put_u16(self.dscale);
        for digit in &self.digits {
            out.put_i16(*digit);
        }
    }

    /// Exact decimal text
    pub(crate) fn to_text(&self) -> String {
        match self.sign {
            NUMERIC_NAN => return "NaN".to_string(),
            NUMERIC_PINF => return "Infinity".to_string(),
            NUMERIC_NINF => return "-Infinity".to_string(),
            _ => {}
        }

        let weight = i32::from(self.weight);
        let digit_at = |exp: i32| -> i16 {
            let idx = weight - exp;
            if idx >= 0 && (idx as usize) < self.digits.len() {
                self.digits[idx as usize]
            } else {
                0
            }
        };

        let mut out = String::new();
        if self.sign == NUMERIC_NEG {
            out.push('-');
        }
        if weight < 0 {
            out.push('0');
        } else {
            for exp in (0..=weight).rev() {
                if exp == weight {
                    let _ = write!(out, "{}", digit_at(exp));
                } else {
                    let _ = write!(out, "{:04}", digit_at(exp));
                }
            }
        }

        let dscale = usize::from(self.dscale);
        if dscale > 0 {
            let mut frac = String::with_capacity(dscale + 4);
            let mut exp = -1;
            while frac.len() < dscale {
                let _ = write!(frac, "{:04}", digit_at(exp));
                exp -= 1;
            }
            frac.truncate(dscale);
            out.push('.');
            out.push_str(&frac);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use uuid::Uuid;

    #[test]
    fn test_quote_text_doubles_quotes() {
        assert_eq!(Value::from("O'Reilly").quoted().unwrap(), "'O''Reilly'");
        assert_eq!(Value::from("plain").quoted().unwrap(), "'plain'");
    }

    #[test]
    fn test_quote_text_with_backslash_uses_escape_string() {
        assert_eq!(Value::from(r"a\b").quoted().unwrap(), r"E'a\\b'");
    }

    #[test]
    fn test_quote_rejects_nul() {
        assert!(matches!(
            Value::from("a\0b").quoted(),
            Err(Error::Encode(_))
        ));
    }

    #[test]
    fn test_quote_scalars() {
        assert_eq!(Value::Null.quoted().unwrap(), "NULL");
        assert_eq!(Value::Bool(true).quoted().unwrap(), "true");
        assert_eq!(Value::Int(-3).quoted().unwrap(), " -3");
        assert_eq!(Value::BigInt(1 << 40).quoted().unwrap(), "1099511627776");
        assert_eq!(Value::Float(1.0).quoted().unwrap(), "1.0");
        assert_eq!(Value::Float(f64::NAN).quoted().unwrap(), "'NaN'::float8");
        assert_eq!(
            Value::Float(f64::NEG_INFINITY).quoted().unwrap(),
            "'-Infinity'::float8"
        );
        assert_eq!(
            Value::Bytes(vec![0, 255]).quoted().unwrap(),
            r"E'\\x00ff'::bytea"
        );
    }

    #[test]
    fn test_quote_uuid_and_timestamp() {
        let u = Uuid::parse_str("9c6d5a77-7256-457e-9461-347b4358e350").unwrap();
        assert_eq!(
            Value::Uuid(u).quoted().unwrap(),
            "'9c6d5a77-7256-457e-9461-347b4358e350'::uuid"
        );
        assert_eq!(
            Value::Timestamp(datetime!(2010-11-12 13:14:15)).quoted().unwrap(),
            "'2010-11-12 13:14:15'::timestamp"
        );
    }

    #[test]
    fn test_quote_arrays() {
        let v = Value::from(vec![1, -2, 3]);
        assert_eq!(v.quoted().unwrap(), "ARRAY[1,-2,3]");
        assert_eq!(Value::Array(vec![]).quoted().unwrap(), "'{}'");
        let nested = Value::Array(vec![Value::from(vec!["a"]), Value::from(vec!["b"])]);
        assert_eq!(nested.quoted().unwrap(), "ARRAY[ARRAY['a'],ARRAY['b']]");
    }

    #[test]
    fn test_declared_types() {
        assert_eq!(Value::Null.pg_type(), Type::UNKNOWN);
        assert_eq!(Value::Int(1).pg_type(), Type::INT4);
        assert_eq!(Value::BigInt(1).pg_type(), Type::INT8);
        assert_eq!(Value::from(vec![1i32, 2]).pg_type(), Type::INT4_ARRAY);
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::BigInt(2)]).pg_type(),
            Type::INT8_ARRAY
        );
        assert_eq!(Value::Array(vec![]).pg_type(), Type::TEXT_ARRAY);
        assert_eq!(Value::from(vec!["x"]).pg_type(), Type::TEXT_ARRAY);
    }

    #[test]
    fn test_int_coerces_to_resolved_type() {
        let mut buf = BytesMut::new();
        Value::Int(7).to_sql(&Type::INT8, &mut buf).unwrap();
        assert_eq!(&buf[..], &7i64.to_be_bytes());

        let mut buf = BytesMut::new();
        Value::Int(7).to_sql(&Type::TEXT, &mut buf).unwrap();
        assert_eq!(&buf[..], b"7");

        let mut buf = BytesMut::new();
        assert!(Value::BigInt(1 << 40).to_sql(&Type::INT4, &mut buf).is_err());
    }

    #[test]
    fn test_bool_does_not_bind_as_int() {
        let mut buf = BytesMut::new();
        assert!(Value::Bool(true).to_sql(&Type::INT4, &mut buf).is_err());
    }

    #[test]
    fn test_encode_binary_int_and_null() {
        assert_eq!(
            Value::Int(42).encode_binary().unwrap(),
            Some(vec![0, 0, 0, 42])
        );
        assert_eq!(Value::Null.encode_binary().unwrap(), None);
        assert_eq!(
            Value::Int(42).describe_binding().unwrap(),
            "int4 [4 bytes] 0000002a"
        );
    }

    #[test]
    fn test_encode_binary_array() {
        let bytes = Value::from(vec![1i32, 2]).encode_binary().unwrap().unwrap();
        // ndim=1, no nulls, element oid 23, len 2, lower bound 1
        assert_eq!(&bytes[..4], &1i32.to_be_bytes());
        assert_eq!(&bytes[8..12], &23u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &2i32.to_be_bytes());
        assert_eq!(bytes.len(), 20 + 2 * 8);
    }

    #[test]
    fn test_nested_array_binding_is_rejected() {
        let nested = Value::Array(vec![Value::from(vec![1]), Value::from(vec![2])]);
        assert!(matches!(nested.encode_binary(), Err(Error::Encode(_))));
    }

    #[test]
    fn test_numeric_parse_and_format() {
        for text in ["0", "1", "-123.4500", "100000", "0.0005", "12345678.9", "NaN"] {
            let digits = NumericDigits::parse(text).unwrap();
            assert_eq!(digits.to_text(), text, "numeric {}", text);
        }
        let digits = NumericDigits::parse("100000").unwrap();
        assert_eq!(digits.digits, vec![10]);
        assert_eq!(digits.weight, 1);
    }

    #[test]
    fn test_numeric_wire_layout() {
        let mut buf = BytesMut::new();
        NumericDigits::parse("-1.5").unwrap().write(&mut buf);
        // ndigits=2 weight=0 sign=neg dscale=1 digits=[1, 5000]
        assert_eq!(
            &buf[..],
            &[0, 2, 0, 0, 0x40, 0, 0, 1, 0, 1, 0x13, 0x88]
        );
        let back = NumericDigits::from_wire(&buf).unwrap();
        assert_eq!(back.to_text(), "-1.5");
    }

    #[test]
    fn test_numeric_rejects_garbage() {
        assert!(NumericDigits::parse("1e5").is_err());
        assert!(NumericDigits::parse("12a").is_err());
        assert!(NumericDigits::parse(".").is_err());
        assert!(Value::Numeric("1; DROP TABLE x".to_string()).quoted().is_err());
    }
}
