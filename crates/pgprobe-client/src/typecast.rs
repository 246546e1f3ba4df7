//! Binary result typecasters
//!
//! The binary cursor receives every column in PostgreSQL's binary format and
//! turns it into a [`Value`] with a caster looked up by type OID. Lookups go
//! cursor first, then connection, then the built-in table; an OID nobody
//! registered is an error rather than a guess.

use crate::adapt::NumericDigits;
use crate::error::{Error, Result};
use crate::types::Value;
use postgres_protocol::types as wire;
use postgres_types::Type;
use std::collections::HashMap;
use std::sync::OnceLock;
use time::macros::datetime;
use time::{Duration, PrimitiveDateTime, UtcOffset};
use uuid::Uuid;

/// Converts one non-NULL binary column value
pub type Caster = fn(&[u8], &CastContext<'_>) -> Result<Value>;

const PG_EPOCH: PrimitiveDateTime = datetime!(2000-01-01 0:00);

/// OID → caster table
#[derive(Clone, Default)]
pub struct CastRegistry {
    casters: HashMap<u32, Caster>,
}

impl std::fmt::Debug for CastRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut oids: Vec<&u32> = self.casters.keys().collect();
        oids.sort();
        f.debug_struct("CastRegistry").field("oids", &oids).finish()
    }
}

impl CastRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in casters
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_types(&[Type::BOOL], cast_bool);
        registry.register_types(&[Type::INT2], cast_int2);
        registry.register_types(&[Type::INT4], cast_int4);
        registry.register_types(&[Type::INT8], cast_int8);
        registry.register_types(&[Type::OID], cast_oid);
        registry.register_types(&[Type::FLOAT4], cast_float4);
        registry.register_types(&[Type::FLOAT8], cast_float8);
        registry.register_types(&[Type::NUMERIC], cast_numeric);
        registry.register_types(
            &[Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN],
            cast_text,
        );
        registry.register_types(&[Type::CHAR], cast_char);
        registry.register_types(&[Type::BYTEA], cast_bytea);
        registry.register_types(&[Type::UUID], cast_uuid);
        registry.register_types(&[Type::DATE], cast_date);
        registry.register_types(&[Type::TIMESTAMP], cast_timestamp);
        registry.register_types(&[Type::TIMESTAMPTZ], cast_timestamptz);
        registry.register_types(&[Type::JSON], cast_json);
        registry.register_types(&[Type::JSONB], cast_jsonb);

        registry.register_types(
            &[
                Type::BOOL_ARRAY,
                Type::INT2_ARRAY,
                Type::INT4_ARRAY,
                Type::INT8_ARRAY,
                Type::OID_ARRAY,
                Type::FLOAT4_ARRAY,
                Type::FLOAT8_ARRAY,
                Type::NUMERIC_ARRAY,
                Type::TEXT_ARRAY,
                Type::VARCHAR_ARRAY,
                Type::BPCHAR_ARRAY,
                Type::NAME_ARRAY,
                Type::CHAR_ARRAY,
                Type::BYTEA_ARRAY,
                Type::UUID_ARRAY,
                Type::DATE_ARRAY,
                Type::TIMESTAMP_ARRAY,
                Type::TIMESTAMPTZ_ARRAY,
                Type::JSON_ARRAY,
                Type::JSONB_ARRAY,
            ],
            cast_array,
        );

        registry
    }

    /// Register (or replace) the caster for an OID
    pub fn register(&mut self, oid: u32, caster: Caster) {
        self.casters.insert(oid, caster);
    }

    fn register_types(&mut self, types: &[Type], caster: Caster) {
        for ty in types {
            self.register(ty.oid(), caster);
        }
    }

    pub fn get(&self, oid: u32) -> Option<Caster> {
        self.casters.get(&oid).copied()
    }

    pub fn len(&self) -> usize {
        self.casters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.casters.is_empty()
    }
}

/// The process-wide built-in casters
pub fn builtins() -> &'static CastRegistry {
    static BUILTINS: OnceLock<CastRegistry> = OnceLock::new();
    BUILTINS.get_or_init(CastRegistry::with_builtins)
}

/// Cursor → connection → built-in lookup chain
#[derive(Debug, Clone, Copy)]
pub struct CastChain<'a> {
    cursor: Option<&'a CastRegistry>,
    connection: Option<&'a CastRegistry>,
}

impl<'a> CastChain<'a> {
    pub fn new(cursor: Option<&'a CastRegistry>, connection: Option<&'a CastRegistry>) -> Self {
        Self { cursor, connection }
    }

    /// Only the built-in casters
    pub fn builtin() -> Self {
        Self::new(None, None)
    }

    /// Most specific caster for `oid`
    pub fn lookup(&self, oid: u32) -> Result<Caster> {
        self.cursor
            .and_then(|r| r.get(oid))
            .or_else(|| self.connection.and_then(|r| r.get(oid)))
            .or_else(|| builtins().get(oid))
            .ok_or(Error::Typecast { oid })
    }

    /// Decode one column value, NULL included
    pub fn cast(&self, oid: u32, raw: Option<&[u8]>) -> Result<Value> {
        match raw {
            None => Ok(Value::Null),
            Some(raw) => {
                let caster = self.lookup(oid)?;
                caster(raw, &CastContext { oid, chain: *self })
            }
        }
    }
}

/// What a caster knows about the value it is decoding
#[derive(Debug, Clone, Copy)]
pub struct CastContext<'a> {
    pub oid: u32,
    pub chain: CastChain<'a>,
}

impl CastContext<'_> {
    /// Type name for messages, `oid N` for types tokio-postgres doesn't know
    pub fn type_name(&self) -> String {
        Type::from_oid(self.oid)
            .map(|t| t.name().to_string())
            .unwrap_or_else(|| format!("oid {}", self.oid))
    }

    fn fail(&self, message: impl std::fmt::Display) -> Error {
        Error::decode(&self.type_name(), message)
    }
}

fn cast_bool(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::bool_from_sql(raw).map(Value::Bool).map_err(|e| ctx.fail(e))
}

fn cast_int2(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::int2_from_sql(raw)
        .map(|v| Value::Int(i32::from(v)))
        .map_err(|e| ctx.fail(e))
}

fn cast_int4(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::int4_from_sql(raw).map(Value::Int).map_err(|e| ctx.fail(e))
}

fn cast_int8(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::int8_from_sql(raw).map(Value::BigInt).map_err(|e| ctx.fail(e))
}

fn cast_oid(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::oid_from_sql(raw)
        .map(|v| Value::BigInt(i64::from(v)))
        .map_err(|e| ctx.fail(e))
}

fn cast_float4(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::float4_from_sql(raw)
        .map(|v| Value::Float(f64::from(v)))
        .map_err(|e| ctx.fail(e))
}

fn cast_float8(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::float8_from_sql(raw).map(Value::Float).map_err(|e| ctx.fail(e))
}

fn cast_numeric(raw: &[u8], _ctx: &CastContext<'_>) -> Result<Value> {
    NumericDigits::from_wire(raw).map(|n| Value::Numeric(n.to_text()))
}

fn cast_text(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::text_from_sql(raw)
        .map(|s| Value::Text(s.to_string()))
        .map_err(|e| ctx.fail(e))
}

fn cast_char(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::char_from_sql(raw)
        .map(|c| Value::Text(char::from(c as u8).to_string()))
        .map_err(|e| ctx.fail(e))
}

fn cast_bytea(raw: &[u8], _ctx: &CastContext<'_>) -> Result<Value> {
    Ok(Value::Bytes(wire::bytea_from_sql(raw).to_vec()))
}

fn cast_uuid(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    wire::uuid_from_sql(raw)
        .map(|bytes| Value::Uuid(Uuid::from_bytes(bytes)))
        .map_err(|e| ctx.fail(e))
}

fn cast_date(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    let days = wire::date_from_sql(raw).map_err(|e| ctx.fail(e))?;
    match days {
        i32::MAX => Ok(Value::Text("infinity".to_string())),
        i32::MIN => Ok(Value::Text("-infinity".to_string())),
        days => PG_EPOCH
            .date()
            .checked_add(Duration::days(i64::from(days)))
            .map(Value::Date)
            .ok_or_else(|| ctx.fail(format!("{} days is out of range", days))),
    }
}

fn decode_timestamp(raw: &[u8], ctx: &CastContext<'_>) -> Result<Option<PrimitiveDateTime>> {
    let micros = wire::timestamp_from_sql(raw).map_err(|e| ctx.fail(e))?;
    match micros {
        i64::MAX | i64::MIN => Ok(None),
        micros => PG_EPOCH
            .checked_add(Duration::microseconds(micros))
            .map(Some)
            .ok_or_else(|| ctx.fail(format!("{} microseconds is out of range", micros))),
    }
}

fn infinity(raw: &[u8]) -> Value {
    // i64::MAX is +infinity; its first byte is 0x7f
    if raw.first() == Some(&0x7f) {
        Value::Text("infinity".to_string())
    } else {
        Value::Text("-infinity".to_string())
    }
}

fn cast_timestamp(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    Ok(decode_timestamp(raw, ctx)?
        .map(Value::Timestamp)
        .unwrap_or_else(|| infinity(raw)))
}

fn cast_timestamptz(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    Ok(decode_timestamp(raw, ctx)?
        .map(|ts| Value::TimestampTz(ts.assume_offset(UtcOffset::UTC)))
        .unwrap_or_else(|| infinity(raw)))
}

fn cast_json(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    serde_json::from_slice(raw)
        .map(Value::Json)
        .map_err(|e| ctx.fail(e))
}

fn cast_jsonb(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    match raw.split_first() {
        Some((1, body)) => cast_json(body, ctx),
        Some((version, _)) => Err(ctx.fail(format!("unsupported jsonb version {}", version))),
        None => Err(ctx.fail("empty jsonb value")),
    }
}

struct ArrayReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ArrayReader<'a> {
    fn i32(&mut self) -> Option<i32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(bytes)
    }
}

/// Arrays: header, dimensions, then length-prefixed elements in row-major order
fn cast_array(raw: &[u8], ctx: &CastContext<'_>) -> Result<Value> {
    let truncated = || ctx.fail("truncated array");
    let mut reader = ArrayReader { buf: raw, pos: 0 };

    let ndim = reader.i32().ok_or_else(truncated)?;
    let _has_nulls = reader.i32().ok_or_else(truncated)?;
    let element_oid = reader.i32().ok_or_else(truncated)? as u32;
    if ndim < 0 {
        return Err(ctx.fail(format!("invalid dimension count {}", ndim)));
    }

    // each dimension header is 8 bytes
    let mut dims = Vec::with_capacity((ndim as usize).min(raw.len() / 8));
    for _ in 0..ndim {
        let len = reader.i32().ok_or_else(truncated)?;
        let _lower_bound = reader.i32().ok_or_else(truncated)?;
        if len < 0 {
            return Err(ctx.fail(format!("invalid dimension length {}", len)));
        }
        dims.push(len as usize);
    }

    let total = if dims.is_empty() {
        0
    } else {
        dims.iter()
            .try_fold(1usize, |acc, &len| acc.checked_mul(len))
            .ok_or_else(|| ctx.fail("array dimensions overflow"))?
    };
    // every element carries at least a 4-byte length
    let mut flat = Vec::with_capacity(total.min(raw.len() / 4));
    for _ in 0..total {
        let len = reader.i32().ok_or_else(truncated)?;
        let element = if len < 0 {
            None
        } else {
            Some(reader.bytes(len as usize).ok_or_else(truncated)?)
        };
        flat.push(ctx.chain.cast(element_oid, element)?);
    }

    if dims.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    Ok(nest(&dims, &mut flat.into_iter()))
}

fn nest(dims: &[usize], flat: &mut impl Iterator<Item = Value>) -> Value {
    match dims.split_first() {
        Some((len, [])) => Value::Array(flat.take(*len).collect()),
        Some((len, rest)) => Value::Array((0..*len).map(|_| nest(rest, flat)).collect()),
        None => Value::Array(Vec::new()),
    }
}
