use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::BufMut;
use tracing::warn;

use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::value::{Record, Value};

/// Maximum nesting depth accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// TypeTag
// ---------------------------------------------------------------------------

/// Two-byte tag that prefixes every encoded value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(pub u16);

impl TypeTag {
    pub const NULL: Self = Self(0x0000);
    pub const BOOL: Self = Self(0x0001);
    pub const INT: Self = Self(0x0002);
    pub const UINT: Self = Self(0x0003);
    pub const FLOAT: Self = Self(0x0004);
    pub const STR: Self = Self(0x0005);
    pub const BYTES: Self = Self(0x0006);
    pub const ARRAY: Self = Self(0x0007);
    pub const MAP: Self = Self(0x0008);
    pub const STRUCT: Self = Self(0x0009);

    /// First tag available to extension types.
    pub const FIRST_EXTENSION: u16 = 0x0100;

    /// Returns `true` for tags outside the built-in range.
    pub fn is_extension(&self) -> bool {
        self.0 >= Self::FIRST_EXTENSION
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over encoded bytes.
///
/// Every read returns [`DecodeError::Truncated`] instead of panicking when the
/// input runs out.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn read_i64(&mut self) -> DecodeResult<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub fn read_f64(&mut self) -> DecodeResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a u32 length prefix.
    pub fn read_len(&mut self) -> DecodeResult<usize> {
        Ok(self.read_u32()? as usize)
    }

    pub fn read_bytes(&mut self) -> DecodeResult<&'a [u8]> {
        let len = self.read_len()?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> DecodeResult<String> {
        let raw = self.read_bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8: {e}")))
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> DecodeResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::Malformed(format!("{n} trailing bytes"))),
        }
    }

    /// Pre-allocation bound for a collection of `count` elements, each at
    /// least `min_size` bytes long. Guards against hostile length prefixes.
    pub fn capacity_hint(&self, count: usize, min_size: usize) -> usize {
        count.min(self.remaining() / min_size.max(1))
    }

    fn descend(&mut self) -> DecodeResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(DecodeError::Malformed(format!(
                "nesting deeper than {MAX_DEPTH} levels"
            )));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

// ---------------------------------------------------------------------------
// Write helpers
// ---------------------------------------------------------------------------

/// Write a u32 length prefix.
pub fn write_len(out: &mut Vec<u8>, len: usize, what: &'static str) -> EncodeResult<()> {
    let len32 = u32::try_from(len).map_err(|_| EncodeError::TooLarge { what, len })?;
    out.put_u32(len32);
    Ok(())
}

/// Write a length-prefixed UTF-8 string.
pub fn write_str(out: &mut Vec<u8>, s: &str) -> EncodeResult<()> {
    write_len(out, s.len(), "string")?;
    out.put_slice(s.as_bytes());
    Ok(())
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Encoder for one type tag. Receives the registry for nested values.
pub type EncodeFn = Arc<dyn Fn(&TypeRegistry, &Value, &mut Vec<u8>) -> EncodeResult<()> + Send + Sync>;

/// Decoder for one type tag. The tag itself has already been consumed.
pub type DecodeFn = Arc<dyn Fn(&TypeRegistry, &mut Reader<'_>) -> DecodeResult<Value> + Send + Sync>;

#[derive(Clone)]
struct TypeEntry {
    name: String,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Maps type tags to encode/decode functions.
///
/// Built-in kinds are ordinary entries (see [`Self::with_builtins`]), so the
/// codec has no hard-coded knowledge of any kind besides the snapshot root.
///
/// Registering a tag that is already present **replaces** the earlier entry.
/// [`Self::register`] returns the replaced entry's name and logs a warning so
/// the overwrite is never silent.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    entries: HashMap<TypeTag, TypeEntry>,
}

impl TypeRegistry {
    /// A registry with no entries at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding every built-in kind.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register(TypeTag::NULL, "null", encode_null, decode_null);
        reg.register(TypeTag::BOOL, "bool", encode_bool, decode_bool);
        reg.register(TypeTag::INT, "int", encode_int, decode_int);
        reg.register(TypeTag::UINT, "uint", encode_uint, decode_uint);
        reg.register(TypeTag::FLOAT, "float", encode_float, decode_float);
        reg.register(TypeTag::STR, "string", encode_str, decode_str);
        reg.register(TypeTag::BYTES, "bytes", encode_bytes, decode_bytes);
        reg.register(TypeTag::ARRAY, "array", encode_array, decode_array);
        reg.register(TypeTag::MAP, "map", encode_map, decode_map);
        reg.register(TypeTag::STRUCT, "struct", encode_struct, decode_struct);
        reg
    }

    /// Register (or replace) the codec for `tag`.
    ///
    /// Returns the name of the entry that was replaced, if any.
    pub fn register<E, D>(
        &mut self,
        tag: TypeTag,
        name: impl Into<String>,
        encode: E,
        decode: D,
    ) -> Option<String>
    where
        E: Fn(&TypeRegistry, &Value, &mut Vec<u8>) -> EncodeResult<()> + Send + Sync + 'static,
        D: Fn(&TypeRegistry, &mut Reader<'_>) -> DecodeResult<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let entry = TypeEntry {
            name: name.clone(),
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        };
        let previous = self.entries.insert(tag, entry).map(|prev| prev.name);
        if let Some(ref prev) = previous {
            warn!(%tag, previous = %prev, replacement = %name, "type registration replaced existing entry");
        }
        previous
    }

    /// Remove the entry for `tag`. Returns `true` if one existed.
    pub fn unregister(&mut self, tag: TypeTag) -> bool {
        self.entries.remove(&tag).is_some()
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Registered name of `tag`.
    pub fn name(&self, tag: TypeTag) -> Option<&str> {
        self.entries.get(&tag).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered tags in ascending order.
    pub fn tags(&self) -> Vec<TypeTag> {
        let mut tags: Vec<TypeTag> = self.entries.keys().copied().collect();
        tags.sort();
        tags
    }

    /// Append `[tag][body]` for `value`.
    pub fn encode_value(&self, value: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
        let (tag, body) = match value {
            Value::Typed { tag, value } => (*tag, value.as_ref()),
            other => (other.type_tag(), other),
        };
        let entry = self.entries.get(&tag).ok_or(EncodeError::UnknownType(tag))?;
        out.put_u16(tag.0);
        (entry.encode)(self, body, out)
    }

    /// Read one `[tag][body]` value.
    pub fn decode_value(&self, reader: &mut Reader<'_>) -> DecodeResult<Value> {
        let tag = TypeTag(reader.read_u16()?);
        let entry = self.entries.get(&tag).ok_or(DecodeError::UnknownType(tag))?;
        reader.descend()?;
        let decoded = (entry.decode)(self, reader);
        reader.ascend();
        let value = decoded?;
        if tag.is_extension() {
            Ok(Value::Typed {
                tag,
                value: Box::new(value),
            })
        } else {
            Ok(value)
        }
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for tag in self.tags() {
            map.entry(&tag, &self.name(tag).unwrap_or_default());
        }
        map.finish()
    }
}

// ---------------------------------------------------------------------------
// Built-in kinds
// ---------------------------------------------------------------------------

fn mismatch(expected: &str, found: &Value) -> EncodeError {
    EncodeError::TypeMismatch {
        expected: expected.to_string(),
        found: found.kind().to_string(),
    }
}

fn encode_null(_: &TypeRegistry, v: &Value, _: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Null => Ok(()),
        other => Err(mismatch("null", other)),
    }
}

fn decode_null(_: &TypeRegistry, _: &mut Reader<'_>) -> DecodeResult<Value> {
    Ok(Value::Null)
}

fn encode_bool(_: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Bool(b) => {
            out.put_u8(u8::from(*b));
            Ok(())
        }
        other => Err(mismatch("bool", other)),
    }
}

fn decode_bool(_: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    match r.read_u8()? {
        0 => Ok(Value::Bool(false)),
        1 => Ok(Value::Bool(true)),
        b => Err(DecodeError::Malformed(format!("invalid bool byte {b:#04x}"))),
    }
}

fn encode_int(_: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Int(i) => {
            out.put_i64(*i);
            Ok(())
        }
        other => Err(mismatch("int", other)),
    }
}

fn decode_int(_: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    Ok(Value::Int(r.read_i64()?))
}

fn encode_uint(_: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::UInt(u) => {
            out.put_u64(*u);
            Ok(())
        }
        other => Err(mismatch("uint", other)),
    }
}

fn decode_uint(_: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    Ok(Value::UInt(r.read_u64()?))
}

fn encode_float(_: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Float(f) => {
            // One bit pattern per logical value: a single NaN, and -0.0 as 0.0.
            let canonical = if f.is_nan() {
                f64::NAN
            } else if *f == 0.0 {
                0.0
            } else {
                *f
            };
            out.put_u64(canonical.to_bits());
            Ok(())
        }
        other => Err(mismatch("float", other)),
    }
}

fn decode_float(_: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    Ok(Value::Float(r.read_f64()?))
}

fn encode_str(_: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Str(s) => write_str(out, s),
        other => Err(mismatch("string", other)),
    }
}

fn decode_str(_: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    Ok(Value::Str(r.read_string()?))
}

fn encode_bytes(_: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Bytes(b) => {
            write_len(out, b.len(), "bytes")?;
            out.put_slice(b);
            Ok(())
        }
        other => Err(mismatch("bytes", other)),
    }
}

fn decode_bytes(_: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    Ok(Value::Bytes(r.read_bytes()?.to_vec()))
}

fn encode_array(reg: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Array(items) => {
            write_len(out, items.len(), "array")?;
            for item in items {
                reg.encode_value(item, out)?;
            }
            Ok(())
        }
        other => Err(mismatch("array", other)),
    }
}

fn decode_array(reg: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    let count = r.read_len()?;
    let mut items = Vec::with_capacity(r.capacity_hint(count, 2));
    for _ in 0..count {
        items.push(reg.decode_value(r)?);
    }
    Ok(Value::Array(items))
}

fn encode_map(reg: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Map(map) => {
            write_len(out, map.len(), "map")?;
            // BTreeMap iteration is sorted, which makes the encoding canonical.
            for (key, value) in map {
                write_str(out, key)?;
                reg.encode_value(value, out)?;
            }
            Ok(())
        }
        other => Err(mismatch("map", other)),
    }
}

fn decode_map(reg: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    let count = r.read_len()?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = r.read_string()?;
        let value = reg.decode_value(r)?;
        if map.insert(key.clone(), value).is_some() {
            return Err(DecodeError::Malformed(format!("duplicate map key {key:?}")));
        }
    }
    Ok(Value::Map(map))
}

/// Encode a record body: `[count][(name, value)...]`.
pub(crate) fn encode_record(reg: &TypeRegistry, record: &Record, out: &mut Vec<u8>) -> EncodeResult<()> {
    write_len(out, record.len(), "struct")?;
    for (name, value) in record.iter() {
        write_str(out, name)?;
        reg.encode_value(value, out)?;
    }
    Ok(())
}

fn encode_struct(reg: &TypeRegistry, v: &Value, out: &mut Vec<u8>) -> EncodeResult<()> {
    match v {
        Value::Struct(record) => encode_record(reg, record, out),
        other => Err(mismatch("struct", other)),
    }
}

fn decode_struct(reg: &TypeRegistry, r: &mut Reader<'_>) -> DecodeResult<Value> {
    let count = r.read_len()?;
    let mut fields = Vec::with_capacity(r.capacity_hint(count, 6));
    for _ in 0..count {
        let name = r.read_string()?;
        let value = reg.decode_value(r)?;
        fields.push((name, value));
    }
    Ok(Value::Struct(Record::try_from_fields(fields)?))
}
