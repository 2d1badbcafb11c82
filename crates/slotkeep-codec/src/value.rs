use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::DecodeError;
use crate::registry::TypeTag;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single serializable value.
///
/// Maps are keyed by string and kept sorted, so two maps with the same
/// content compare and encode identically regardless of insertion order.
/// Arrays and struct fields keep their order.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Struct(Record),
    /// An extension value; its wire form is owned by the registry entry for
    /// `tag`, its in-memory form is `value`.
    Typed { tag: TypeTag, value: Box<Value> },
}

/// Discriminant of a [`Value`], used in error messages and validation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Bytes,
    Array,
    Map,
    Struct,
    Typed,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Str => "string",
            Self::Bytes => "bytes",
            Self::Array => "array",
            Self::Map => "map",
            Self::Struct => "struct",
            Self::Typed => "typed",
        };
        f.write_str(s)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::UInt(_) => ValueKind::UInt,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Array(_) => ValueKind::Array,
            Self::Map(_) => ValueKind::Map,
            Self::Struct(_) => ValueKind::Struct,
            Self::Typed { .. } => ValueKind::Typed,
        }
    }

    /// The tag this value is written with.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Null => TypeTag::NULL,
            Self::Bool(_) => TypeTag::BOOL,
            Self::Int(_) => TypeTag::INT,
            Self::UInt(_) => TypeTag::UINT,
            Self::Float(_) => TypeTag::FLOAT,
            Self::Str(_) => TypeTag::STR,
            Self::Bytes(_) => TypeTag::BYTES,
            Self::Array(_) => TypeTag::ARRAY,
            Self::Map(_) => TypeTag::MAP,
            Self::Struct(_) => TypeTag::STRUCT,
            Self::Typed { tag, .. } => *tag,
        }
    }

    /// Build an extension value.
    pub fn typed(tag: TypeTag, value: impl Into<Value>) -> Self {
        Self::Typed {
            tag,
            value: Box::new(value.into()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Signed view of an integer value (unsigned values that fit included).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Unsigned view of an integer value (non-negative signed values included).
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(u) => Some(*u),
            Self::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Numeric view of any int, uint or float value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Struct(record) => Some(record),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Struct(v)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Ordered collection of uniquely named fields.
///
/// Used both for nested structs and as the body of a [`Snapshot`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from decoded fields, rejecting duplicate names.
    pub fn try_from_fields(fields: Vec<(String, Value)>) -> Result<Self, DecodeError> {
        let mut record = Self {
            fields: Vec::with_capacity(fields.len()),
        };
        for (name, value) in fields {
            if record.contains(&name) {
                return Err(DecodeError::Malformed(format!("duplicate field {name:?}")));
            }
            record.fields.push((name, value));
        }
        Ok(record)
    }

    /// Builder form of [`Self::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field. An existing field keeps its position and the previous
    /// value is returned; a new field is appended.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.iter_mut().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Rename a field in place. Fails if `to` already exists.
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> bool {
        let to = to.into();
        if self.contains(&to) {
            return false;
        }
        match self.fields.iter_mut().find(|(n, _)| n == from) {
            Some((name, _)) => {
                *name = to;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }

    /// Look up a field that must be present.
    pub fn require(&self, name: &str) -> Result<&Value, DecodeError> {
        self.get(name)
            .ok_or_else(|| DecodeError::MissingField(name.to_string()))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, DecodeError> {
        let v = self.require(name)?;
        v.as_bool()
            .ok_or_else(|| DecodeError::mismatch(format!("bool for {name}"), v.kind().to_string()))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, DecodeError> {
        let v = self.require(name)?;
        v.as_i64()
            .ok_or_else(|| DecodeError::mismatch(format!("int for {name}"), v.kind().to_string()))
    }

    pub fn get_u64(&self, name: &str) -> Result<u64, DecodeError> {
        let v = self.require(name)?;
        v.as_u64()
            .ok_or_else(|| DecodeError::mismatch(format!("uint for {name}"), v.kind().to_string()))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, DecodeError> {
        let v = self.require(name)?;
        v.as_f64()
            .ok_or_else(|| DecodeError::mismatch(format!("number for {name}"), v.kind().to_string()))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, DecodeError> {
        let v = self.require(name)?;
        v.as_str()
            .ok_or_else(|| DecodeError::mismatch(format!("string for {name}"), v.kind().to_string()))
    }

    pub fn get_record(&self, name: &str) -> Result<&Record, DecodeError> {
        let v = self.require(name)?;
        v.as_record()
            .ok_or_else(|| DecodeError::mismatch(format!("struct for {name}"), v.kind().to_string()))
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The decoded, in-memory state of one slot.
///
/// A snapshot is handed to the engine by value and never mutated by it;
/// migrations consume one snapshot and produce the next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    record: Record,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// Builder form of [`Record::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.record.insert(name, value);
        self
    }

    pub fn as_record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }
}

impl Deref for Snapshot {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.record
    }
}

impl DerefMut for Snapshot {
    fn deref_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

// ---------------------------------------------------------------------------
// FieldMapped
// ---------------------------------------------------------------------------

/// Declarative field mapping for a serializable Rust type.
///
/// A type declares its field list once, in `to_record`, and reads it back in
/// `from_record`. The engine never sees the Rust type, only the record.
pub trait FieldMapped: Sized {
    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self, DecodeError>;

    /// Wrap the mapped record as a top-level snapshot.
    fn to_snapshot(&self) -> Snapshot {
        Snapshot::from_record(self.to_record())
    }

    fn from_snapshot(snapshot: &Snapshot) -> Result<Self, DecodeError> {
        Self::from_record(snapshot.as_record())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Stats {
        health: i64,
        name: String,
        speed: f64,
    }

    impl FieldMapped for Stats {
        fn to_record(&self) -> Record {
            Record::new()
                .with("health", self.health)
                .with("name", self.name.as_str())
                .with("speed", self.speed)
        }

        fn from_record(record: &Record) -> Result<Self, DecodeError> {
            Ok(Self {
                health: record.get_i64("health")?,
                name: record.get_str("name")?.to_string(),
                speed: record.get_f64("speed")?,
            })
        }
    }

    #[test]
    fn insert_keeps_position_on_replace() {
        let mut r = Record::new().with("a", 1).with("b", 2);
        let prev = r.insert("a", 10);
        assert_eq!(prev, Some(Value::Int(1)));
        assert_eq!(r.field_names(), vec!["a", "b"]);
        assert_eq!(r.get("a"), Some(&Value::Int(10)));
    }

    #[test]
    fn duplicate_fields_rejected() {
        let err = Record::try_from_fields(vec![
            ("x".into(), Value::Null),
            ("x".into(), Value::Bool(true)),
        ])
        .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn rename_and_remove() {
        let mut r = Record::new().with("hp", 5).with("mp", 3);
        assert!(r.rename("hp", "health"));
        assert!(!r.rename("mp", "health"));
        assert_eq!(r.field_names(), vec!["health", "mp"]);
        assert_eq!(r.remove("mp"), Some(Value::Int(3)));
        assert!(r.remove("mp").is_none());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn typed_getters_report_errors() {
        let r = Record::new().with("name", "Aria");
        assert_eq!(r.get_str("name").unwrap(), "Aria");
        assert!(matches!(r.get_i64("name"), Err(DecodeError::TypeMismatch { .. })));
        assert_eq!(
            r.get_i64("health"),
            Err(DecodeError::MissingField("health".into()))
        );
    }

    #[test]
    fn integer_views_cross_signedness() {
        assert_eq!(Value::UInt(5).as_i64(), Some(5));
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
    }

    #[test]
    fn field_mapped_roundtrip() {
        let stats = Stats {
            health: 80,
            name: "Aria".into(),
            speed: 1.5,
        };
        let snapshot = stats.to_snapshot();
        assert_eq!(snapshot.field_names(), vec!["health", "name", "speed"]);
        assert_eq!(Stats::from_snapshot(&snapshot).unwrap(), stats);
    }

    #[test]
    fn snapshot_derefs_to_record() {
        let mut snap = Snapshot::new().with("level", 3);
        snap.insert("xp", 1200u64);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get_u64("xp").unwrap(), 1200);
    }

    #[test]
    fn kind_display() {
        assert_eq!(Value::from("x").kind().to_string(), "string");
        assert_eq!(Value::Map(BTreeMap::new()).kind().to_string(), "map");
    }
}
