//! JSON view of values, used by the CLI and for debugging dumps.
//!
//! The mapping is lossless for everything the codec can carry: byte strings
//! become `{"$bytes": "<hex>"}` and extension values become
//! `{"$type": <tag>, "value": ...}`. Struct field order is preserved.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::error::{DecodeError, DecodeResult};
use crate::registry::TypeTag;
use crate::value::{Record, Snapshot, Value};

const BYTES_KEY: &str = "$bytes";
const TYPE_KEY: &str = "$type";

/// Convert a value to JSON.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::UInt(u) => Json::Number((*u).into()),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.clone()),
        Value::Bytes(b) => {
            let mut obj = JsonMap::new();
            obj.insert(BYTES_KEY.into(), Json::String(hex::encode(b)));
            Json::Object(obj)
        }
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::Struct(record) => record_to_json(record),
        Value::Typed { tag, value } => {
            let mut obj = JsonMap::new();
            obj.insert(TYPE_KEY.into(), Json::Number(tag.0.into()));
            obj.insert("value".into(), value_to_json(value));
            Json::Object(obj)
        }
    }
}

fn record_to_json(record: &Record) -> Json {
    let mut obj = JsonMap::new();
    for (name, value) in record.iter() {
        obj.insert(name.to_string(), value_to_json(value));
    }
    Json::Object(obj)
}

/// Convert JSON to a value.
///
/// Objects become [`Value::Struct`] unless they use one of the reserved
/// `$bytes` / `$type` shapes. Integers become [`Value::Int`] when they fit,
/// [`Value::UInt`] otherwise.
pub fn value_from_json(json: &Json) -> DecodeResult<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(value_from_json).collect::<DecodeResult<_>>()?),
        Json::Object(obj) => object_from_json(obj)?,
    })
}

fn object_from_json(obj: &JsonMap<String, Json>) -> DecodeResult<Value> {
    if obj.len() == 1 {
        if let Some(Json::String(encoded)) = obj.get(BYTES_KEY) {
            let bytes = hex::decode(encoded)
                .map_err(|e| DecodeError::Malformed(format!("invalid {BYTES_KEY} hex: {e}")))?;
            return Ok(Value::Bytes(bytes));
        }
    }
    if obj.len() == 2 {
        if let (Some(tag), Some(inner)) = (obj.get(TYPE_KEY), obj.get("value")) {
            let tag = tag
                .as_u64()
                .and_then(|t| u16::try_from(t).ok())
                .ok_or_else(|| DecodeError::Malformed(format!("invalid {TYPE_KEY} tag: {tag}")))?;
            return Ok(Value::typed(TypeTag(tag), value_from_json(inner)?));
        }
    }
    let mut record = Record::new();
    for (name, value) in obj {
        record.insert(name.clone(), value_from_json(value)?);
    }
    Ok(Value::Struct(record))
}

/// Convert JSON to a map value instead of a struct.
pub fn map_from_json(obj: &JsonMap<String, Json>) -> DecodeResult<Value> {
    let mut map = BTreeMap::new();
    for (k, v) in obj {
        map.insert(k.clone(), value_from_json(v)?);
    }
    Ok(Value::Map(map))
}

pub fn snapshot_to_json(snapshot: &Snapshot) -> Json {
    record_to_json(snapshot.as_record())
}

/// Build a snapshot from a JSON object.
pub fn snapshot_from_json(json: &Json) -> DecodeResult<Snapshot> {
    match value_from_json(json)? {
        Value::Struct(record) => Ok(Snapshot::from_record(record)),
        other => Err(DecodeError::mismatch("object", other.kind().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn snapshot_json_roundtrip() {
        let json = json!({
            "player": "Ayla",
            "level": 7,
            "ratio": 0.5,
            "flags": [true, false],
            "inventory": { "gold": 120 },
            "blob": { "$bytes": "deadbeef" },
            "pos": { "$type": 256, "value": [1.0, 2.0, 3.0] },
            "nothing": null
        });
        let snapshot = snapshot_from_json(&json).unwrap();
        assert_eq!(snapshot.get_str("player").unwrap(), "Ayla");
        assert_eq!(snapshot.get_i64("level").unwrap(), 7);
        assert_eq!(snapshot.get("blob"), Some(&Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef])));
        assert!(matches!(snapshot.get("pos"), Some(Value::Typed { tag: TypeTag(256), .. })));
        assert_eq!(snapshot_to_json(&snapshot), json);
    }

    #[test]
    fn large_unsigned_becomes_uint() {
        let value = value_from_json(&json!(u64::MAX)).unwrap();
        assert_eq!(value, Value::UInt(u64::MAX));
    }

    #[test]
    fn non_object_snapshot_rejected() {
        let err = snapshot_from_json(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, DecodeError::TypeMismatch { .. }));
    }

    #[test]
    fn bad_hex_rejected() {
        let err = value_from_json(&json!({ "$bytes": "zz" })).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn map_from_object() {
        let obj = json!({ "b": 1, "a": 2 });
        let value = map_from_json(obj.as_object().unwrap()).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
