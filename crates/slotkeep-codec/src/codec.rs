use std::sync::Arc;

use bytes::BufMut;
use tracing::trace;

use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::registry::{write_len, write_str, Reader, TypeRegistry, TypeTag};
use crate::value::{Record, Snapshot, Value};

/// Converts values and snapshots to and from their canonical byte form.
///
/// The codec is a thin shell over a shared [`TypeRegistry`]; cloning it is
/// cheap and every clone sees the same registrations.
#[derive(Clone, Debug)]
pub struct ByteCodec {
    registry: Arc<TypeRegistry>,
}

impl Default for ByteCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteCodec {
    /// A codec over the built-in kinds only.
    pub fn new() -> Self {
        Self::with_registry(TypeRegistry::with_builtins())
    }

    pub fn with_registry(registry: TypeRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Encode a single value.
    pub fn encode(&self, value: &Value) -> EncodeResult<Vec<u8>> {
        let mut out = Vec::new();
        self.registry.encode_value(value, &mut out)?;
        Ok(out)
    }

    /// Decode a single value. The whole input must be consumed.
    pub fn decode(&self, bytes: &[u8]) -> DecodeResult<Value> {
        let mut reader = Reader::new(bytes);
        let value = self.registry.decode_value(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }

    /// Encode a snapshot tagged with `schema_version`.
    pub fn encode_snapshot(&self, snapshot: &Snapshot, schema_version: u32) -> EncodeResult<Vec<u8>> {
        self.encode_snapshot_observed(snapshot, schema_version, &mut |_, _| true)
    }

    /// Encode a snapshot, calling `checkpoint(done, total)` after each
    /// top-level field. A `false` return stops with
    /// [`EncodeError::Interrupted`].
    pub fn encode_snapshot_observed(
        &self,
        snapshot: &Snapshot,
        schema_version: u32,
        checkpoint: &mut dyn FnMut(usize, usize) -> bool,
    ) -> EncodeResult<Vec<u8>> {
        let record = snapshot.as_record();
        let total = record.len();
        let mut out = Vec::new();
        out.put_u32(schema_version);
        out.put_u16(TypeTag::STRUCT.0);

        write_len(&mut out, total, "struct")?;

        // Fields go out one at a time so the caller can stop between them.
        for (done, (name, value)) in record.iter().enumerate() {
            write_str(&mut out, name)?;
            self.registry.encode_value(value, &mut out)?;
            if !checkpoint(done + 1, total) {
                trace!(done = done + 1, total, "snapshot encode interrupted");
                return Err(EncodeError::Interrupted);
            }
        }
        trace!(fields = total, bytes = out.len(), schema_version, "snapshot encoded");
        Ok(out)
    }

    /// Decode a snapshot written by a schema no newer than `expected_version`.
    ///
    /// Returns the stored schema version alongside the snapshot; the caller
    /// decides whether a migration is needed.
    pub fn decode_snapshot(&self, bytes: &[u8], expected_version: u32) -> DecodeResult<(u32, Snapshot)> {
        self.decode_snapshot_observed(bytes, expected_version, &mut |_, _| true)
    }

    /// Decode a snapshot with a per-field checkpoint.
    pub fn decode_snapshot_observed(
        &self,
        bytes: &[u8],
        expected_version: u32,
        checkpoint: &mut dyn FnMut(usize, usize) -> bool,
    ) -> DecodeResult<(u32, Snapshot)> {
        let mut reader = Reader::new(bytes);
        let version = reader.read_u32()?;
        if version > expected_version {
            return Err(DecodeError::VersionUnsupported {
                found: version,
                supported: expected_version,
            });
        }

        let tag = TypeTag(reader.read_u16()?);
        if tag != TypeTag::STRUCT {
            let found = self
                .registry
                .name(tag)
                .map(str::to_string)
                .unwrap_or_else(|| tag.to_string());
            return Err(DecodeError::mismatch("struct", found));
        }

        let total = reader.read_len()?;
        let mut fields = Vec::with_capacity(reader.capacity_hint(total, 6));
        for done in 0..total {
            let name = reader.read_string()?;
            let value = self.registry.decode_value(&mut reader)?;
            fields.push((name, value));
            if !checkpoint(done + 1, total) {
                return Err(DecodeError::Interrupted);
            }
        }
        reader.finish()?;
        let record = Record::try_from_fields(fields)?;
        Ok((version, Snapshot::from_record(record)))
    }

    /// Read the schema version prefix without decoding the body.
    pub fn peek_schema_version(bytes: &[u8]) -> DecodeResult<u32> {
        Reader::new(bytes).read_u32()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<u64>().prop_map(Value::UInt),
            // NaN never compares equal, so it is covered by a dedicated test.
            (-1.0e12f64..1.0e12).prop_map(Value::Float),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Str),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,6}", inner.clone(), 0..6).prop_map(Value::Map),
                proptest::collection::btree_map("[a-z]{1,6}", inner, 0..6).prop_map(|m| {
                    let fields: Vec<(String, Value)> = m.into_iter().collect();
                    Value::Struct(Record::try_from_fields(fields).unwrap())
                }),
            ]
        })
    }

    fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
        proptest::collection::btree_map("[a-z_]{1,8}", arb_value(), 0..8).prop_map(|m| {
            let fields: Vec<(String, Value)> = m.into_iter().collect();
            Snapshot::from_record(Record::try_from_fields(fields).unwrap())
        })
    }

    proptest! {
        #[test]
        fn value_roundtrip(value in arb_value()) {
            let codec = ByteCodec::new();
            let bytes = codec.encode(&value).unwrap();
            prop_assert_eq!(codec.decode(&bytes).unwrap(), value);
        }

        #[test]
        fn snapshot_roundtrip_is_idempotent(snapshot in arb_snapshot(), version in 0u32..10) {
            let codec = ByteCodec::new();
            let first = codec.encode_snapshot(&snapshot, version).unwrap();
            let (stored, decoded) = codec.decode_snapshot(&first, version).unwrap();
            prop_assert_eq!(stored, version);
            prop_assert_eq!(&decoded, &snapshot);
            let second = codec.encode_snapshot(&decoded, version).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn truncation_never_panics(snapshot in arb_snapshot(), cut in 0usize..64) {
            let codec = ByteCodec::new();
            let bytes = codec.encode_snapshot(&snapshot, 1).unwrap();
            let cut = cut.min(bytes.len().saturating_sub(1));
            prop_assert!(codec.decode_snapshot(&bytes[..cut], 1).is_err());
        }
    }

    #[test]
    fn map_encoding_ignores_insertion_order() {
        let codec = ByteCodec::new();
        let mut a = BTreeMap::new();
        a.insert("zeta".to_string(), Value::Int(1));
        a.insert("alpha".to_string(), Value::Int(2));
        let mut b = BTreeMap::new();
        b.insert("alpha".to_string(), Value::Int(2));
        b.insert("zeta".to_string(), Value::Int(1));
        assert_eq!(
            codec.encode(&Value::Map(a)).unwrap(),
            codec.encode(&Value::Map(b)).unwrap()
        );
    }

    #[test]
    fn nested_snapshot_roundtrip() {
        let codec = ByteCodec::new();
        let inventory = Record::new()
            .with("gold", 120u64)
            .with("items", vec![Value::from("sword"), Value::from("shield")]);
        let snapshot = Snapshot::new()
            .with("player", "Ayla")
            .with("level", 7)
            .with("position", vec![Value::Float(1.5), Value::Float(-2.0)])
            .with("inventory", inventory);
        let bytes = codec.encode_snapshot(&snapshot, 3).unwrap();
        assert_eq!(ByteCodec::peek_schema_version(&bytes).unwrap(), 3);
        let (version, decoded) = codec.decode_snapshot(&bytes, 3).unwrap();
        assert_eq!(version, 3);
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.get_record("inventory").unwrap().get_u64("gold").unwrap(), 120);
    }

    #[test]
    fn empty_snapshot_roundtrip() {
        let codec = ByteCodec::new();
        let bytes = codec.encode_snapshot(&Snapshot::new(), 1).unwrap();
        // version + tag + count
        assert_eq!(bytes.len(), 4 + 2 + 4);
        let (_, decoded) = codec.decode_snapshot(&bytes, 1).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn newer_version_is_rejected() {
        let codec = ByteCodec::new();
        let bytes = codec.encode_snapshot(&Snapshot::new(), 5).unwrap();
        let err = codec.decode_snapshot(&bytes, 4).unwrap_err();
        assert_eq!(err, DecodeError::VersionUnsupported { found: 5, supported: 4 });
    }

    #[test]
    fn older_version_is_returned_for_migration() {
        let codec = ByteCodec::new();
        let bytes = codec.encode_snapshot(&Snapshot::new().with("hp", 3), 1).unwrap();
        let (version, _) = codec.decode_snapshot(&bytes, 4).unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn non_struct_root_is_type_mismatch() {
        let codec = ByteCodec::new();
        let mut bytes = 1u32.to_be_bytes().to_vec();
        bytes.extend(codec.encode(&Value::Int(9)).unwrap());
        let err = codec.decode_snapshot(&bytes, 1).unwrap_err();
        assert!(matches!(err, DecodeError::TypeMismatch { .. }));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let codec = ByteCodec::new();
        let mut bytes = codec.encode(&Value::Bool(true)).unwrap();
        bytes.push(0);
        assert!(matches!(codec.decode(&bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn duplicate_field_on_wire_is_malformed() {
        let codec = ByteCodec::new();
        let once = codec.encode_snapshot(&Snapshot::new().with("a", 1), 1).unwrap();
        // Rewrite the count to 2 and repeat the field body.
        let field = once[10..].to_vec();
        let mut bytes = once[..6].to_vec();
        bytes.extend(2u32.to_be_bytes());
        bytes.extend(&field);
        bytes.extend(&field);
        let err = codec.decode_snapshot(&bytes, 1).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn checkpoint_can_interrupt_both_directions() {
        let codec = ByteCodec::new();
        let snapshot = Snapshot::new().with("a", 1).with("b", 2).with("c", 3);

        let mut seen = Vec::new();
        let err = codec
            .encode_snapshot_observed(&snapshot, 1, &mut |done, total| {
                seen.push((done, total));
                done < 2
            })
            .unwrap_err();
        assert_eq!(err, EncodeError::Interrupted);
        assert_eq!(seen, vec![(1, 3), (2, 3)]);

        let bytes = codec.encode_snapshot(&snapshot, 1).unwrap();
        let err = codec
            .decode_snapshot_observed(&bytes, 1, &mut |done, _| done < 1)
            .unwrap_err();
        assert_eq!(err, DecodeError::Interrupted);
    }

    #[test]
    fn unknown_extension_in_snapshot() {
        let codec = ByteCodec::new();
        let mut bytes = 1u32.to_be_bytes().to_vec();
        bytes.extend(TypeTag::STRUCT.0.to_be_bytes());
        bytes.extend(1u32.to_be_bytes());
        bytes.extend(1u32.to_be_bytes());
        bytes.push(b'x');
        bytes.extend(0x0200u16.to_be_bytes());
        let err = codec.decode_snapshot(&bytes, 1).unwrap_err();
        assert_eq!(err, DecodeError::UnknownType(TypeTag(0x0200)));
    }
}
