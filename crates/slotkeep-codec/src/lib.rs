//! Deterministic byte codec for Slotkeep snapshots.
//!
//! A [`Snapshot`] is an ordered collection of named fields whose values are
//! primitives, nested structs, maps, arrays, or extension values registered
//! in the [`TypeRegistry`]. The [`ByteCodec`] turns snapshots into bytes and
//! back; the same logical value always encodes to the same bytes, which is
//! what makes payload checksums meaningful.
//!
//! # Wire Format
//!
//! All integers are big-endian. Every value is written as
//! `[type tag: u16][body]`; the body layout is owned by the registry entry
//! for that tag. A snapshot payload is
//! `[schema version: u32][struct tag][field count: u32][(name, value)...]`.
//!
//! # Extension Types
//!
//! Tags below `0x0100` are reserved for built-in kinds. Anything above is an
//! extension: register an encode/decode pair and values of that kind travel
//! as [`Value::Typed`].

pub mod codec;
pub mod error;
pub mod json;
pub mod registry;
pub mod value;

pub use codec::ByteCodec;
pub use error::{DecodeError, EncodeError};
pub use registry::{Reader, TypeRegistry, TypeTag};
pub use value::{FieldMapped, Record, Snapshot, Value, ValueKind};
