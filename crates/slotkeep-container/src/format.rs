use sha2::{Digest, Sha256};
use slotkeep_codec::TypeTag;
use slotkeep_types::Checksum;

use crate::error::{ContainerError, ContainerResult};

/// Magic bytes at the start of every container.
pub const MAGIC: &[u8; 8] = b"SLOTKEEP";

/// magic + schema version + checksum + payload length
pub const HEADER_LEN: usize = 8 + 4 + 32 + 8;

/// Parsed container header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub schema_version: u32,
    pub checksum: Checksum,
    pub payload_len: u64,
}

impl Header {
    /// Total container size described by this header.
    pub fn container_len(&self) -> u64 {
        HEADER_LEN as u64 + self.payload_len
    }
}

/// An encoded snapshot plus the header fields that protect it.
///
/// Blobs are produced once at save time and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    schema_version: u32,
    type_tag: TypeTag,
    checksum: Checksum,
    payload: Vec<u8>,
}

/// SHA-256 of a payload.
pub fn payload_checksum(payload: &[u8]) -> Checksum {
    let digest: [u8; 32] = Sha256::digest(payload).into();
    Checksum::from_digest(digest)
}

impl Blob {
    /// Wrap an encoded snapshot payload and compute its checksum.
    pub fn seal(schema_version: u32, payload: Vec<u8>) -> Self {
        Self {
            schema_version,
            type_tag: root_tag(&payload).unwrap_or(TypeTag::STRUCT),
            checksum: payload_checksum(&payload),
            payload,
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Tag of the payload's root value.
    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn header(&self) -> Header {
        Header {
            schema_version: self.schema_version,
            checksum: self.checksum,
            payload_len: self.payload.len() as u64,
        }
    }

    /// Size of the serialized container.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialize header and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.schema_version.to_be_bytes());
        out.extend_from_slice(self.checksum.as_bytes());
        out.extend_from_slice(&(self.payload.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse and fully verify a container.
    pub fn from_bytes(bytes: &[u8]) -> ContainerResult<Self> {
        let header = peek_header(bytes)?;
        let actual_len = bytes.len() as u64;
        if header.container_len() != actual_len {
            return Err(ContainerError::Integrity(format!(
                "length mismatch: header describes {} bytes, container has {actual_len}",
                header.container_len()
            )));
        }
        let payload = &bytes[HEADER_LEN..];
        let computed = payload_checksum(payload);
        if computed != header.checksum {
            return Err(ContainerError::Integrity(format!(
                "checksum mismatch: header {}, payload {}",
                header.checksum.short_hex(),
                computed.short_hex()
            )));
        }
        let tag = root_tag(payload).ok_or_else(|| {
            ContainerError::Integrity("payload shorter than its version prefix".into())
        })?;
        let embedded = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if embedded != header.schema_version {
            return Err(ContainerError::Integrity(format!(
                "schema version mismatch: header v{}, payload v{embedded}",
                header.schema_version
            )));
        }
        Ok(Self {
            schema_version: header.schema_version,
            type_tag: tag,
            checksum: header.checksum,
            payload: payload.to_vec(),
        })
    }
}

/// Read the header without touching the payload.
pub fn peek_header(bytes: &[u8]) -> ContainerResult<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(ContainerError::Integrity(format!(
            "container too short: {} bytes, header needs {HEADER_LEN}",
            bytes.len()
        )));
    }
    if &bytes[..8] != MAGIC {
        return Err(ContainerError::Integrity("bad magic".into()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[8..12]);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes[12..44]);
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[44..52]);
    Ok(Header {
        schema_version: u32::from_be_bytes(version),
        checksum: Checksum::from_digest(digest),
        payload_len: u64::from_be_bytes(len),
    })
}

fn root_tag(payload: &[u8]) -> Option<TypeTag> {
    payload
        .get(4..6)
        .map(|raw| TypeTag(u16::from_be_bytes([raw[0], raw[1]])))
}

#[cfg(test)]
mod tests {
    use slotkeep_codec::{ByteCodec, Snapshot};

    use super::*;

    fn sample_blob() -> Blob {
        let snapshot = Snapshot::new().with("hp", 10).with("name", "Ayla");
        let payload = ByteCodec::new().encode_snapshot(&snapshot, 2).unwrap();
        Blob::seal(2, payload)
    }

    #[test]
    fn seal_and_parse() {
        let blob = sample_blob();
        let bytes = blob.to_bytes();
        assert_eq!(&bytes[..8], MAGIC);
        assert_eq!(bytes.len(), blob.len());
        let parsed = Blob::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, blob);
        assert_eq!(parsed.type_tag(), TypeTag::STRUCT);
    }

    #[test]
    fn peek_header_matches() {
        let blob = sample_blob();
        let header = peek_header(&blob.to_bytes()).unwrap();
        assert_eq!(header, blob.header());
        assert_eq!(header.schema_version, 2);
    }

    #[test]
    fn flipped_payload_bit_is_integrity_error() {
        let mut bytes = sample_blob().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = Blob::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ContainerError::Integrity(_)));
    }

    #[test]
    fn truncated_container_is_integrity_error() {
        let bytes = sample_blob().to_bytes();
        for cut in [0, 7, HEADER_LEN - 1, HEADER_LEN, bytes.len() - 1] {
            let err = Blob::from_bytes(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, ContainerError::Integrity(_)), "cut at {cut}");
        }
    }

    #[test]
    fn appended_bytes_are_integrity_error() {
        let mut bytes = sample_blob().to_bytes();
        bytes.push(0);
        assert!(matches!(Blob::from_bytes(&bytes), Err(ContainerError::Integrity(_))));
    }

    #[test]
    fn bad_magic() {
        let mut bytes = sample_blob().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(Blob::from_bytes(&bytes), Err(ContainerError::Integrity(_))));
    }

    #[test]
    fn header_version_must_match_payload() {
        let mut bytes = sample_blob().to_bytes();
        bytes[11] = 9;
        let err = Blob::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("schema version mismatch"));
    }
}
