use slotkeep_codec::{ByteCodec, Snapshot};
use tracing::{debug, info};

use crate::error::ContainerResult;
use crate::format::{peek_header, Blob, Header};
use crate::migration::MigrationChain;
use crate::validation::{AppliedCorrection, Validator};

/// A snapshot read back from a container, with a record of what happened to
/// it on the way.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedSnapshot {
    pub snapshot: Snapshot,
    /// Schema version the container was written with.
    pub stored_version: u32,
    /// `from` version of every migration step that ran.
    pub migrations_applied: Vec<u32>,
    pub corrections: Vec<AppliedCorrection>,
}

impl LoadedSnapshot {
    pub fn was_migrated(&self) -> bool {
        !self.migrations_applied.is_empty()
    }
}

/// Everything needed to turn snapshots into containers and back: the codec,
/// the current schema version with its migration chain, and the validator.
#[derive(Clone, Debug)]
pub struct SaveSchema {
    codec: ByteCodec,
    migrations: MigrationChain,
    validator: Validator,
}

impl SaveSchema {
    /// Schema at `migrations.current()` using the built-in codec and no
    /// validation rules.
    pub fn new(migrations: MigrationChain) -> Self {
        Self {
            codec: ByteCodec::new(),
            migrations,
            validator: Validator::new(),
        }
    }

    pub fn with_codec(mut self, codec: ByteCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn current_version(&self) -> u32 {
        self.migrations.current()
    }

    pub fn codec(&self) -> &ByteCodec {
        &self.codec
    }

    pub fn migrations(&self) -> &MigrationChain {
        &self.migrations
    }

    /// Encode at the current version.
    pub fn seal(&self, snapshot: &Snapshot) -> ContainerResult<Blob> {
        self.seal_observed(snapshot, &mut |_, _| true)
    }

    pub fn seal_observed(
        &self,
        snapshot: &Snapshot,
        checkpoint: &mut dyn FnMut(usize, usize) -> bool,
    ) -> ContainerResult<Blob> {
        let version = self.current_version();
        let payload = self.codec.encode_snapshot_observed(snapshot, version, checkpoint)?;
        let blob = Blob::seal(version, payload);
        debug!(version, bytes = blob.len(), checksum = %blob.checksum().short_hex(), "sealed container");
        Ok(blob)
    }

    /// Verify, decode, migrate and validate a container.
    pub fn open(&self, bytes: &[u8]) -> ContainerResult<LoadedSnapshot> {
        self.open_observed(bytes, &mut |_, _| true)
    }

    pub fn open_observed(
        &self,
        bytes: &[u8],
        checkpoint: &mut dyn FnMut(usize, usize) -> bool,
    ) -> ContainerResult<LoadedSnapshot> {
        let blob = Blob::from_bytes(bytes)?;
        // Reject newer saves and migration gaps before decoding the payload.
        self.migrations.plan(blob.schema_version())?;
        let (stored_version, snapshot) =
            self.codec
                .decode_snapshot_observed(blob.payload(), self.current_version(), checkpoint)?;
        let (snapshot, migrations_applied) = self.migrations.migrate(snapshot, stored_version)?;
        if !migrations_applied.is_empty() {
            info!(
                from = stored_version,
                to = self.current_version(),
                steps = migrations_applied.len(),
                "migrated snapshot"
            );
        }
        let (snapshot, report) = self.validator.validate(snapshot)?;
        Ok(LoadedSnapshot {
            snapshot,
            stored_version,
            migrations_applied,
            corrections: report.corrections,
        })
    }

    /// Read a container header without verifying the payload.
    pub fn inspect(bytes: &[u8]) -> ContainerResult<Header> {
        peek_header(bytes)
    }
}
