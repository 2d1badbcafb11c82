use std::sync::Arc;

use slotkeep_container::SaveSchema;
use slotkeep_scheduler::{SchedulerConfig, TaskScheduler};
use slotkeep_store::{BlobClient, CloudBackend, LocalBackend, StorageBackend};
use slotkeep_sync::{ConflictPolicy, ConflictResolver};
use slotkeep_types::{DeviceId, UserId};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::{EngineInner, PersistenceEngine};
use crate::error::{EngineError, EngineResult};

/// Assembles a [`PersistenceEngine`] from a config, a schema and the
/// backends to attach.
///
/// At least one backend is required. Sync needs both.
pub struct EngineBuilder {
    config: EngineConfig,
    schema: SaveSchema,
    device: DeviceId,
    user: UserId,
    local: Option<Arc<dyn StorageBackend>>,
    cloud: Option<Arc<CloudBackend>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig, schema: SaveSchema) -> EngineResult<Self> {
        config.validate()?;
        schema.migrations().verify()?;
        let device = config.device()?;
        let user = config.user()?;
        Ok(Self {
            config,
            schema,
            device,
            user,
            local: None,
            cloud: None,
        })
    }

    /// Device id used for cloud keys and save metadata.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Use any backend as the local side.
    pub fn attach_local(mut self, backend: impl StorageBackend + 'static) -> Self {
        self.local = Some(Arc::new(backend));
        self
    }

    /// Open a [`LocalBackend`] at `config.local_root` and sweep temp files
    /// left by an interrupted run.
    pub async fn open_local(self) -> EngineResult<Self> {
        let backend = LocalBackend::open(&self.config.local_root)
            .await?
            .with_chunk_size(self.config.chunk_size);
        let swept = backend.sweep_temp_files().await?;
        if swept > 0 {
            warn!(swept, root = %self.config.local_root.display(), "removed leftover temp files");
        }
        Ok(self.attach_local(backend))
    }

    pub fn attach_cloud(mut self, backend: CloudBackend) -> Self {
        self.cloud = Some(Arc::new(backend));
        self
    }

    /// Wrap a blob client in a [`CloudBackend`] keyed by the configured
    /// user and this builder's device.
    pub fn attach_cloud_client(self, client: Arc<dyn BlobClient>) -> Self {
        let backend = CloudBackend::new(client, self.user.clone(), self.device.clone())
            .with_chunk_size(self.config.chunk_size);
        self.attach_cloud(backend)
    }

    /// Start the scheduler and load the initial index. An offline cloud is
    /// tolerated; its entries appear after the next refresh.
    pub async fn build(self) -> EngineResult<PersistenceEngine> {
        if self.local.is_none() && self.cloud.is_none() {
            return Err(EngineError::Config("at least one backend must be attached".into()));
        }
        let scheduler = TaskScheduler::new(SchedulerConfig {
            workers: self.config.workers,
            ..SchedulerConfig::default()
        });
        let resolver = ConflictResolver::new(ConflictPolicy {
            ambiguity_window: self.config.ambiguity_window(),
        });
        let has_local = self.local.is_some();
        let has_cloud = self.cloud.is_some();
        let device = self.device.clone();
        let inner = EngineInner::new(
            self.config,
            self.schema,
            self.device,
            self.local,
            self.cloud,
            resolver,
        );
        let engine = PersistenceEngine::from_parts(inner, scheduler);
        let slots = engine.refresh_index().await?;
        info!(%device, local = has_local, cloud = has_cloud, slots, "persistence engine ready");
        Ok(engine)
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("device", &self.device)
            .field("user", &self.user)
            .field("local", &self.local.is_some())
            .field("cloud", &self.cloud.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use slotkeep_container::MigrationChain;
    use slotkeep_store::InMemoryBlobClient;

    use super::*;

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            local_root: dir.join("saves"),
            device_id: Some("deck".into()),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn requires_a_backend() {
        let dir = tempfile::tempdir().unwrap();
        let builder = EngineBuilder::new(config(dir.path()), SaveSchema::new(MigrationChain::new(1))).unwrap();
        let err = builder.build().await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let bad = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        assert!(EngineBuilder::new(bad, SaveSchema::new(MigrationChain::new(1))).is_err());
    }

    #[tokio::test]
    async fn rejects_migration_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let chain = MigrationChain::new(3).with_minimum(1).with_step(1, Ok);
        let err = EngineBuilder::new(config(dir.path()), SaveSchema::new(chain)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn builds_with_offline_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(InMemoryBlobClient::new());
        client.set_online(false);
        let engine = EngineBuilder::new(config(dir.path()), SaveSchema::new(MigrationChain::new(1)))
            .unwrap()
            .open_local()
            .await
            .unwrap()
            .attach_cloud_client(client)
            .build()
            .await
            .unwrap();
        assert!(engine.has_local() && engine.has_cloud());
        assert_eq!(engine.device().as_str(), "deck");
        assert!(engine.list(None).is_empty());
    }
}
