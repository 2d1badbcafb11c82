use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slotkeep_codec::Snapshot;
use slotkeep_container::{LoadedSnapshot, SaveSchema};
use slotkeep_scheduler::{ShutdownReport, SlotState, TaskContext, TaskHandle, TaskKind, TaskScheduler};
use slotkeep_store::{CloudBackend, StorageBackend, StorageError, StorageResult};
use slotkeep_sync::{Assessment, ConflictRecord, ConflictResolver, Resolution, ResolutionPlan, SyncError};
use slotkeep_types::{DeviceId, Location, SaveDataInfo, SlotMetadata, SlotName, Timestamp};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::index::{IndexUpdate, SlotIndex};
use crate::observer::PhaseObserver;
use crate::producer::StateProducer;
use crate::retry::RetryPolicy;

/// Where and how to save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOptions {
    pub location: Location,
    pub description: String,
}

impl SaveOptions {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl From<Location> for SaveOptions {
    fn from(location: Location) -> Self {
        Self::new(location)
    }
}

/// Result of a save that did not fail outright.
#[derive(Debug)]
pub enum SaveOutcome {
    /// Every requested backend committed the container.
    Complete(SaveDataInfo),
    /// Saving to both locations succeeded on one side only. The retry
    /// decision is left to the caller.
    PartialSuccess {
        local: EngineResult<SaveDataInfo>,
        cloud: EngineResult<SaveDataInfo>,
    },
}

impl SaveOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Entry of the side that succeeded (local preferred).
    pub fn info(&self) -> Option<&SaveDataInfo> {
        match self {
            Self::Complete(info) => Some(info),
            Self::PartialSuccess { local, cloud } => local.as_ref().ok().or(cloud.as_ref().ok()),
        }
    }
}

/// How a sync treats an escalated conflict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConflictMode {
    /// Suspend until [`PersistenceEngine::resolve_conflict`] supplies a
    /// decision or the task is cancelled.
    #[default]
    Await,
    /// Fail with the conflict record; it stays pending for a later decision.
    Surface,
    /// Apply this decision if the sync escalates.
    Decide(Resolution),
}

/// What a finished sync did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub slot: SlotName,
    pub plan: ResolutionPlan,
    /// The escalated conflict with its outcome, if there was one.
    pub conflict: Option<ConflictRecord>,
    /// Why the default policy picked a winner, for automatic resolutions.
    pub reason: Option<String>,
    /// Index entry for the slot after the sync.
    pub info: Option<SaveDataInfo>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.plan.is_empty()
    }
}

struct PendingConflict {
    record: ConflictRecord,
    decision: Option<oneshot::Sender<Resolution>>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) schema: SaveSchema,
    pub(crate) device: DeviceId,
    pub(crate) local: Option<Arc<dyn StorageBackend>>,
    pub(crate) cloud: Option<Arc<CloudBackend>>,
    pub(crate) index: SlotIndex,
    pub(crate) resolver: ConflictResolver,
    pub(crate) retry: RetryPolicy,
    pub(crate) stopping: CancellationToken,
    conflicts: Mutex<BTreeMap<SlotName, PendingConflict>>,
}

impl EngineInner {
    pub(crate) fn new(
        config: EngineConfig,
        schema: SaveSchema,
        device: DeviceId,
        local: Option<Arc<dyn StorageBackend>>,
        cloud: Option<Arc<CloudBackend>>,
        resolver: ConflictResolver,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            schema,
            device,
            local,
            cloud,
            index: SlotIndex::new(),
            resolver,
            retry,
            stopping: CancellationToken::new(),
            conflicts: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn local(&self) -> EngineResult<&Arc<dyn StorageBackend>> {
        self.local.as_ref().ok_or(EngineError::NotAttached(Location::Local))
    }

    pub(crate) fn cloud(&self) -> EngineResult<&Arc<CloudBackend>> {
        self.cloud.as_ref().ok_or(EngineError::NotAttached(Location::Cloud))
    }

    /// Run a cloud call under the configured timeout and retry policy.
    pub(crate) async fn cloud_call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        op: F,
    ) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        Ok(self
            .retry
            .run(what, self.config.cloud_timeout(), cancel, op)
            .await?)
    }

    async fn run_save(
        &self,
        ctx: &TaskContext,
        slot: &SlotName,
        options: SaveOptions,
        snapshot: Snapshot,
    ) -> EngineResult<SaveOutcome> {
        let location = options.location;
        let local = if location.includes_local() { Some(self.local()?) } else { None };
        let cloud = if location.includes_cloud() { Some(self.cloud()?) } else { None };

        let encode = PhaseObserver::new(ctx, 0.0, 0.3, "encode");
        encode.begin();
        let blob = self
            .schema
            .seal_observed(&snapshot, &mut |done, total| encode.checkpoint(done, total))?;
        ctx.checkpoint()?;

        let bytes = blob.to_bytes();
        let meta = SlotMetadata {
            schema_version: blob.schema_version(),
            timestamp: Timestamp::now(),
            description: options.description,
            locations: location,
            checksum: blob.checksum(),
            origin: self.device.clone(),
        };
        let (local_span, cloud_start, cloud_span) = match (local.is_some(), cloud.is_some()) {
            (true, true) => (0.35, 0.65, 0.35),
            (true, false) => (0.7, 1.0, 0.0),
            (false, _) => (0.0, 0.3, 0.7),
        };

        let local_result = match local {
            Some(backend) => {
                let observer = PhaseObserver::new(ctx, 0.3, local_span, "write-local");
                observer.begin();
                let result = backend
                    .write(slot, &bytes, &meta, &observer)
                    .await
                    .map_err(EngineError::from);
                if let Ok(info) = &result {
                    self.index.apply(IndexUpdate::Stored(info.clone()));
                }
                Some(result)
            }
            None => None,
        };
        ctx.checkpoint()?;

        let cloud_result = match cloud {
            Some(backend) => {
                let observer = PhaseObserver::new(ctx, cloud_start, cloud_span, "upload");
                observer.begin();
                let backend: &CloudBackend = backend;
                let (bytes, meta, obs) = (bytes.as_slice(), &meta, &observer);
                let result = self
                    .cloud_call(ctx.token(), "upload", move || backend.write(slot, bytes, meta, obs))
                    .await;
                if let Ok(info) = &result {
                    self.index.apply(IndexUpdate::Stored(info.clone()));
                }
                Some(result)
            }
            None => None,
        };

        let outcome = match (local_result, cloud_result) {
            (Some(Ok(info)), None) | (None, Some(Ok(info))) => SaveOutcome::Complete(info),
            (Some(Ok(info)), Some(Ok(_))) => {
                SaveOutcome::Complete(self.index.get(slot).unwrap_or(info))
            }
            (Some(Err(err)), None) | (None, Some(Err(err))) => return Err(err),
            (Some(Err(local)), Some(Err(cloud))) => {
                warn!(%slot, error = %cloud, "cloud save failed as well");
                return Err(local);
            }
            (Some(local), Some(cloud)) => {
                warn!(
                    %slot,
                    local_ok = local.is_ok(),
                    cloud_ok = cloud.is_ok(),
                    "save succeeded on one location only"
                );
                SaveOutcome::PartialSuccess { local, cloud }
            }
            (None, None) => return Err(EngineError::NotAttached(location)),
        };
        ctx.report(1.0, "done");
        info!(%slot, %location, bytes = bytes.len(), complete = outcome.is_complete(), "slot saved");
        Ok(outcome)
    }

    fn open(&self, ctx: &TaskContext, bytes: &[u8]) -> EngineResult<LoadedSnapshot> {
        let decode = PhaseObserver::new(ctx, 0.5, 0.5, "decode");
        decode.begin();
        Ok(self
            .schema
            .open_observed(bytes, &mut |done, total| decode.checkpoint(done, total))?)
    }

    async fn run_load(&self, ctx: &TaskContext, slot: &SlotName, location: Location) -> EngineResult<LoadedSnapshot> {
        let mut local_failure: Option<EngineError> = None;
        if location.includes_local() {
            let local = self.local()?;
            ctx.report(0.0, "read-local");
            match local.read(slot).await {
                Ok(bytes) => match self.open(ctx, &bytes) {
                    Ok(loaded) => {
                        debug!(%slot, source = "local", migrated = loaded.was_migrated(), "slot loaded");
                        return Ok(loaded);
                    }
                    Err(err) if location.includes_cloud() && err.is_integrity() => {
                        warn!(%slot, error = %err, "local copy failed integrity check, trying cloud");
                        local_failure = Some(err);
                    }
                    Err(err) => return Err(err),
                },
                Err(StorageError::NotFound(_)) if location.includes_cloud() => {
                    debug!(%slot, "no local copy, trying cloud");
                }
                Err(err) => return Err(err.into()),
            }
            ctx.checkpoint()?;
        }

        let cloud: &CloudBackend = self.cloud()?;
        ctx.report(0.1, "download");
        let bytes = match self.cloud_call(ctx.token(), "read", move || cloud.read(slot)).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return Err(match local_failure {
                    Some(local) => {
                        warn!(%slot, error = %err, "cloud fallback failed");
                        local
                    }
                    None => err,
                })
            }
        };
        let loaded = self.open(ctx, &bytes)?;
        debug!(%slot, source = "cloud", migrated = loaded.was_migrated(), "slot loaded");
        Ok(loaded)
    }

    async fn run_delete(&self, ctx: &TaskContext, slot: &SlotName, location: Location) -> EngineResult<()> {
        let mut removed = false;
        if location.includes_local() {
            match self.local()?.delete(slot).await {
                Ok(()) => {
                    removed = true;
                    self.index.apply(IndexUpdate::Removed {
                        slot: slot.clone(),
                        location: Location::Local,
                    });
                }
                Err(StorageError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
            ctx.checkpoint()?;
        }
        if location.includes_cloud() {
            let cloud: &CloudBackend = self.cloud()?;
            match self.cloud_call(ctx.token(), "delete", move || cloud.delete(slot)).await {
                Ok(()) => {
                    removed = true;
                    self.index.apply(IndexUpdate::Removed {
                        slot: slot.clone(),
                        location: Location::Cloud,
                    });
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        if !removed {
            return Err(StorageError::NotFound(slot.to_string()).into());
        }
        info!(%slot, %location, "slot deleted");
        Ok(())
    }

    async fn run_sync(&self, ctx: &TaskContext, slot: &SlotName, mode: ConflictMode) -> EngineResult<SyncReport> {
        let local = self.local()?;
        let cloud: &CloudBackend = self.cloud()?;

        ctx.report(0.0, "inspect");
        let local_info = match local.info(slot).await {
            Ok(info) => Some(info),
            Err(StorageError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };
        let remotes = self
            .cloud_call(ctx.token(), "versions", move || cloud.versions(slot))
            .await?;
        ctx.checkpoint()?;
        ctx.report(0.2, "assess");

        let assessment = self
            .resolver
            .assess(slot, local_info.as_ref(), &remotes, Timestamp::now());
        let (plan, conflict, reason) = match assessment {
            Assessment::Conflict(record) => {
                let resolution = match mode {
                    ConflictMode::Decide(resolution) => resolution,
                    ConflictMode::Surface => {
                        self.hold_conflict(record.clone(), None);
                        return Err(SyncError::Conflict(Box::new(record)).into());
                    }
                    ConflictMode::Await => self.await_decision(ctx, record.clone()).await?,
                };
                info!(%slot, %resolution, "conflict decided");
                let plan = self
                    .resolver
                    .plan(slot, local_info.as_ref(), &remotes, resolution)?;
                let mut record = record;
                record.outcome = Some(resolution);
                (plan, Some(record), None)
            }
            assessment => {
                let reason = match &assessment {
                    Assessment::AutoResolve { reason, .. } => Some(reason.clone()),
                    _ => None,
                };
                let plan = self
                    .resolver
                    .plan_assessment(slot, &assessment, local_info.as_ref(), &remotes)?
                    .unwrap_or_default();
                (plan, None, reason)
            }
        };

        self.execute_plan(ctx, slot, &plan).await?;
        self.settle_conflict(slot);
        self.refresh_slot(ctx.token(), slot).await?;
        ctx.report(1.0, "done");
        info!(%slot, actions = plan.actions.len(), conflict = conflict.is_some(), "slot synced");

        Ok(SyncReport {
            slot: slot.clone(),
            plan,
            conflict,
            reason,
            info: self.index.get(slot),
        })
    }

    fn hold_conflict(&self, record: ConflictRecord, decision: Option<oneshot::Sender<Resolution>>) {
        let slot = record.slot.clone();
        {
            let mut conflicts = self.conflicts.lock().expect("conflict lock poisoned");
            conflicts.insert(slot.clone(), PendingConflict { record, decision });
        }
        self.index.apply(IndexUpdate::Conflict { slot, pending: true });
    }

    fn settle_conflict(&self, slot: &SlotName) {
        let removed = {
            let mut conflicts = self.conflicts.lock().expect("conflict lock poisoned");
            conflicts.remove(slot).is_some()
        };
        if removed {
            self.index.apply(IndexUpdate::Conflict {
                slot: slot.clone(),
                pending: false,
            });
        }
    }

    /// Park the task until a decision arrives. The worker goes back to the
    /// pool for the wait; the slot stays held. Cancellation leaves the
    /// record pending without a waiter.
    async fn await_decision(&self, ctx: &TaskContext, record: ConflictRecord) -> EngineResult<Resolution> {
        let slot = record.slot.clone();
        let (tx, rx) = oneshot::channel();
        self.hold_conflict(record, Some(tx));
        ctx.report(ctx.fraction(), "awaiting-decision");
        info!(%slot, "sync waiting for a conflict decision");

        let decision = ctx
            .suspend(async {
                tokio::select! {
                    decision = rx => decision.map_err(|_| EngineError::Cancelled),
                    _ = ctx.cancelled() => Err(EngineError::Cancelled),
                }
            })
            .await
            .and_then(|resolution| {
                ctx.checkpoint()?;
                Ok(resolution)
            });
        if decision.is_err() {
            let mut conflicts = self.conflicts.lock().expect("conflict lock poisoned");
            if let Some(pending) = conflicts.get_mut(&slot) {
                pending.decision = None;
            }
        }
        decision
    }

    pub(crate) async fn refresh_slot(&self, cancel: &CancellationToken, slot: &SlotName) -> EngineResult<()> {
        let local = match &self.local {
            Some(backend) => match backend.info(slot).await {
                Ok(info) => Some(info),
                Err(StorageError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            },
            None => None,
        };
        let cloud = match &self.cloud {
            Some(backend) => {
                let backend: &CloudBackend = backend;
                match self.cloud_call(cancel, "info", move || backend.info(slot)).await {
                    Ok(info) => Some(info),
                    Err(err) if err.is_not_found() => None,
                    Err(err) => return Err(err),
                }
            }
            None => None,
        };
        self.index.apply(IndexUpdate::Refreshed {
            slot: slot.clone(),
            local,
            cloud,
        });
        Ok(())
    }
}

/// The persistence engine.
///
/// Built with [`EngineBuilder`](crate::EngineBuilder). Every operation that
/// touches storage returns a [`TaskHandle`] immediately; the work runs on the
/// scheduler and reports progress through the handle. Cloning is cheap.
#[derive(Clone)]
pub struct PersistenceEngine {
    inner: Arc<EngineInner>,
    scheduler: TaskScheduler,
}

impl PersistenceEngine {
    pub(crate) fn from_parts(inner: EngineInner, scheduler: TaskScheduler) -> Self {
        Self {
            inner: Arc::new(inner),
            scheduler,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn schema(&self) -> &SaveSchema {
        &self.inner.schema
    }

    pub fn device(&self) -> &DeviceId {
        &self.inner.device
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn has_local(&self) -> bool {
        self.inner.local.is_some()
    }

    pub fn has_cloud(&self) -> bool {
        self.inner.cloud.is_some()
    }

    pub fn slot_state(&self, slot: &SlotName) -> SlotState {
        self.scheduler.slot_state(slot)
    }

    /// Save the snapshot built by `producer` to `location`.
    ///
    /// The producer runs on the worker when the task starts, after every
    /// earlier task for the slot has finished.
    pub fn save_async<F>(&self, slot: SlotName, producer: F, location: Location) -> TaskHandle<SaveOutcome, EngineError>
    where
        F: FnOnce() -> Snapshot + Send + 'static,
    {
        self.save_with(slot, SaveOptions::new(location), producer)
    }

    pub fn save_with<F>(&self, slot: SlotName, options: SaveOptions, producer: F) -> TaskHandle<SaveOutcome, EngineError>
    where
        F: FnOnce() -> Snapshot + Send + 'static,
    {
        let inner = self.inner.clone();
        let task_slot = slot.clone();
        self.scheduler.submit(slot, TaskKind::Save, move |ctx| async move {
            ctx.report(0.0, "snapshot");
            let snapshot = producer();
            ctx.checkpoint()?;
            inner.run_save(&ctx, &task_slot, options, snapshot).await
        })
    }

    /// Save the current state of a [`StateProducer`].
    pub fn save_state<P>(&self, slot: SlotName, producer: Arc<P>, location: Location) -> TaskHandle<SaveOutcome, EngineError>
    where
        P: StateProducer + ?Sized + 'static,
    {
        self.save_async(slot, move || producer.build_snapshot(), location)
    }

    /// Load, migrate and validate a slot.
    ///
    /// With [`Location::Both`] the local copy is preferred; the cloud copy
    /// is used when the local one is missing or fails its integrity check.
    pub fn load_async(&self, slot: SlotName, location: Location) -> TaskHandle<LoadedSnapshot, EngineError> {
        let inner = self.inner.clone();
        let task_slot = slot.clone();
        self.scheduler.submit(slot, TaskKind::Load, move |ctx| async move {
            inner.run_load(&ctx, &task_slot, location).await
        })
    }

    /// Load a slot and hand it to `producer` on the caller's context.
    pub async fn restore_state<P>(&self, slot: SlotName, location: Location, producer: &P) -> EngineResult<LoadedSnapshot>
    where
        P: StateProducer + ?Sized,
    {
        let loaded = self
            .load_async(slot, location)
            .wait()
            .await
            .into_result(|| EngineError::Cancelled)?;
        producer
            .apply_snapshot(loaded.snapshot.clone())
            .map_err(|e| EngineError::Producer(e.to_string()))?;
        Ok(loaded)
    }

    /// Remove a slot from `location`. Fails with `NotFound` if it existed
    /// nowhere.
    pub fn delete_async(&self, slot: SlotName, location: Location) -> TaskHandle<(), EngineError> {
        let inner = self.inner.clone();
        let task_slot = slot.clone();
        self.scheduler.submit(slot, TaskKind::Delete, move |ctx| async move {
            inner.run_delete(&ctx, &task_slot, location).await
        })
    }

    /// Bring the local and cloud copies of a slot into agreement.
    pub fn sync_async(&self, slot: SlotName, mode: ConflictMode) -> TaskHandle<SyncReport, EngineError> {
        let inner = self.inner.clone();
        let task_slot = slot.clone();
        self.scheduler.submit(slot, TaskKind::Sync, move |ctx| async move {
            inner.run_sync(&ctx, &task_slot, mode).await
        })
    }

    /// Decide a pending conflict.
    ///
    /// If a sync is waiting on the slot it receives the decision and
    /// `Ok(None)` is returned. Otherwise a new sync applying the decision is
    /// submitted and its handle returned.
    pub fn resolve_conflict(
        &self,
        slot: &SlotName,
        resolution: Resolution,
    ) -> EngineResult<Option<TaskHandle<SyncReport, EngineError>>> {
        let waiter = {
            let mut conflicts = self.inner.conflicts.lock().expect("conflict lock poisoned");
            let pending = conflicts
                .get_mut(slot)
                .ok_or_else(|| SyncError::NoConflict(slot.clone()))?;
            pending.decision.take()
        };
        if let Some(tx) = waiter {
            if tx.send(resolution).is_ok() {
                debug!(%slot, %resolution, "decision delivered to waiting sync");
                return Ok(None);
            }
        }
        debug!(%slot, %resolution, "no sync waiting, scheduling one");
        Ok(Some(self.sync_async(slot.clone(), ConflictMode::Decide(resolution))))
    }

    /// Conflicts escalated and not yet resolved.
    pub fn pending_conflicts(&self) -> Vec<ConflictRecord> {
        let conflicts = self.inner.conflicts.lock().expect("conflict lock poisoned");
        conflicts.values().map(|p| p.record.clone()).collect()
    }

    /// Delete conflict archives, all of them or those of one slot. Returns
    /// the purged archive names.
    pub async fn purge_archives(&self, base: Option<&SlotName>) -> EngineResult<Vec<SlotName>> {
        self.refresh_index().await?;
        let targets: Vec<SaveDataInfo> = self
            .inner
            .index
            .list(None)
            .into_iter()
            .filter(|info| info.slot.is_archive())
            .filter(|info| base.map_or(true, |b| info.slot.archive_base() == Some(b.as_str())))
            .collect();

        let mut purged = Vec::with_capacity(targets.len());
        for info in targets {
            let done = self.delete_async(info.slot.clone(), info.location).wait().await;
            match done.into_result(|| EngineError::Cancelled) {
                Ok(()) => purged.push(info.slot),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        info!(purged = purged.len(), "conflict archives purged");
        Ok(purged)
    }

    /// Cached entries, optionally only those present at `location`.
    pub fn list(&self, location: Option<Location>) -> Vec<SaveDataInfo> {
        self.inner.index.list(location)
    }

    pub fn info(&self, slot: &SlotName) -> Option<SaveDataInfo> {
        self.inner.index.get(slot)
    }

    /// Re-list every attached backend into the index. An unreachable cloud
    /// keeps its cached entries. Returns the number of known slots.
    pub async fn refresh_index(&self) -> EngineResult<usize> {
        let inner = &self.inner;
        if let Some(local) = &inner.local {
            let entries = local.list().await?;
            inner.index.apply(IndexUpdate::Listed {
                location: Location::Local,
                entries,
            });
        }
        if let Some(cloud) = &inner.cloud {
            let cloud: &CloudBackend = cloud;
            match inner.cloud_call(&inner.stopping, "list", move || cloud.list()).await {
                Ok(entries) => inner.index.apply(IndexUpdate::Listed {
                    location: Location::Cloud,
                    entries,
                }),
                Err(err) if err.is_transient() => {
                    warn!(error = %err, "cloud unreachable, keeping cached entries");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(inner.index.len())
    }

    /// Stop accepting work, let in-flight tasks finish within `grace`
    /// (default from config), then cancel the rest.
    pub async fn shutdown(&self, grace: Option<Duration>) -> ShutdownReport {
        let grace = grace.unwrap_or_else(|| self.inner.config.shutdown_grace());
        let report = self.scheduler.shutdown(grace).await;
        self.inner.stopping.cancel();
        let mut conflicts = self.inner.conflicts.lock().expect("conflict lock poisoned");
        for pending in conflicts.values_mut() {
            pending.decision = None;
        }
        report
    }
}

impl std::fmt::Debug for PersistenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceEngine")
            .field("device", &self.inner.device)
            .field("schema_version", &self.inner.schema.current_version())
            .field("local", &self.has_local())
            .field("cloud", &self.has_cloud())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
