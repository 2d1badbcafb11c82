use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use slotkeep_codec::{DecodeError, Snapshot};
use tracing::debug;

use crate::error::{ContainerError, ContainerResult};

/// One `v -> v + 1` migration step.
pub type MigrationFn = Arc<dyn Fn(Snapshot) -> Result<Snapshot, DecodeError> + Send + Sync>;

/// Ordered chain of single-version migration steps.
///
/// Steps run in strict sequence from the stored version up to `current`.
/// The whole plan is checked before the first step runs, so a gap never
/// leaves a half-migrated snapshot behind.
#[derive(Clone)]
pub struct MigrationChain {
    current: u32,
    minimum: u32,
    steps: BTreeMap<u32, MigrationFn>,
}

impl MigrationChain {
    /// A chain with no steps: only saves at `current` can be opened.
    pub fn new(current: u32) -> Self {
        Self {
            current,
            minimum: current,
            steps: BTreeMap::new(),
        }
    }

    /// Oldest stored version the chain promises to migrate; checked by
    /// [`Self::verify`].
    pub fn with_minimum(mut self, minimum: u32) -> Self {
        self.minimum = minimum.min(self.current);
        self
    }

    /// Builder form of [`Self::register`].
    pub fn with_step<F>(mut self, from: u32, step: F) -> Self
    where
        F: Fn(Snapshot) -> Result<Snapshot, DecodeError> + Send + Sync + 'static,
    {
        self.register(from, step);
        self
    }

    /// Register the step that upgrades `from` to `from + 1`. Replaces any
    /// step already registered for `from`.
    pub fn register<F>(&mut self, from: u32, step: F) -> &mut Self
    where
        F: Fn(Snapshot) -> Result<Snapshot, DecodeError> + Send + Sync + 'static,
    {
        self.steps.insert(from, Arc::new(step));
        self
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn minimum(&self) -> u32 {
        self.minimum
    }

    /// The `from` versions that would run for a snapshot stored at `stored`.
    pub fn plan(&self, stored: u32) -> ContainerResult<Vec<u32>> {
        if stored > self.current {
            return Err(DecodeError::VersionUnsupported {
                found: stored,
                supported: self.current,
            }
            .into());
        }
        (stored..self.current)
            .map(|v| {
                if self.steps.contains_key(&v) {
                    Ok(v)
                } else {
                    Err(ContainerError::MigrationGap {
                        missing_from: v,
                        target: self.current,
                    })
                }
            })
            .collect()
    }

    /// Upgrade `snapshot` from `stored` to the current version.
    ///
    /// Returns the migrated snapshot and the `from` version of every step
    /// that ran, in order.
    pub fn migrate(&self, snapshot: Snapshot, stored: u32) -> ContainerResult<(Snapshot, Vec<u32>)> {
        let plan = self.plan(stored)?;
        let mut snapshot = snapshot;
        for &from in &plan {
            let step = self.steps.get(&from).ok_or(ContainerError::MigrationGap {
                missing_from: from,
                target: self.current,
            })?;
            snapshot = step(snapshot).map_err(|source| ContainerError::MigrationFailed { from, source })?;
            debug!(from, to = from + 1, "applied migration step");
        }
        Ok((snapshot, plan))
    }

    /// Check that every version from `minimum` up to `current` can be migrated.
    pub fn verify(&self) -> ContainerResult<()> {
        self.plan(self.minimum).map(|_| ())
    }
}

impl fmt::Debug for MigrationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationChain")
            .field("current", &self.current)
            .field("minimum", &self.minimum)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}
