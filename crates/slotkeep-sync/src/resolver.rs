use std::collections::BTreeMap;
use std::time::Duration;

use slotkeep_types::{DeviceId, RemoteVersion, SaveDataInfo, SlotName, Timestamp};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::types::{
    Assessment, ConflictRecord, DivergentVersion, Resolution, ResolutionPlan, SyncAction,
};

/// Default ambiguity window.
pub const DEFAULT_AMBIGUITY_WINDOW: Duration = Duration::from_secs(2);

/// Tunables of the last-writer-wins policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConflictPolicy {
    /// Timestamps closer than this are treated as concurrent.
    pub ambiguity_window: Duration,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            ambiguity_window: DEFAULT_AMBIGUITY_WINDOW,
        }
    }
}

/// Compares local and remote copies of a slot and plans their resolution.
#[derive(Clone, Debug, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ConflictPolicy {
        &self.policy
    }

    /// Classify the state of `slot`.
    ///
    /// Incomplete remote versions are ignored entirely. `now` stamps any
    /// conflict record that is produced.
    pub fn assess(
        &self,
        slot: &SlotName,
        local: Option<&SaveDataInfo>,
        remotes: &[RemoteVersion],
        now: Timestamp,
    ) -> Assessment {
        let complete = complete_newest_first(remotes);
        let (local, newest) = match (local, complete.first()) {
            (None, None) => return Assessment::Absent,
            (Some(_), None) => return Assessment::LocalOnly,
            (None, Some(newest)) => {
                return Assessment::RemoteOnly {
                    version: (*newest).clone(),
                }
            }
            (Some(local), Some(newest)) => (local, *newest),
        };

        if local.checksum.is_some() && local.checksum == newest.checksum {
            return Assessment::InSync;
        }

        let window = self.policy.ambiguity_window;

        // Newest version per device among those that postdate the local copy.
        let mut newer_by_device: BTreeMap<&DeviceId, &RemoteVersion> = BTreeMap::new();
        for &v in complete.iter().filter(|v| v.timestamp > local.modified && v.checksum != local.checksum) {
            newer_by_device.entry(&v.origin).or_insert(v);
        }
        let newer: Vec<&RemoteVersion> = newer_by_device.into_values().collect();
        let concurrent: Vec<&RemoteVersion> = newer
            .iter()
            .copied()
            .filter(|a| {
                newer
                    .iter()
                    .any(|b| a.origin != b.origin && a.timestamp.within(&b.timestamp, window))
            })
            .collect();
        if concurrent.len() >= 2 {
            let record = self.record(
                slot,
                local,
                &concurrent,
                now,
                format!(
                    "{} devices wrote newer versions within {}ms of each other",
                    concurrent.len(),
                    window.as_millis()
                ),
            );
            info!(%slot, versions = record.versions.len(), "escalating multi-device conflict");
            return Assessment::Conflict(record);
        }

        if local.modified.within(&newest.timestamp, window) {
            let gap = local.modified.abs_diff(&newest.timestamp);
            let record = self.record(
                slot,
                local,
                &[newest],
                now,
                format!(
                    "local and remote saved {}ms apart (window {}ms)",
                    gap.as_millis(),
                    window.as_millis()
                ),
            );
            info!(%slot, gap_ms = gap.as_millis() as u64, "escalating conflict inside ambiguity window");
            return Assessment::Conflict(record);
        }

        let (resolution, reason) = if local.modified > newest.timestamp {
            (Resolution::KeepLocal, format!("local copy is newer than {}", newest.key))
        } else {
            (
                Resolution::KeepRemote,
                format!("remote version {} is newer than the local copy", newest.key),
            )
        };
        debug!(%slot, %resolution, "last writer wins");
        Assessment::AutoResolve { resolution, reason }
    }

    fn record(
        &self,
        slot: &SlotName,
        local: &SaveDataInfo,
        remotes: &[&RemoteVersion],
        now: Timestamp,
        reason: String,
    ) -> ConflictRecord {
        let mut versions = vec![DivergentVersion::from_local(local)];
        versions.extend(remotes.iter().map(|v| DivergentVersion::from_remote(v)));
        ConflictRecord {
            slot: slot.clone(),
            versions,
            outcome: None,
            detected_at: now,
            reason,
        }
    }

    /// Plan for an assessment that needs no decision. Returns `None` for a
    /// conflict.
    pub fn plan_assessment(
        &self,
        slot: &SlotName,
        assessment: &Assessment,
        local: Option<&SaveDataInfo>,
        remotes: &[RemoteVersion],
    ) -> SyncResult<Option<ResolutionPlan>> {
        let plan = match assessment {
            Assessment::Absent | Assessment::InSync => ResolutionPlan::default(),
            Assessment::LocalOnly => ResolutionPlan {
                resolution: None,
                actions: vec![SyncAction::Upload],
            },
            Assessment::RemoteOnly { version } => ResolutionPlan {
                resolution: None,
                actions: vec![SyncAction::Download {
                    key: version.key.clone(),
                }],
            },
            Assessment::AutoResolve { resolution, .. } => self.plan(slot, local, remotes, *resolution)?,
            Assessment::Conflict(_) => return Ok(None),
        };
        Ok(Some(plan))
    }

    /// Plan the actions for an explicit `resolution`.
    ///
    /// Every complete remote version whose content is not kept is archived
    /// before it is pruned; a replaced local copy is archived before the
    /// download.
    pub fn plan(
        &self,
        slot: &SlotName,
        local: Option<&SaveDataInfo>,
        remotes: &[RemoteVersion],
        resolution: Resolution,
    ) -> SyncResult<ResolutionPlan> {
        let invalid = |reason: &str| SyncError::InvalidResolution {
            slot: slot.clone(),
            reason: reason.to_string(),
        };
        let complete = complete_newest_first(remotes);
        let mut actions = Vec::new();

        match resolution {
            Resolution::KeepLocal => {
                let local = local.ok_or_else(|| invalid("no local copy to keep"))?;
                for v in complete.iter().filter(|v| v.checksum != local.checksum) {
                    actions.push(SyncAction::ArchiveRemote {
                        key: v.key.clone(),
                        to: slot.archive_name(v.origin.as_str(), v.timestamp)?,
                    });
                }
                actions.push(SyncAction::Upload);
            }
            Resolution::KeepRemote => {
                let winner = complete.first().ok_or_else(|| invalid("no complete remote version"))?;
                if let Some(local) = local.filter(|l| l.checksum != winner.checksum) {
                    let origin = local.origin.clone().unwrap_or_else(DeviceId::unknown);
                    actions.push(SyncAction::ArchiveLocal {
                        to: slot.archive_name(origin.as_str(), local.modified)?,
                    });
                }
                let local_sum = local.and_then(|l| l.checksum);
                for v in complete
                    .iter()
                    .skip(1)
                    .filter(|v| v.checksum != winner.checksum && v.checksum != local_sum)
                {
                    actions.push(SyncAction::ArchiveRemote {
                        key: v.key.clone(),
                        to: slot.archive_name(v.origin.as_str(), v.timestamp)?,
                    });
                }
                actions.push(SyncAction::Download {
                    key: winner.key.clone(),
                });
            }
            Resolution::KeepBoth => {
                let local = local.ok_or_else(|| invalid("no local copy to keep"))?;
                let winner = complete.first().ok_or_else(|| invalid("no complete remote version"))?;
                actions.push(SyncAction::CopyRemote {
                    key: winner.key.clone(),
                    to: slot.archive_name(winner.origin.as_str(), winner.timestamp)?,
                });
                for v in complete
                    .iter()
                    .skip(1)
                    .filter(|v| v.checksum != local.checksum && v.checksum != winner.checksum)
                {
                    actions.push(SyncAction::ArchiveRemote {
                        key: v.key.clone(),
                        to: slot.archive_name(v.origin.as_str(), v.timestamp)?,
                    });
                }
                actions.push(SyncAction::Upload);
            }
        }

        let keep = match resolution {
            Resolution::KeepRemote => complete.first().map(|v| v.key.as_str()),
            _ => None,
        };
        let prune: Vec<String> = complete
            .iter()
            .filter(|v| Some(v.key.as_str()) != keep)
            .map(|v| v.key.clone())
            .collect();
        if !prune.is_empty() {
            actions.push(SyncAction::PruneRemote { keys: prune });
        }

        Ok(ResolutionPlan {
            resolution: Some(resolution),
            actions,
        })
    }
}

/// Complete versions, newest first (ties broken by device id).
fn complete_newest_first(remotes: &[RemoteVersion]) -> Vec<&RemoteVersion> {
    let mut complete: Vec<&RemoteVersion> = remotes.iter().filter(|v| v.complete).collect();
    complete.sort_by(|a, b| (b.timestamp, &b.origin).cmp(&(a.timestamp, &a.origin)));
    complete
}

#[cfg(test)]
mod tests {
    use slotkeep_types::{Checksum, Location};

    use super::*;

    fn slot() -> SlotName {
        SlotName::new("Profile1").unwrap()
    }

    fn sum(byte: u8) -> Checksum {
        Checksum::from_digest([byte; 32])
    }

    fn local(at: u64, content: u8) -> SaveDataInfo {
        SaveDataInfo::new(slot(), 100, Timestamp::from_millis(at), Location::Local)
            .with_checksum(sum(content))
            .with_origin(DeviceId::new("here").unwrap())
    }

    fn remote(device: &str, at: u64, content: u8) -> RemoteVersion {
        RemoteVersion {
            key: format!("u/Profile1/{device}-{at}"),
            slot: slot(),
            origin: DeviceId::new(device).unwrap(),
            timestamp: Timestamp::from_millis(at),
            size: 100,
            checksum: Some(sum(content)),
            complete: true,
        }
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(ConflictPolicy {
            ambiguity_window: Duration::from_millis(2_000),
        })
    }

    const NOW: Timestamp = Timestamp::from_millis(1_000_000);

    #[test]
    fn absent_and_single_sided() {
        let r = resolver();
        assert_eq!(r.assess(&slot(), None, &[], NOW), Assessment::Absent);
        assert_eq!(r.assess(&slot(), Some(&local(10, 1)), &[], NOW), Assessment::LocalOnly);
        let remote = remote("there", 10, 1);
        assert_eq!(
            r.assess(&slot(), None, &[remote.clone()], NOW),
            Assessment::RemoteOnly { version: remote }
        );
    }

    #[test]
    fn matching_checksums_are_in_sync() {
        let a = r_assess(&local(10_000, 7), &[remote("there", 50_000, 7)]);
        assert_eq!(a, Assessment::InSync);
    }

    fn r_assess(local: &SaveDataInfo, remotes: &[RemoteVersion]) -> Assessment {
        resolver().assess(&slot(), Some(local), remotes, NOW)
    }

    #[test]
    fn incomplete_versions_are_ignored() {
        let mut partial = remote("there", 90_000, 2);
        partial.complete = false;
        assert_eq!(r_assess(&local(10_000, 1), &[partial]), Assessment::LocalOnly);
    }

    #[test]
    fn last_writer_wins_outside_window() {
        let a = r_assess(&local(10_000, 1), &[remote("there", 20_000, 2)]);
        assert!(matches!(a, Assessment::AutoResolve { resolution: Resolution::KeepRemote, .. }));
        let a = r_assess(&local(30_000, 1), &[remote("there", 20_000, 2)]);
        assert!(matches!(a, Assessment::AutoResolve { resolution: Resolution::KeepLocal, .. }));
    }

    #[test]
    fn within_window_escalates() {
        let a = r_assess(&local(10_000, 1), &[remote("there", 11_500, 2)]);
        let Assessment::Conflict(record) = a else {
            panic!("expected conflict, got {a:?}");
        };
        assert_eq!(record.versions.len(), 2);
        assert!(record.local().is_some());
        assert_eq!(record.detected_at, NOW);
        assert!(!record.is_resolved());
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let a = r_assess(&local(10_000, 1), &[remote("there", 12_000, 2)]);
        assert!(matches!(a, Assessment::Conflict(_)));
        let a = r_assess(&local(10_000, 1), &[remote("there", 12_001, 2)]);
        assert!(matches!(a, Assessment::AutoResolve { .. }));
    }

    #[test]
    fn two_devices_newer_than_local_escalate() {
        // Both far newer than local, but within the window of each other.
        let remotes = [remote("dev-b", 50_000, 2), remote("dev-c", 51_000, 3)];
        let a = r_assess(&local(10_000, 1), &remotes);
        let Assessment::Conflict(record) = a else {
            panic!("expected conflict");
        };
        assert_eq!(record.remotes().count(), 2);
    }

    #[test]
    fn two_devices_far_apart_resolve_to_newest() {
        let remotes = [remote("dev-b", 50_000, 2), remote("dev-c", 90_000, 3)];
        let a = r_assess(&local(10_000, 1), &remotes);
        assert!(matches!(a, Assessment::AutoResolve { resolution: Resolution::KeepRemote, .. }));
    }

    #[test]
    fn keep_local_archives_remote_then_uploads() {
        let remotes = [remote("there", 11_000, 2)];
        let plan = resolver()
            .plan(&slot(), Some(&local(10_000, 1)), &remotes, Resolution::KeepLocal)
            .unwrap();
        assert_eq!(
            plan.actions,
            vec![
                SyncAction::ArchiveRemote {
                    key: "u/Profile1/there-11000".into(),
                    to: SlotName::new("Profile1.conflict-there-11000").unwrap(),
                },
                SyncAction::Upload,
                SyncAction::PruneRemote {
                    keys: vec!["u/Profile1/there-11000".into()]
                },
            ]
        );
    }

    #[test]
    fn keep_remote_archives_local_then_downloads() {
        let remotes = [remote("there", 11_000, 2)];
        let plan = resolver()
            .plan(&slot(), Some(&local(10_000, 1)), &remotes, Resolution::KeepRemote)
            .unwrap();
        assert_eq!(
            plan.actions,
            vec![
                SyncAction::ArchiveLocal {
                    to: SlotName::new("Profile1.conflict-here-10000").unwrap(),
                },
                SyncAction::Download {
                    key: "u/Profile1/there-11000".into()
                },
            ]
        );
    }

    #[test]
    fn keep_both_copies_remote_to_new_slot() {
        let remotes = [remote("there", 11_000, 2)];
        let plan = resolver()
            .plan(&slot(), Some(&local(10_000, 1)), &remotes, Resolution::KeepBoth)
            .unwrap();
        assert!(matches!(plan.actions[0], SyncAction::CopyRemote { .. }));
        assert_eq!(plan.actions[1], SyncAction::Upload);
        assert_eq!(plan.archives().len(), 1);
    }

    #[test]
    fn keep_remote_archives_losing_remote_versions() {
        let remotes = [remote("dev-b", 50_000, 2), remote("dev-c", 51_000, 3)];
        let plan = resolver()
            .plan(&slot(), Some(&local(10_000, 1)), &remotes, Resolution::KeepRemote)
            .unwrap();
        let archived: Vec<String> = plan.archives().iter().map(|s| s.to_string()).collect();
        assert_eq!(
            archived,
            vec!["Profile1.conflict-here-10000", "Profile1.conflict-dev-b-50000"]
        );
        assert!(plan.actions.contains(&SyncAction::Download {
            key: "u/Profile1/dev-c-51000".into()
        }));
        assert!(plan.actions.contains(&SyncAction::PruneRemote {
            keys: vec!["u/Profile1/dev-b-50000".into()]
        }));
    }

    #[test]
    fn invalid_resolutions() {
        let err = resolver()
            .plan(&slot(), None, &[remote("there", 1, 1)], Resolution::KeepLocal)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidResolution { .. }));
        let err = resolver()
            .plan(&slot(), Some(&local(1, 1)), &[], Resolution::KeepRemote)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidResolution { .. }));
    }

    #[test]
    fn plan_assessment_handles_every_case() {
        let r = resolver();
        let l = local(10_000, 1);
        let remotes = [remote("there", 90_000, 2)];
        let assessment = r.assess(&slot(), Some(&l), &remotes, NOW);
        let plan = r.plan_assessment(&slot(), &assessment, Some(&l), &remotes).unwrap().unwrap();
        assert_eq!(plan.resolution, Some(Resolution::KeepRemote));

        let conflict = r.assess(&slot(), Some(&l), &[remote("there", 10_500, 2)], NOW);
        assert!(r.plan_assessment(&slot(), &conflict, Some(&l), &remotes).unwrap().is_none());

        let plan = r
            .plan_assessment(&slot(), &Assessment::LocalOnly, Some(&l), &[])
            .unwrap()
            .unwrap();
        assert_eq!(plan.actions, vec![SyncAction::Upload]);
    }
}
