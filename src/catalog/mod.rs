//! Threshold catalog.
//!
//! Every check has a stable identifier, a position in the fixed report
//! order, gating rules (minimum server version, OS access) and a pure
//! evaluator turning already-fetched values into a [`Finding`]. Nothing in
//! this module performs I/O.

pub mod activity;
pub mod currency;
pub mod maintenance;
pub mod memory;
pub mod settings;
pub mod wal;

use serde::Serialize;

use crate::context::ClusterContext;
use crate::report::{Finding, Status};
use crate::version::ReleaseLine;

/// Where a check gets its input from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Computed from [`ClusterContext`] alone.
    Derived,
    /// One or more SQL statements.
    Query,
    /// Files on the database host.
    Filesystem,
    /// An external client utility.
    Tool,
}

/// Static definition of one check.
#[derive(Clone, Copy, Debug)]
pub struct CheckSpec {
    pub id: CheckId,
    pub source: Source,
    /// Oldest release line the check's catalog columns exist in.
    pub floor: Option<ReleaseLine>,
    /// Needs filesystem or kernel access to the database host.
    pub os_access: bool,
    /// A non-zero count is followed by a detail listing.
    pub lists_details: bool,
}

impl CheckSpec {
    const fn new(id: CheckId, source: Source) -> Self {
        Self {
            id,
            source,
            floor: None,
            os_access: false,
            lists_details: false,
        }
    }

    const fn floor(mut self, major: u32, minor: u32) -> Self {
        self.floor = Some(ReleaseLine::new(major, minor));
        self
    }

    const fn os_access(mut self) -> Self {
        self.os_access = true;
        self
    }

    const fn lists_details(mut self) -> Self {
        self.lists_details = true;
        self
    }

    /// Reason the check does not apply to `ctx`, if any.
    pub fn not_applicable(&self, ctx: &ClusterContext) -> Option<String> {
        if let Some(floor) = self.floor
            && ctx.version.line() < floor
        {
            return Some(format!(
                "Not available before PostgreSQL {} (server is {})",
                floor, ctx.version
            ));
        }
        if self.os_access && !ctx.has_os_access() {
            return Some(if ctx.is_managed() {
                "Not applicable on a managed deployment".to_string()
            } else {
                "Requires local access to the database host".to_string()
            });
        }
        None
    }
}

/// Check identifiers in report order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckId {
    VersionMajor,
    VersionMinor,
    MemSharedBuffers,
    MemWorkMem,
    MemMaintenanceWorkMem,
    MemEffectiveCacheSize,
    CacheHitRatio,
    Connections,
    IdleInTransaction,
    LongRunningQueries,
    BlockedQueries,
    Archiving,
    Replication,
    DatabaseConflicts,
    Checkpoints,
    ConfigSanity,
    WriterBehavior,
    OrphanedLargeObjects,
    Bloat,
    UnusedIndexes,
    FreezeCandidates,
    AnalyzeCandidates,
    OvercommitMemory,
    OvercommitRatio,
}

impl CheckId {
    /// The fixed checklist. Reports always follow this order.
    pub const ALL: [CheckId; 24] = [
        CheckId::VersionMajor,
        CheckId::VersionMinor,
        CheckId::MemSharedBuffers,
        CheckId::MemWorkMem,
        CheckId::MemMaintenanceWorkMem,
        CheckId::MemEffectiveCacheSize,
        CheckId::CacheHitRatio,
        CheckId::Connections,
        CheckId::IdleInTransaction,
        CheckId::LongRunningQueries,
        CheckId::BlockedQueries,
        CheckId::Archiving,
        CheckId::Replication,
        CheckId::DatabaseConflicts,
        CheckId::Checkpoints,
        CheckId::ConfigSanity,
        CheckId::WriterBehavior,
        CheckId::OrphanedLargeObjects,
        CheckId::Bloat,
        CheckId::UnusedIndexes,
        CheckId::FreezeCandidates,
        CheckId::AnalyzeCandidates,
        CheckId::OvercommitMemory,
        CheckId::OvercommitRatio,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            CheckId::VersionMajor => "version_major",
            CheckId::VersionMinor => "version_minor",
            CheckId::MemSharedBuffers => "mem_shared_buffers",
            CheckId::MemWorkMem => "mem_work_mem",
            CheckId::MemMaintenanceWorkMem => "mem_maintenance_work_mem",
            CheckId::MemEffectiveCacheSize => "mem_effective_cache_size",
            CheckId::CacheHitRatio => "cache_hit_ratio",
            CheckId::Connections => "connections",
            CheckId::IdleInTransaction => "idle_in_transaction",
            CheckId::LongRunningQueries => "long_running_queries",
            CheckId::BlockedQueries => "blocked_queries",
            CheckId::Archiving => "archiving",
            CheckId::Replication => "replication",
            CheckId::DatabaseConflicts => "database_conflicts",
            CheckId::Checkpoints => "checkpoints",
            CheckId::ConfigSanity => "config_sanity",
            CheckId::WriterBehavior => "writer_behavior",
            CheckId::OrphanedLargeObjects => "orphaned_large_objects",
            CheckId::Bloat => "bloat",
            CheckId::UnusedIndexes => "unused_indexes",
            CheckId::FreezeCandidates => "freeze_candidates",
            CheckId::AnalyzeCandidates => "analyze_candidates",
            CheckId::OvercommitMemory => "overcommit_memory",
            CheckId::OvercommitRatio => "overcommit_ratio",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            CheckId::VersionMajor => "Major version",
            CheckId::VersionMinor => "Minor version",
            CheckId::MemSharedBuffers => "shared_buffers",
            CheckId::MemWorkMem => "work_mem",
            CheckId::MemMaintenanceWorkMem => "maintenance_work_mem",
            CheckId::MemEffectiveCacheSize => "effective_cache_size",
            CheckId::CacheHitRatio => "Cache hit ratio",
            CheckId::Connections => "Connections",
            CheckId::IdleInTransaction => "Idle in transaction",
            CheckId::LongRunningQueries => "Long running queries",
            CheckId::BlockedQueries => "Blocked queries",
            CheckId::Archiving => "WAL archiving",
            CheckId::Replication => "Replication",
            CheckId::DatabaseConflicts => "Database conflicts",
            CheckId::Checkpoints => "Checkpoints",
            CheckId::ConfigSanity => "Configuration",
            CheckId::WriterBehavior => "Background writer",
            CheckId::OrphanedLargeObjects => "Orphaned large objects",
            CheckId::Bloat => "Bloat",
            CheckId::UnusedIndexes => "Unused indexes",
            CheckId::FreezeCandidates => "Freeze candidates",
            CheckId::AnalyzeCandidates => "Analyze candidates",
            CheckId::OvercommitMemory => "vm.overcommit_memory",
            CheckId::OvercommitRatio => "vm.overcommit_ratio",
        }
    }

    pub fn spec(&self) -> CheckSpec {
        let id = *self;
        match id {
            CheckId::VersionMajor
            | CheckId::VersionMinor
            | CheckId::MemSharedBuffers
            | CheckId::MemWorkMem
            | CheckId::MemMaintenanceWorkMem
            | CheckId::MemEffectiveCacheSize
            | CheckId::ConfigSanity => CheckSpec::new(id, Source::Derived),
            CheckId::CacheHitRatio
            | CheckId::Connections
            | CheckId::Checkpoints
            | CheckId::WriterBehavior => CheckSpec::new(id, Source::Query),
            CheckId::IdleInTransaction
            | CheckId::LongRunningQueries
            | CheckId::BlockedQueries => CheckSpec::new(id, Source::Query).floor(9, 2),
            CheckId::DatabaseConflicts | CheckId::Replication => {
                CheckSpec::new(id, Source::Query).floor(9, 1)
            }
            CheckId::Archiving => CheckSpec::new(id, Source::Filesystem).os_access(),
            CheckId::OrphanedLargeObjects => CheckSpec::new(id, Source::Tool),
            CheckId::Bloat
            | CheckId::UnusedIndexes
            | CheckId::FreezeCandidates
            | CheckId::AnalyzeCandidates => CheckSpec::new(id, Source::Query).lists_details(),
            CheckId::OvercommitMemory | CheckId::OvercommitRatio => {
                CheckSpec::new(id, Source::Filesystem).os_access()
            }
        }
    }

    pub fn finding(&self, status: Status, message: impl Into<String>) -> Finding {
        Finding::new(self.id(), self.title(), status, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Flavor;
    use crate::version::PgVersion;

    #[test]
    fn ids_are_unique_and_ordered() {
        let ids: Vec<&str> = CheckId::ALL.iter().map(CheckId::id).collect();
        let mut dedup = ids.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), ids.len());
        assert_eq!(ids.first(), Some(&"version_major"));
        assert_eq!(ids.last(), Some(&"overcommit_ratio"));
    }

    #[test]
    fn spec_carries_own_id() {
        for id in CheckId::ALL {
            assert_eq!(id.spec().id, id);
        }
    }

    #[test]
    fn version_floor_short_circuits() {
        let ctx = ClusterContext::new(PgVersion::new(9, 1, 24));
        let reason = CheckId::BlockedQueries.spec().not_applicable(&ctx).unwrap();
        assert!(reason.contains("9.2"), "{reason}");
        assert!(CheckId::DatabaseConflicts.spec().not_applicable(&ctx).is_none());
    }

    #[test]
    fn os_checks_skipped_on_managed() {
        let mut ctx = ClusterContext::new(PgVersion::new(15, 0, 4));
        assert!(CheckId::Archiving.spec().not_applicable(&ctx).is_none());
        ctx.flavor = Flavor::Managed;
        for id in [CheckId::Archiving, CheckId::OvercommitMemory, CheckId::OvercommitRatio] {
            let reason = id.spec().not_applicable(&ctx).unwrap();
            assert!(reason.contains("managed"), "{reason}");
        }
        assert!(CheckId::Replication.spec().not_applicable(&ctx).is_none());
    }

    #[test]
    fn remote_host_has_no_os_access() {
        let mut ctx = ClusterContext::new(PgVersion::new(15, 0, 4));
        ctx.local = false;
        let reason = CheckId::OvercommitMemory.spec().not_applicable(&ctx).unwrap();
        assert!(reason.contains("local access"));
    }
}
