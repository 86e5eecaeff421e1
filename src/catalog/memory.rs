//! Memory parameter recommendations.
//!
//! Advisory only: every finding is [`Status::Info`] and carries the
//! current value next to the recommended one.

use super::CheckId;
use crate::context::ClusterContext;
use crate::fmt::format_bytes;
use crate::report::{Finding, Status};
use crate::version::PgVersion;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

/// shared_buffers: a quarter of RAM, at least 2GB (or half of RAM on
/// small hosts) and at most 8GB before 9.3 / 250GB afterwards.
pub fn shared_buffers_target(total: u64, version: PgVersion) -> u64 {
    let cap = if version.at_least(9, 3) { 250 * GB } else { 8 * GB };
    let floor = (2 * GB).min(total / 2);
    (total / 4).clamp(floor, cap)
}

pub fn maintenance_work_mem_target(total: u64) -> u64 {
    match total {
        t if t <= 4 * GB => 128 * MB,
        t if t <= 8 * GB => 256 * MB,
        t if t <= 16 * GB => 512 * MB,
        t if t <= 32 * GB => GB,
        t if t <= 64 * GB => 2 * GB,
        t if t <= 128 * GB => 4 * GB,
        _ => 8 * GB,
    }
}

/// work_mem: stepped by RAM, then scaled down for many connections.
pub fn work_mem_target(total: u64, max_connections: i64) -> u64 {
    let base = match total {
        t if t <= 4 * GB => 4 * MB,
        t if t <= 8 * GB => 8 * MB,
        t if t <= 16 * GB => 16 * MB,
        t if t <= 32 * GB => 32 * MB,
        t if t <= 64 * GB => 64 * MB,
        _ => 128 * MB,
    };
    let divisor = match max_connections {
        c if c > 1000 => 4,
        c if c > 500 => 2,
        _ => 1,
    };
    (base / divisor).max(4 * MB)
}

pub fn effective_cache_size_target(total: u64) -> u64 {
    total / 100 * 85
}

fn advise(id: CheckId, current: u64, target: Option<u64>) -> Finding {
    let message = match target {
        Some(target) => format!(
            "current {}, recommended {}",
            format_bytes(current),
            format_bytes(target)
        ),
        None => format!(
            "current {}, total memory unknown so no recommendation",
            format_bytes(current)
        ),
    };
    id.finding(Status::Info, message)
}

pub fn shared_buffers(ctx: &ClusterContext) -> Finding {
    advise(
        CheckId::MemSharedBuffers,
        ctx.memory.shared_buffers,
        ctx.total_memory
            .map(|t| shared_buffers_target(t, ctx.version)),
    )
}

pub fn work_mem(ctx: &ClusterContext) -> Finding {
    advise(
        CheckId::MemWorkMem,
        ctx.memory.work_mem,
        ctx.total_memory
            .map(|t| work_mem_target(t, ctx.max_connections)),
    )
}

pub fn maintenance_work_mem(ctx: &ClusterContext) -> Finding {
    advise(
        CheckId::MemMaintenanceWorkMem,
        ctx.memory.maintenance_work_mem,
        ctx.total_memory.map(maintenance_work_mem_target),
    )
}

pub fn effective_cache_size(ctx: &ClusterContext) -> Finding {
    advise(
        CheckId::MemEffectiveCacheSize,
        ctx.memory.effective_cache_size,
        ctx.total_memory.map(effective_cache_size_target),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_buffers_is_clamped_quarter() {
        let v = PgVersion::new(15, 0, 3);
        assert_eq!(shared_buffers_target(16 * GB, v), 4 * GB);
        assert_eq!(shared_buffers_target(6 * GB, v), 2 * GB);
        assert_eq!(shared_buffers_target(2 * GB, v), GB);
        assert_eq!(shared_buffers_target(2048 * GB, v), 250 * GB);
        assert_eq!(shared_buffers_target(64 * GB, PgVersion::new(9, 2, 24)), 8 * GB);
    }

    #[test]
    fn maintenance_work_mem_steps() {
        assert_eq!(maintenance_work_mem_target(2 * GB), 128 * MB);
        assert_eq!(maintenance_work_mem_target(32 * GB), GB);
        assert_eq!(maintenance_work_mem_target(512 * GB), 8 * GB);
    }

    #[test]
    fn work_mem_shrinks_with_connections() {
        assert_eq!(work_mem_target(16 * GB, 100), 16 * MB);
        assert_eq!(work_mem_target(16 * GB, 800), 8 * MB);
        assert_eq!(work_mem_target(16 * GB, 5000), 4 * MB);
        assert_eq!(work_mem_target(2 * GB, 5000), 4 * MB);
    }

    #[test]
    fn recommendations_are_informational() {
        let mut ctx = ClusterContext::new(PgVersion::new(15, 0, 3));
        ctx.memory.shared_buffers = 128 * MB;
        ctx.total_memory = Some(16 * GB);
        let f = shared_buffers(&ctx);
        assert_eq!(f.status, Status::Info);
        assert_eq!(f.message, "current 128.0 MiB, recommended 4.0 GiB");

        ctx.total_memory = None;
        let f = effective_cache_size(&ctx);
        assert_eq!(f.status, Status::Info);
        assert!(f.message.contains("unknown"));
    }
}
