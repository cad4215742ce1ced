// SPDX-License-Identifier: GPL-2.0

//! Capacity policy: how many CPUs a cgroup's bandwidth quota and cpuset
//! entitle it to expose.
//!
//! Two derived values drive the view. `max_cpus` is the integer count of
//! virtual CPUs a container observes; `exact_cpus` is the fractional
//! quota/period ratio used to correct idle time when the quota grants a
//! partial CPU.

use log::warn;

use crate::cgroup::CgroupReader;
use crate::cpuset::CpuSet;

/// Read `cpu.cfs_quota_us` or `cpu.cfs_period_us`. Absent or malformed
/// files degrade to None, which the policy treats as "no limit".
fn read_cfs_param(cgroup: &dyn CgroupReader, cg: &str, param: &str) -> Option<i64> {
    let file = format!("cpu.cfs_{}_us", param);
    let text = cgroup.get("cpu", cg, &file).ok()?;
    match text.parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Malformed {} for {}: {}", file, cg, text);
            None
        }
    }
}

fn cpus_in_cpuset(cgroup: &dyn CgroupReader, cg: &str) -> usize {
    match cgroup.cpuset(cg) {
        Ok(list) => match CpuSet::from_cpulist(&list) {
            Ok(set) => set.weight(),
            Err(_) => {
                warn!("Malformed cpuset.cpus for {}: {}", cg, list);
                0
            }
        },
        Err(_) => 0,
    }
}

/// The integer count of virtual CPUs to expose. Zero means the quota is
/// unlimited and no cpuset restricts the cgroup.
pub(crate) fn max_cpus_from(
    quota: Option<i64>,
    period: Option<i64>,
    cpuset_count: usize,
    nprocs_online: usize,
) -> usize {
    let mut count = match (quota, period) {
        (Some(quota), Some(period)) if quota > 0 && period > 0 => {
            // A fractional quota still occupies a whole visible CPU.
            let mut count = (quota / period) as usize;
            if quota % period > 0 {
                count += 1;
            }
            count.clamp(1, nprocs_online.max(1))
        }
        _ => 0,
    };

    if cpuset_count > 0 && (count == 0 || cpuset_count < count) {
        count = cpuset_count;
    }

    count
}

/// The fractional CPU entitlement, used for partial-CPU idle correction.
/// Zero when the quota is unlimited.
pub(crate) fn exact_cpus_from(
    quota: Option<i64>,
    period: Option<i64>,
    nprocs_online: usize,
) -> f64 {
    match (quota, period) {
        (Some(quota), Some(period)) if quota > 0 && period > 0 => {
            let exact = quota as f64 / period as f64;
            exact.min(nprocs_online as f64)
        }
        _ => 0.0,
    }
}

pub(crate) fn max_cpu_count(
    cgroup: &dyn CgroupReader,
    cg: &str,
    nprocs_online: usize,
) -> usize {
    let quota = read_cfs_param(cgroup, cg, "quota");
    let period = read_cfs_param(cgroup, cg, "period");
    max_cpus_from(quota, period, cpus_in_cpuset(cgroup, cg), nprocs_online)
}

pub(crate) fn exact_cpu_count(
    cgroup: &dyn CgroupReader,
    cg: &str,
    nprocs_online: usize,
) -> f64 {
    let quota = read_cfs_param(cgroup, cg, "quota");
    let period = read_cfs_param(cgroup, cg, "period");
    exact_cpus_from(quota, period, nprocs_online)
}
