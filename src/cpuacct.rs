// SPDX-License-Identifier: GPL-2.0

//! Per-CPU usage samples from the cpuacct controller.
//!
//! `cpuacct.usage_all` carries cumulative user and system time per CPU in
//! nanoseconds; older kernels only expose `cpuacct.usage_percpu`, a flat
//! list of per-CPU totals. Both are converted to kernel ticks here so that
//! all downstream arithmetic happens in the host table's unit.

use anyhow::bail;
use anyhow::Result;
use log::debug;
use sscanf::sscanf;

use crate::cgroup::CgroupReader;
use crate::host::clock_ticks_per_sec;

/// One CPU's cumulative accounting, in kernel ticks.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct CpuUsage {
    pub user: u64,
    pub system: u64,
    pub idle: u64,
    /// Whether the CPU was present in the host table and allowed by the
    /// cgroup's cpuset in the sample this entry belongs to.
    pub online: bool,
}

/// Convert cumulative nanoseconds to kernel ticks, truncating toward zero.
fn nanos_to_ticks(ns: u64, ticks_per_sec: i64) -> u64 {
    (ns as f64 / 1000.0 / 1000.0 / 1000.0 * ticks_per_sec as f64) as u64
}

/// Parse `cpuacct.usage_all`: a `cpu user system` header followed by
/// `N user_ns system_ns` rows. The result has `nprocs` entries; CPUs
/// without a row stay zero, rows beyond `nprocs` are ignored.
pub(crate) fn parse_usage_all(
    text: &str,
    nprocs: usize,
    ticks_per_sec: i64,
) -> Result<Vec<CpuUsage>> {
    let mut usage = vec![CpuUsage::default(); nprocs];
    let mut lines = text.lines();

    match lines.next() {
        Some(header) if header.trim() == "cpu user system" => {}
        other => bail!("Unexpected cpuacct.usage_all header: {:?}", other),
    }

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cpu, user_ns, system_ns) = match sscanf!(line, "{usize} {u64} {u64}") {
            Ok(row) => row,
            Err(_) => bail!("Malformed cpuacct.usage_all row: {}", line),
        };
        if cpu >= nprocs {
            continue;
        }
        usage[cpu].user = nanos_to_ticks(user_ns, ticks_per_sec);
        usage[cpu].system = nanos_to_ticks(system_ns, ticks_per_sec);
    }

    Ok(usage)
}

/// Parse `cpuacct.usage_percpu`: whitespace-separated per-CPU totals in
/// nanoseconds. The total is carried in `user`; no user/system split is
/// available.
pub(crate) fn parse_usage_percpu(
    text: &str,
    nprocs: usize,
    ticks_per_sec: i64,
) -> Result<Vec<CpuUsage>> {
    let mut usage = vec![CpuUsage::default(); nprocs];

    for (cpu, field) in text.split_whitespace().enumerate() {
        if cpu >= nprocs {
            break;
        }
        let total_ns: u64 = match field.parse() {
            Ok(ns) => ns,
            Err(_) => bail!("Malformed cpuacct.usage_percpu entry: {}", field),
        };
        usage[cpu].user = nanos_to_ticks(total_ns, ticks_per_sec);
    }

    Ok(usage)
}

/// Read the cgroup's per-CPU snapshot, in ticks, with one entry per
/// configured host CPU.
pub(crate) fn read_cpuacct_usage(
    cgroup: &dyn CgroupReader,
    cg: &str,
    nprocs: usize,
) -> Result<Vec<CpuUsage>> {
    let ticks_per_sec = clock_ticks_per_sec();

    match cgroup.get("cpuacct", cg, "cpuacct.usage_all") {
        Ok(text) => parse_usage_all(&text, nprocs, ticks_per_sec),
        Err(_) => {
            debug!(
                "Failed to read cpuacct.usage_all for {}, falling back to cpuacct.usage_percpu",
                cg
            );
            let text = cgroup.get("cpuacct", cg, "cpuacct.usage_percpu")?;
            parse_usage_percpu(&text, nprocs, ticks_per_sec)
        }
    }
}
