// SPDX-License-Identifier: GPL-2.0

//! Host CPU counts and the kernel tick rate.

use crate::cpuset::read_cpulist;

lazy_static::lazy_static! {
    /// Kernel ticks per second (USER_HZ), the unit of all user-visible CPU
    /// accounting. Snapshotted once; the rate cannot change at runtime.
    static ref CLOCK_TICKS: i64 = detect_clock_ticks();
}

/// Ticks per second used when converting cpuacct nanoseconds.
pub fn clock_ticks_per_sec() -> i64 {
    *CLOCK_TICKS
}

fn detect_clock_ticks() -> i64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks
    } else {
        100
    }
}

/// CPU counts of the host.
///
/// `configured` bounds the accounting arrays and is fixed for the lifetime
/// of a booted kernel; `online` only feeds the capacity clamps. [`crate::CpuView`]
/// snapshots one of these at construction.
#[derive(Debug, Clone, Copy)]
pub struct HostCpus {
    /// Number of CPU ids configured on the host.
    pub configured: usize,
    /// Number of CPUs currently online.
    pub online: usize,
}

impl HostCpus {
    /// Read the counts from sysfs, falling back to sysconf.
    pub fn detect() -> HostCpus {
        let configured = match read_cpu_ids("/sys/devices/system/cpu/possible") {
            Some(ids) => match ids.last() {
                Some(last) => last + 1,
                None => sysconf_cpus(libc::_SC_NPROCESSORS_CONF),
            },
            None => sysconf_cpus(libc::_SC_NPROCESSORS_CONF),
        };
        let online = match read_cpu_ids("/sys/devices/system/cpu/online") {
            Some(ids) if !ids.is_empty() => ids.len(),
            _ => sysconf_cpus(libc::_SC_NPROCESSORS_ONLN),
        };

        HostCpus { configured, online }
    }
}

fn read_cpu_ids(path: &str) -> Option<Vec<usize>> {
    let text = std::fs::read_to_string(path).ok()?;
    read_cpulist(&text).ok()
}

fn sysconf_cpus(name: libc::c_int) -> usize {
    let nprocs = unsafe { libc::sysconf(name) };
    if nprocs > 0 {
        nprocs as usize
    } else {
        1
    }
}
