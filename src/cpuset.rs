// SPDX-License-Identifier: GPL-2.0

//! CPU set parsing and membership.
//!
//! Cgroup `cpuset.cpus` files carry kernel cpulist strings such as
//! `0-3,7`. [`read_cpulist`] expands a list into CPU ids and [`CpuSet`]
//! keeps the ids as a bit mask for membership tests:
//!
//!```
//!     use cpuview::CpuSet;
//!     let set = CpuSet::from_cpulist("0-2,5").unwrap();
//!     assert!(set.contains(1));
//!     assert!(!set.contains(3));
//!     assert_eq!(set.weight(), 4);
//!```

use anyhow::bail;
use anyhow::Result;
use bitvec::prelude::*;

/// Expand a kernel cpulist string (`0-3,7`) into CPU ids. An empty list
/// yields no ids.
pub fn read_cpulist(cpulist: &str) -> Result<Vec<usize>> {
    let cpulist = cpulist.trim().trim_end_matches('\0');
    let mut cpu_ids = vec![];

    if cpulist.is_empty() {
        return Ok(cpu_ids);
    }

    for group in cpulist.split(',') {
        let group = group.trim();
        let span = match group.split_once('-') {
            Some((first, last)) => {
                match (first.trim().parse::<usize>(), last.trim().parse::<usize>()) {
                    (Ok(first), Ok(last)) if first <= last => first..=last,
                    _ => bail!("Invalid cpu range '{}' in cpulist '{}'", group, cpulist),
                }
            }
            None => match group.parse::<usize>() {
                Ok(cpu) => cpu..=cpu,
                Err(_) => bail!("Invalid cpu id '{}' in cpulist '{}'", group, cpulist),
            },
        };
        cpu_ids.extend(span);
    }

    Ok(cpu_ids)
}

/// A set of host CPU ids.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CpuSet {
    mask: BitVec<u64, Lsb0>,
}

impl CpuSet {
    /// Build a new empty CpuSet.
    pub fn new() -> CpuSet {
        CpuSet::default()
    }

    /// Build a CpuSet from a cpulist string.
    pub fn from_cpulist(cpulist: &str) -> Result<CpuSet> {
        let mut set = CpuSet::new();
        for cpu_id in read_cpulist(cpulist)? {
            set.set_cpu(cpu_id);
        }

        Ok(set)
    }

    /// Add a CPU to the set, growing the mask as needed.
    pub fn set_cpu(&mut self, cpu: usize) {
        if cpu >= self.mask.len() {
            self.mask.resize(cpu + 1, false);
        }
        self.mask.set(cpu, true);
    }

    /// Test whether the given CPU is a member. CPUs beyond the mask length
    /// are not members.
    pub fn contains(&self, cpu: usize) -> bool {
        match self.mask.get(cpu) {
            Some(bit) => *bit,
            None => false,
        }
    }

    /// Count the CPUs in the set.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    /// Return true if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.mask.count_ones() == 0
    }
}
