// SPDX-License-Identifier: GPL-2.0

//! # cpuview
//!
//! A per-container virtualized view of host CPU statistics.
//!
//! A container that reads the host's per-CPU time table should only observe
//! the CPUs and CPU time its resource-control policy entitles it to. This
//! crate reconciles the host's per-CPU accounting with the cgroup's own
//! cumulative accounting into a stable, monotonic per-container time series
//! and renders it in the kernel's stat-file text format.
//!
//! The entry point is [`CpuView`], one instance per process, shared across
//! reader threads:
//!
//!```no_run
//!     use std::sync::Arc;
//!     use cpuview::{CgroupDirFs, CgroupReader, CpuSet, CpuView};
//!
//!     let cgroup: Arc<dyn CgroupReader> = Arc::new(CgroupDirFs::new());
//!     let view = CpuView::new(cgroup.clone());
//!
//!     let cg = "/docker/abc";
//!     let cpuset = CpuSet::from_cpulist(&cgroup.cpuset(cg).unwrap()).unwrap();
//!     let mut samples = view.read_cpuacct_usage(cg).unwrap();
//!     // feed the host stat stream (positioned past its aggregate line)
//!     // and a byte buffer into view.proc_stat(...)
//!```
//!
//! The per-cgroup reconciliation state lives in an internal hash-bucketed
//! cache, pruned opportunistically when cgroups disappear. All CPU times
//! are in kernel ticks (USER_HZ).

mod cgroup;
pub use cgroup::CgroupDirFs;
pub use cgroup::CgroupReader;

mod cpuacct;
pub use cpuacct::CpuUsage;

mod cpuinfo;
pub use cpuinfo::proc_cpuinfo;

mod cpuset;
pub use cpuset::read_cpulist;
pub use cpuset::CpuSet;

mod host;
pub use host::clock_ticks_per_sec;
pub use host::HostCpus;

mod policy;

mod registry;

mod view;
pub use view::CpuView;
