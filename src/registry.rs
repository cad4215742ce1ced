// SPDX-License-Identifier: GPL-2.0

//! Per-cgroup reconciliation state cache.
//!
//! Nodes live in a fixed array of hash buckets keyed by cgroup path.
//! Lookups scan a bucket under its read lock; inserting and pruning take
//! the write lock. Each node carries its own mutex, held by the caller
//! across a full read-reconcile-render cycle so that a reader observes a
//! monotonic view.
//!
//! Lock order is bucket before node. The registry never holds a node mutex
//! itself, and nodes are handed out as `Arc`s: a reader that raced with the
//! pruner simply finishes its cycle on a detached node.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use log::debug;

use crate::cgroup::CgroupReader;
use crate::cpuacct::CpuUsage;

pub(crate) const CPUVIEW_HASH_SIZE: usize = 100;
pub(crate) const PRUNE_INTERVAL: Duration = Duration::from_secs(10);

/// Reconciled accumulators for one cgroup. Both arrays always have the
/// same length; the length is the node's CPU count and only ever grows.
#[derive(Debug)]
pub(crate) struct NodeState {
    /// Real usage as reconciled from the host table and cgroup counters.
    pub usage: Vec<CpuUsage>,
    /// Usage reported to the container.
    pub view: Vec<CpuUsage>,
}

impl NodeState {
    fn new(sample: &[CpuUsage]) -> NodeState {
        NodeState {
            usage: sample.to_vec(),
            view: vec![CpuUsage::default(); sample.len()],
        }
    }

    pub fn cpu_count(&self) -> usize {
        self.usage.len()
    }

    /// Grow both arrays to `cpu_count`, zero-filling the tail. Arrays
    /// never shrink; CPUs going away are only marked offline per sample.
    pub fn expand(&mut self, cpu_count: usize) {
        if cpu_count > self.usage.len() {
            self.usage.resize(cpu_count, CpuUsage::default());
            self.view.resize(cpu_count, CpuUsage::default());
        }
    }

    /// The cgroup's counters regressed (it was recreated): rebase `usage`
    /// to zero, keeping the sample's online flags, and forget the
    /// accumulated view.
    pub fn rebase(&mut self, sample: &[CpuUsage]) {
        for (i, slot) in self.usage.iter_mut().enumerate() {
            *slot = CpuUsage {
                online: sample.get(i).map(|s| s.online).unwrap_or(false),
                ..CpuUsage::default()
            };
        }
        for slot in self.view.iter_mut() {
            *slot = CpuUsage::default();
        }
    }
}

/// One cgroup's cache node. `cg` is the identity and is immutable.
pub(crate) struct CgStat {
    pub cg: String,
    pub state: Mutex<NodeState>,
}

struct Bucket {
    nodes: Vec<Arc<CgStat>>,
    last_check: Instant,
}

pub(crate) struct Registry {
    buckets: Vec<RwLock<Bucket>>,
}

impl Registry {
    pub fn new() -> Registry {
        let now = Instant::now();
        let buckets = (0..CPUVIEW_HASH_SIZE)
            .map(|_| {
                RwLock::new(Bucket {
                    nodes: Vec::new(),
                    last_check: now,
                })
            })
            .collect();

        Registry { buckets }
    }

    fn bucket_of(&self, cg: &str) -> &RwLock<Bucket> {
        let mut hasher = DefaultHasher::new();
        cg.hash(&mut hasher);
        &self.buckets[(hasher.finish() % CPUVIEW_HASH_SIZE as u64) as usize]
    }

    /// Look up the node for `cg`, creating it with `sample` as the usage
    /// baseline when absent. Stale nodes are pruned opportunistically on
    /// the way.
    pub fn find_or_create(
        &self,
        cg: &str,
        sample: &[CpuUsage],
        cgroup: &dyn CgroupReader,
    ) -> Arc<CgStat> {
        let bucket = self.bucket_of(cg);
        let found = {
            let guard = bucket.read().unwrap();
            guard.nodes.iter().find(|node| node.cg == cg).cloned()
        };

        self.prune(cgroup);

        if let Some(node) = found {
            return node;
        }

        let new_node = Arc::new(CgStat {
            cg: cg.to_string(),
            state: Mutex::new(NodeState::new(sample)),
        });

        let mut guard = bucket.write().unwrap();
        if let Some(node) = guard.nodes.iter().find(|node| node.cg == cg) {
            // Another reader created the node while we were unlocked.
            return node.clone();
        }
        debug!("New stat node ({} cpus) for {}", sample.len(), cg);
        guard.nodes.push(new_node.clone());
        new_node
    }

    /// Drop nodes whose cgroup no longer exists, probing `cpu.shares`
    /// through the accessor. Each bucket is checked at most once per
    /// [`PRUNE_INTERVAL`].
    pub fn prune(&self, cgroup: &dyn CgroupReader) {
        let now = Instant::now();

        for bucket in &self.buckets {
            {
                let guard = bucket.read().unwrap();
                if now.duration_since(guard.last_check) < PRUNE_INTERVAL {
                    continue;
                }
            }

            let mut guard = bucket.write().unwrap();
            if now.duration_since(guard.last_check) < PRUNE_INTERVAL {
                continue;
            }
            guard.nodes.retain(|node| {
                let live = cgroup.param_exists("cpu", &node.cg, "cpu.shares");
                if !live {
                    debug!("Removing stat node for {}", node.cg);
                }
                live
            });
            guard.last_check = now;
        }
    }
}

#[cfg(test)]
impl Registry {
    pub(crate) fn node_count(&self) -> usize {
        self.buckets
            .iter()
            .map(|bucket| bucket.read().unwrap().nodes.len())
            .sum()
    }

    pub(crate) fn contains(&self, cg: &str) -> bool {
        self.bucket_of(cg)
            .read()
            .unwrap()
            .nodes
            .iter()
            .any(|node| node.cg == cg)
    }

    /// Make every bucket eligible for pruning again.
    pub(crate) fn age_buckets(&self) {
        for bucket in &self.buckets {
            let mut guard = bucket.write().unwrap();
            guard.last_check = Instant::now()
                .checked_sub(PRUNE_INTERVAL + Duration::from_secs(1))
                .expect("monotonic clock predates the prune interval");
        }
    }
}
