// SPDX-License-Identifier: GPL-2.0

//! The CPU-view engine.
//!
//! Reconciles two independent counters, the host's per-CPU time table and
//! the cgroup's cumulative cpuacct accounting, into the per-CPU block a
//! container observes when it reads the host's stat file. The container
//! sees only the CPUs its quota and cpuset entitle it to; load on the
//! remaining CPUs is redistributed onto the visible ones up to a per-CPU
//! ceiling, and idle time is corrected when the quota grants a partial CPU.
//!
//! [`CpuView`] is the long-lived handle: it owns the per-cgroup state cache
//! and the cgroup accessor, and is shared across reader threads.

use std::io::BufRead;
use std::io::Cursor;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::error;
use log::warn;

use crate::cgroup::CgroupReader;
use crate::cpuacct;
use crate::cpuacct::CpuUsage;
use crate::cpuset::CpuSet;
use crate::host::HostCpus;
use crate::policy;
use crate::registry::Registry;

/// Credit surplus ticks into one CPU's user or system delta, bounded by the
/// headroom below `threshold` and by the CPU's remaining idle time, which
/// the credit consumes.
fn add_cpu_usage(surplus: &mut u64, usage: &mut CpuUsage, to_system: bool, threshold: u64) {
    let free_space = threshold
        .saturating_sub(usage.user)
        .saturating_sub(usage.system)
        .min(usage.idle);
    let to_add = free_space.min(*surplus);

    if to_system {
        usage.system += to_add;
    } else {
        usage.user += to_add;
    }
    usage.idle -= to_add;
    *surplus -= to_add;
}

/// The virtualized CPU statistics engine.
pub struct CpuView {
    registry: Registry,
    cgroup: Arc<dyn CgroupReader>,
    host: HostCpus,
}

impl CpuView {
    /// Build an engine over the given cgroup accessor, detecting the host
    /// CPU counts.
    pub fn new(cgroup: Arc<dyn CgroupReader>) -> CpuView {
        Self::with_host(cgroup, HostCpus::detect())
    }

    /// Build an engine with explicit host CPU counts.
    pub fn with_host(cgroup: Arc<dyn CgroupReader>, host: HostCpus) -> CpuView {
        CpuView {
            registry: Registry::new(),
            cgroup,
            host,
        }
    }

    /// The number of virtual CPUs the cgroup's quota and cpuset expose.
    /// Zero means unlimited.
    pub fn max_cpu_count(&self, cg: &str) -> usize {
        policy::max_cpu_count(self.cgroup.as_ref(), cg, self.host.online)
    }

    fn exact_cpu_count(&self, cg: &str) -> f64 {
        policy::exact_cpu_count(self.cgroup.as_ref(), cg, self.host.online)
    }

    /// Read the cgroup's per-CPU cpuacct snapshot, in ticks, with one entry
    /// per configured host CPU.
    pub fn read_cpuacct_usage(&self, cg: &str) -> Result<Vec<CpuUsage>> {
        cpuacct::read_cpuacct_usage(self.cgroup.as_ref(), cg, self.host.configured)
    }

    /// Render the virtualized per-CPU block for one read of the host stat
    /// file.
    ///
    /// `host_stat` must be positioned past the aggregate `cpu` line; the
    /// first line that is not a `cpu<N>` row, and everything after it, is
    /// passed through verbatim after the virtualized block. `samples` is
    /// the cgroup's cpuacct snapshot from [`Self::read_cpuacct_usage`] and
    /// is updated in place with imputed idle time and online flags.
    ///
    /// Returns the number of bytes written into `buf`. Filling `buf` past
    /// its capacity is a hard failure.
    pub fn proc_stat(
        &self,
        cg: &str,
        cpuset: &CpuSet,
        samples: &mut [CpuUsage],
        mut host_stat: impl BufRead,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut max_cpus = self.max_cpu_count(cg);
        let nprocs = self.host.configured.min(samples.len());
        let samples = &mut samples[..nprocs];

        for sample in samples.iter_mut() {
            sample.online = false;
        }

        // Walk the host's cpuN rows, imputing per-CPU idle from the gap
        // between host busy time and the cgroup's own busy time. The first
        // row that is not a cpuN row ends the table.
        let mut cpu_cnt: usize = 0;
        let mut line = String::new();
        let mut trailer: Option<String> = None;
        loop {
            line.clear();
            if host_stat.read_line(&mut line)? == 0 {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let rest = match line.strip_prefix("cpu") {
                Some(rest) => rest,
                None => {
                    trailer = Some(line.clone());
                    break;
                }
            };
            let label: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
            if label.is_empty() {
                trailer = Some(line.clone());
                break;
            }
            let physcpu: usize = match label.parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if physcpu >= samples.len() {
                continue;
            }
            if !cpuset.contains(physcpu) {
                continue;
            }

            let fields: Vec<u64> = match rest[label.len()..]
                .split_ascii_whitespace()
                .take(10)
                .map(|field| field.parse::<u64>())
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(fields) if fields.len() == 10 => fields,
                _ => {
                    warn!("Malformed host stat row for cpu{}: {}", physcpu, line.trim_end());
                    continue;
                }
            };

            // user + nice + system + iowait + irq + softirq + steal +
            // guest + guest_nice; fields[3] is idle.
            let idle = fields[3];
            let host_busy: u64 = fields[0]
                + fields[1]
                + fields[2]
                + fields[4]
                + fields[5]
                + fields[6]
                + fields[7]
                + fields[8]
                + fields[9];
            let cg_busy = samples[physcpu].user + samples[physcpu].system;

            if host_busy >= cg_busy {
                samples[physcpu].idle = idle + (host_busy - cg_busy);
            } else {
                error!(
                    "cpu{} of {} has unexpected cpu time: {} in the host table, \
                     {} in cpuacct; unable to determine idle time",
                    physcpu, cg, host_busy, cg_busy
                );
                samples[physcpu].idle = idle;
            }
            if !samples[physcpu].online {
                samples[physcpu].online = true;
                cpu_cnt += 1;
            }
        }

        // Cannot expose more CPUs than the cpuset makes available.
        if max_cpus > cpu_cnt {
            max_cpus = cpu_cnt;
        }

        let node = self
            .registry
            .find_or_create(cg, samples, self.cgroup.as_ref());
        let mut state = node.state.lock().unwrap();
        state.expand(samples.len());

        // A regressed user counter on the first online CPU means the
        // cgroup was recreated; start over from the fresh counters.
        if let Some(first) = (0..samples.len()).find(|&i| samples[i].online) {
            if samples[first].user < state.usage[first].user {
                debug!("Resetting stat node for {}", cg);
                state.rebase(samples);
            }
        }

        let online: Vec<usize> = (0..samples.len()).filter(|&i| samples[i].online).collect();

        // Per-CPU deltas since the previous read. Online CPUs beyond the
        // visible count donate their user and system time to the surplus
        // pools.
        let mut diff = vec![CpuUsage::default(); samples.len()];
        let mut total_sum: u64 = 0;
        let mut user_surplus: u64 = 0;
        let mut system_surplus: u64 = 0;
        for (online_idx, &i) in online.iter().enumerate() {
            diff[i].user = samples[i].user.saturating_sub(state.usage[i].user);
            diff[i].system = samples[i].system.saturating_sub(state.usage[i].system);
            diff[i].idle = samples[i].idle.saturating_sub(state.usage[i].idle);
            total_sum += diff[i].user + diff[i].system + diff[i].idle;

            state.usage[i].user += diff[i].user;
            state.usage[i].system += diff[i].system;
            state.usage[i].idle += diff[i].idle;

            if max_cpus > 0 && online_idx >= max_cpus {
                user_surplus += diff[i].user;
                system_surplus += diff[i].system;
            }
        }
        for i in 0..samples.len() {
            state.usage[i].online = samples[i].online;
        }

        let visible: &[usize] = if max_cpus > 0 {
            &online[..max_cpus]
        } else {
            &online
        };

        let mut user_sum: u64 = 0;
        let mut system_sum: u64 = 0;
        let mut idle_sum: u64 = 0;

        if max_cpus > 0 {
            // Ceiling per visible CPU for this sample period, in total
            // ticks including idle.
            let threshold = total_sum / cpu_cnt as u64 * max_cpus as u64;

            for &i in visible {
                if diff[i].user + diff[i].system >= threshold {
                    continue;
                }
                add_cpu_usage(&mut user_surplus, &mut diff[i], false, threshold);

                if diff[i].user + diff[i].system >= threshold {
                    continue;
                }
                add_cpu_usage(&mut system_surplus, &mut diff[i], true, threshold);
            }

            if user_surplus > 0 {
                debug!("Leftover user surplus: {} for {}", user_surplus, cg);
            }
            if system_surplus > 0 {
                debug!("Leftover system surplus: {} for {}", system_surplus, cg);
            }

            let mut diff_user: u64 = 0;
            let mut diff_system: u64 = 0;
            let mut diff_idle: u64 = 0;
            let mut max_diff_idle: u64 = 0;
            let mut max_diff_idle_index = visible.first().copied().unwrap_or(0);

            for &i in visible {
                state.view[i].user += diff[i].user;
                state.view[i].system += diff[i].system;
                state.view[i].idle += diff[i].idle;

                user_sum += state.view[i].user;
                system_sum += state.view[i].system;
                idle_sum += state.view[i].idle;

                diff_user += diff[i].user;
                diff_system += diff[i].system;
                diff_idle += diff[i].idle;
                if diff[i].idle > max_diff_idle {
                    max_diff_idle = diff[i].idle;
                    max_diff_idle_index = i;
                }
            }

            // A fractional quota is rendered as a whole CPU above; take
            // the excess back out of idle time, on the aggregate and on
            // the visible CPU with the most idle headroom.
            let exact_cpus = self.exact_cpu_count(cg);
            if exact_cpus < max_cpus as f64 {
                let delta = ((diff_user + diff_system + diff_idle) as f64
                    * (1.0 - exact_cpus / max_cpus as f64)) as u64;

                debug!(
                    "Revising the usage view of {} to {} exact cpus, reclaiming {} idle ticks",
                    cg, exact_cpus, delta
                );
                idle_sum = idle_sum.saturating_sub(delta);

                let k = max_diff_idle_index;
                state.view[k].idle = state.view[k].idle.saturating_sub(delta);
            }
        } else {
            for &i in &online {
                state.view[i] = state.usage[i];

                user_sum += state.view[i].user;
                system_sum += state.view[i].system;
                idle_sum += state.view[i].idle;
            }
        }

        // Render: synthesized aggregate, contiguously relabelled visible
        // CPUs, then the rest of the host table verbatim.
        let mut out = Cursor::new(buf);
        let rendered = (|| -> std::io::Result<()> {
            writeln!(
                out,
                "cpu  {} 0 {} {} 0 0 0 0 0 0",
                user_sum, system_sum, idle_sum
            )?;

            for (vcpu, &i) in visible.iter().enumerate() {
                writeln!(
                    out,
                    "cpu{} {} 0 {} {} 0 0 0 0 0 0",
                    vcpu, state.view[i].user, state.view[i].system, state.view[i].idle
                )?;
            }

            if let Some(trailer) = &trailer {
                out.write_all(trailer.as_bytes())?;
            }
            loop {
                line.clear();
                if host_stat.read_line(&mut line)? == 0 {
                    break;
                }
                out.write_all(line.as_bytes())?;
            }
            Ok(())
        })();

        if let Err(err) = rendered {
            error!("Failed to render the virtualized stat block for {}", cg);
            return Err(err).context("Failed to render the virtualized stat block");
        }

        Ok(out.position() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::CgroupDirFs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_control(root: &Path, controller: &str, cg: &str, file: &str, content: &str) {
        let dir = root.join(controller).join(cg.trim_start_matches('/'));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
    }

    fn setup(quota: &str, period: &str, cpuset: &str, host: HostCpus) -> (TempDir, CpuView) {
        let tmp = TempDir::new().unwrap();
        write_control(tmp.path(), "cpu", "/ct", "cpu.cfs_quota_us", quota);
        write_control(tmp.path(), "cpu", "/ct", "cpu.cfs_period_us", period);
        write_control(tmp.path(), "cpu", "/ct", "cpu.shares", "1024");
        if !cpuset.is_empty() {
            write_control(tmp.path(), "cpuset", "/ct", "cpuset.cpus", cpuset);
        }
        let cgfs: Arc<dyn CgroupReader> = Arc::new(CgroupDirFs::with_root(tmp.path()));
        (tmp, CpuView::with_host(cgfs, host))
    }

    fn read_stat(view: &CpuView, cpuset: &str, samples: &mut [CpuUsage], host_table: &str) -> String {
        let set = CpuSet::from_cpulist(cpuset).unwrap();
        let mut buf = vec![0u8; 8192];
        let n = view
            .proc_stat("/ct", &set, samples, Cursor::new(host_table.as_bytes()), &mut buf)
            .unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    fn cg_sample(user: u64, system: u64) -> CpuUsage {
        CpuUsage {
            user,
            system,
            idle: 0,
            online: false,
        }
    }

    /// Pull `(user, system, idle)` out of a rendered `cpu<N>` row.
    fn cpu_fields(output: &str, label: &str) -> (u64, u64, u64) {
        let row = output
            .lines()
            .find(|l| l.starts_with(label) && l.as_bytes().get(label.len()) == Some(&b' '))
            .unwrap_or_else(|| panic!("no {} row in:\n{}", label, output));
        let fields: Vec<u64> = row
            .split_ascii_whitespace()
            .skip(1)
            .map(|f| f.parse().unwrap())
            .collect();
        (fields[0], fields[2], fields[3])
    }

    // ==================== Scenario tests ====================

    #[test]
    fn test_full_quota_single_cpu() {
        let (_tmp, view) = setup("100000", "100000", "0", HostCpus { configured: 1, online: 1 });

        // Prime the node at zero counters.
        let mut samples = vec![cg_sample(0, 0)];
        read_stat(&view, "0", &mut samples, "cpu0 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n");

        let mut samples = vec![cg_sample(100, 50)];
        let out = read_stat(&view, "0", &mut samples, "cpu0 100 0 50 200 0 0 0 0 0 0\nintr 0 0\n");
        assert!(out.starts_with("cpu  100 0 50 200 0 0 0 0 0 0\n"), "{}", out);
        assert_eq!(cpu_fields(&out, "cpu0"), (100, 50, 200));

        let mut samples = vec![cg_sample(200, 100)];
        let out = read_stat(&view, "0", &mut samples, "cpu0 200 0 100 400 0 0 0 0 0 0\nintr 0 0\n");
        assert!(out.starts_with("cpu  200 0 100 400 0 0 0 0 0 0\n"), "{}", out);
        assert_eq!(cpu_fields(&out, "cpu0"), (200, 100, 400));
    }

    #[test]
    fn test_donor_surplus_credited_to_visible_cpu() {
        let (_tmp, view) = setup("100000", "100000", "0-1", HostCpus { configured: 2, online: 2 });

        let mut samples = vec![cg_sample(0, 0); 2];
        read_stat(
            &view,
            "0-1",
            &mut samples,
            "cpu0 0 0 0 0 0 0 0 0 0 0\ncpu1 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n",
        );

        // The cgroup consumes all busy time on both CPUs, so no idle is
        // imputed: diff[0] = (50, 30, 120) and donor cpu1 pools 60 user
        // and 40 system ticks. The threshold is 400 / 2 = 200 total
        // ticks. Crediting cpu0 draws the full 60 user ticks, then the
        // full 40 system ticks against the 60 ticks of headroom left,
        // each draw consuming idle: (50+60, 30+40, 120-60-40).
        let mut samples = vec![cg_sample(50, 30), cg_sample(60, 40)];
        let out = read_stat(
            &view,
            "0-1",
            &mut samples,
            "cpu0 50 0 30 120 0 0 0 0 0 0\ncpu1 60 0 40 100 0 0 0 0 0 0\nintr 0 0\n",
        );

        assert_eq!(cpu_fields(&out, "cpu0"), (110, 70, 20));
        // Only one virtual CPU is exposed.
        assert!(!out.contains("\ncpu1 "), "{}", out);
        assert!(out.starts_with("cpu  110 0 70 20 0 0 0 0 0 0\n"), "{}", out);
    }

    #[test]
    fn test_partial_cpu_idle_correction() {
        let (_tmp, view) = setup("50000", "100000", "0", HostCpus { configured: 1, online: 1 });

        let mut samples = vec![cg_sample(0, 0)];
        read_stat(&view, "0", &mut samples, "cpu0 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n");

        // diff = {user: 40, system: 10, idle: 50}; half a CPU reclaims
        // floor(100 * 0.5) = 50 idle ticks.
        let mut samples = vec![cg_sample(40, 10)];
        let out = read_stat(&view, "0", &mut samples, "cpu0 40 0 10 50 0 0 0 0 0 0\nintr 0 0\n");

        assert_eq!(cpu_fields(&out, "cpu0"), (40, 10, 0));
        assert!(out.starts_with("cpu  40 0 10 0 0 0 0 0 0 0\n"), "{}", out);
    }

    #[test]
    fn test_counter_reset_rebases_node() {
        let (_tmp, view) = setup("100000", "100000", "0", HostCpus { configured: 1, online: 1 });

        let mut samples = vec![cg_sample(0, 0)];
        read_stat(&view, "0", &mut samples, "cpu0 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n");
        let mut samples = vec![cg_sample(100, 50)];
        read_stat(&view, "0", &mut samples, "cpu0 100 0 50 200 0 0 0 0 0 0\nintr 0 0\n");
        let mut samples = vec![cg_sample(200, 100)];
        read_stat(&view, "0", &mut samples, "cpu0 200 0 100 400 0 0 0 0 0 0\nintr 0 0\n");

        // The cgroup was recreated: counters regress. The view drops to
        // the fresh sample instead of inheriting the accumulation.
        let mut samples = vec![cg_sample(5, 2)];
        let out = read_stat(&view, "0", &mut samples, "cpu0 300 0 150 500 0 0 0 0 0 0\nintr 0 0\n");

        // idle = 500 + (450 - 7) host/cgroup gap = 943
        assert_eq!(cpu_fields(&out, "cpu0"), (5, 2, 943));
    }

    #[test]
    fn test_hotplug_expands_node_in_place() {
        let (_tmp, view) = setup("400000", "100000", "0-3", HostCpus { configured: 4, online: 4 });

        // Two CPUs in the table at first; the node is created at length 2.
        let mut samples = vec![cg_sample(100, 50), cg_sample(100, 50)];
        read_stat(
            &view,
            "0-3",
            &mut samples,
            "cpu0 100 0 50 100 0 0 0 0 0 0\ncpu1 100 0 50 100 0 0 0 0 0 0\nintr 0 0\n",
        );

        // The host brings two more CPUs online; the arrays expand and the
        // new CPUs start from a zero baseline.
        let mut samples = vec![
            cg_sample(200, 100),
            cg_sample(200, 100),
            cg_sample(50, 25),
            cg_sample(50, 25),
        ];
        let out = read_stat(
            &view,
            "0-3",
            &mut samples,
            "cpu0 200 0 100 200 0 0 0 0 0 0\ncpu1 200 0 100 200 0 0 0 0 0 0\n\
             cpu2 50 0 25 75 0 0 0 0 0 0\ncpu3 50 0 25 75 0 0 0 0 0 0\nintr 0 0\n",
        );

        assert_eq!(cpu_fields(&out, "cpu0"), (100, 50, 100));
        assert_eq!(cpu_fields(&out, "cpu1"), (100, 50, 100));
        assert_eq!(cpu_fields(&out, "cpu2"), (50, 25, 75));
        assert_eq!(cpu_fields(&out, "cpu3"), (50, 25, 75));
        assert!(out.starts_with("cpu  300 0 150 350 0 0 0 0 0 0\n"), "{}", out);
    }

    #[test]
    fn test_cpuset_gap_relabels_contiguously() {
        let (_tmp, view) = setup("-1", "100000", "0,2", HostCpus { configured: 4, online: 4 });

        let mut samples = vec![cg_sample(0, 0); 4];
        read_stat(
            &view,
            "0,2",
            &mut samples,
            "cpu0 0 0 0 0 0 0 0 0 0 0\ncpu1 0 0 0 0 0 0 0 0 0 0\n\
             cpu2 0 0 0 0 0 0 0 0 0 0\ncpu3 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n",
        );

        let mut samples = vec![
            cg_sample(100, 0),
            cg_sample(999, 999),
            cg_sample(200, 0),
            cg_sample(999, 999),
        ];
        let out = read_stat(
            &view,
            "0,2",
            &mut samples,
            "cpu0 100 0 0 100 0 0 0 0 0 0\ncpu1 500 0 500 500 0 0 0 0 0 0\n\
             cpu2 200 0 0 300 0 0 0 0 0 0\ncpu3 500 0 500 500 0 0 0 0 0 0\nintr 0 0\n",
        );

        // Host CPUs 0 and 2 are relabelled as virtual cpu0 and cpu1; with
        // no quota the whole fractional correction lands on the idlest
        // visible CPU (host cpu2).
        assert_eq!(cpu_fields(&out, "cpu0"), (100, 0, 100));
        assert_eq!(cpu_fields(&out, "cpu1"), (200, 0, 0));
        assert!(!out.contains("\ncpu2 "), "{}", out);
        assert!(!out.contains("\ncpu3 "), "{}", out);
    }

    // ==================== Property tests ====================

    #[test]
    fn test_view_is_monotonic_across_reads() {
        let (_tmp, view) = setup("200000", "100000", "0-1", HostCpus { configured: 2, online: 2 });

        let mut last = [(0u64, 0u64, 0u64); 2];
        for step in 0u64..6 {
            let user = step * 120;
            let system = step * 60;
            let idle = step * 300;
            let host_table = format!(
                "cpu0 {} 0 {} {} 0 0 0 0 0 0\ncpu1 {} 0 {} {} 0 0 0 0 0 0\nintr 0 0\n",
                user, system, idle, user / 2, system / 2, idle
            );
            let mut samples = vec![
                cg_sample(user * 3 / 4, system * 3 / 4),
                cg_sample(user / 4, system / 4),
            ];
            let out = read_stat(&view, "0-1", &mut samples, &host_table);

            for (n, label) in ["cpu0", "cpu1"].iter().enumerate() {
                let (u, s, i) = cpu_fields(&out, label);
                let (lu, ls, li) = last[n];
                assert!(
                    u >= lu && s >= ls && i >= li,
                    "non-monotonic {} at step {}: {:?} then {:?}",
                    label,
                    step,
                    (lu, ls, li),
                    (u, s, i)
                );
                last[n] = (u, s, i);
            }
        }
    }

    #[test]
    fn test_surplus_bounded_by_threshold_and_discarded() {
        let (_tmp, view) = setup("100000", "100000", "0-2", HostCpus { configured: 3, online: 3 });

        let mut samples = vec![cg_sample(0, 0); 3];
        read_stat(
            &view,
            "0-2",
            &mut samples,
            "cpu0 0 0 0 0 0 0 0 0 0 0\ncpu1 0 0 0 0 0 0 0 0 0 0\n\
             cpu2 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n",
        );

        // Donors cpu1 and cpu2 pool 200 user ticks, but the visible CPU
        // only has 90 ticks of headroom below the threshold of 100; the
        // remaining 110 are dropped for this sample.
        let mut samples = vec![cg_sample(10, 0), cg_sample(100, 0), cg_sample(100, 0)];
        let out = read_stat(
            &view,
            "0-2",
            &mut samples,
            "cpu0 10 0 0 90 0 0 0 0 0 0\ncpu1 100 0 0 0 0 0 0 0 0 0\n\
             cpu2 100 0 0 0 0 0 0 0 0 0\nintr 0 0\n",
        );
        assert_eq!(cpu_fields(&out, "cpu0"), (100, 0, 0));
        assert!(!out.contains("\ncpu1 "), "{}", out);

        // The discarded surplus does not carry over: an identical delta
        // credits the same amount again.
        let mut samples = vec![cg_sample(20, 0), cg_sample(200, 0), cg_sample(200, 0)];
        let out = read_stat(
            &view,
            "0-2",
            &mut samples,
            "cpu0 20 0 0 180 0 0 0 0 0 0\ncpu1 200 0 0 0 0 0 0 0 0 0\n\
             cpu2 200 0 0 0 0 0 0 0 0 0\nintr 0 0\n",
        );
        assert_eq!(cpu_fields(&out, "cpu0"), (200, 0, 0));
    }

    #[test]
    fn test_skew_falls_back_to_raw_host_idle() {
        let (_tmp, view) = setup("100000", "100000", "0", HostCpus { configured: 1, online: 1 });

        let mut samples = vec![cg_sample(0, 0)];
        read_stat(&view, "0", &mut samples, "cpu0 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n");

        // The cgroup claims more busy time than the host table shows;
        // imputation is abandoned for the raw idle field.
        let mut samples = vec![cg_sample(100, 50)];
        let out = read_stat(&view, "0", &mut samples, "cpu0 10 0 10 100 0 0 0 0 0 0\nintr 0 0\n");

        assert_eq!(cpu_fields(&out, "cpu0"), (100, 50, 100));
    }

    #[test]
    fn test_unlimited_cgroup_mirrors_usage() {
        // No cpuset control file and no quota: every online CPU is
        // rendered with its reconciled usage, even on the first read.
        let tmp = TempDir::new().unwrap();
        write_control(tmp.path(), "cpu", "/ct", "cpu.shares", "1024");
        let cgfs: Arc<dyn CgroupReader> = Arc::new(CgroupDirFs::with_root(tmp.path()));
        let view = CpuView::with_host(cgfs, HostCpus { configured: 2, online: 2 });

        let mut samples = vec![cg_sample(100, 50), cg_sample(40, 20)];
        let out = read_stat(
            &view,
            "0-1",
            &mut samples,
            "cpu0 150 0 50 100 0 0 0 0 0 0\ncpu1 40 0 20 300 0 0 0 0 0 0\nintr 0 0\n",
        );

        // idle: 100 + (200 - 150) = 150 and 300 + (60 - 60) = 300
        assert_eq!(cpu_fields(&out, "cpu0"), (100, 50, 150));
        assert_eq!(cpu_fields(&out, "cpu1"), (40, 20, 300));
        assert!(out.starts_with("cpu  140 0 70 450 0 0 0 0 0 0\n"), "{}", out);
    }

    #[test]
    fn test_passthrough_preserves_host_tail() {
        let (_tmp, view) = setup("100000", "100000", "0", HostCpus { configured: 1, online: 1 });

        let tail = "intr 12345 0 1\nctxt 6789\nbtime 1700000000\nprocs_running 2\n";
        let table = format!("cpu0 10 0 10 10 0 0 0 0 0 0\n{}", tail);
        let mut samples = vec![cg_sample(0, 0)];
        let out = read_stat(&view, "0", &mut samples, &table);

        assert!(out.ends_with(tail), "{}", out);
    }

    #[test]
    fn test_output_buffer_too_small_fails() {
        let (_tmp, view) = setup("100000", "100000", "0", HostCpus { configured: 1, online: 1 });

        let mut samples = vec![cg_sample(0, 0)];
        let set = CpuSet::from_cpulist("0").unwrap();
        let mut buf = vec![0u8; 8];
        let result = view.proc_stat(
            "/ct",
            &set,
            &mut samples,
            Cursor::new(b"cpu0 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n".as_slice()),
            &mut buf,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_readers_share_one_node() {
        let (_tmp, view) = setup("100000", "100000", "0-1", HostCpus { configured: 2, online: 2 });
        let view = Arc::new(view);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let view = view.clone();
                std::thread::spawn(move || {
                    for step in 1u64..20 {
                        let table = format!(
                            "cpu0 {} 0 {} {} 0 0 0 0 0 0\ncpu1 0 0 0 {} 0 0 0 0 0 0\nintr 0 0\n",
                            step * 10,
                            step * 5,
                            step * 20,
                            step * 20
                        );
                        let mut samples = vec![cg_sample(step * 8, step * 4), cg_sample(0, 0)];
                        read_stat(&view, "0-1", &mut samples, &table);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(view.registry.node_count(), 1);
    }

    #[test]
    fn test_malformed_host_row_skips_cpu() {
        let (_tmp, view) = setup("200000", "100000", "0-1", HostCpus { configured: 2, online: 2 });

        let mut samples = vec![cg_sample(0, 0); 2];
        read_stat(
            &view,
            "0-1",
            &mut samples,
            "cpu0 0 0 0 0 0 0 0 0 0 0\ncpu1 0 0 0 0 0 0 0 0 0 0\nintr 0 0\n",
        );

        let mut samples = vec![cg_sample(10, 5), cg_sample(10, 5)];
        let out = read_stat(
            &view,
            "0-1",
            &mut samples,
            "cpu0 10 0 5 20 0 0 0 0 0 0\ncpu1 bogus\nintr 0 0\n",
        );

        // cpu1's row is unusable, so only one virtual CPU is rendered.
        assert_eq!(cpu_fields(&out, "cpu0"), (10, 5, 20));
        assert!(!out.contains("\ncpu1 "), "{}", out);
    }
}
