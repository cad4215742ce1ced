// SPDX-License-Identifier: GPL-2.0

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;

use cpuview::CgroupDirFs;
use cpuview::CgroupReader;
use cpuview::CpuSet;
use cpuview::CpuView;

/// cpuview: print a container's virtualized CPU accounting.
///
/// Reads the host's per-CPU time table and the cgroup's cpuacct counters
/// and prints the stat block the container would observe, honoring the
/// cgroup's bandwidth quota and cpuset.
#[derive(Debug, Parser)]
struct Opts {
    /// Cgroup path relative to the controller roots, e.g. /docker/abc.
    cgroup: String,

    /// Cgroupfs mount point.
    #[clap(short = 'r', long, default_value = "/sys/fs/cgroup")]
    root: String,

    /// Host CPU time table to virtualize.
    #[clap(short = 's', long, default_value = "/proc/stat")]
    stat: String,

    /// Enable verbose output. Specify multiple times for more detail.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let cgroup: Arc<dyn CgroupReader> = Arc::new(CgroupDirFs::with_root(&opts.root));
    let view = CpuView::new(cgroup.clone());

    let cpulist = cgroup
        .cpuset(&opts.cgroup)
        .with_context(|| format!("Failed to read cpuset.cpus of {}", opts.cgroup))?;
    let cpuset = CpuSet::from_cpulist(&cpulist)?;

    let mut samples = view
        .read_cpuacct_usage(&opts.cgroup)
        .with_context(|| format!("Failed to read cpuacct counters of {}", opts.cgroup))?;

    let file = File::open(&opts.stat).with_context(|| format!("Failed to open {}", opts.stat))?;
    let mut host_stat = BufReader::new(file);
    let mut aggregate = String::new();
    host_stat.read_line(&mut aggregate)?;

    let mut buf = vec![0u8; 65536];
    let len = view.proc_stat(&opts.cgroup, &cpuset, &mut samples, host_stat, &mut buf)?;
    std::io::stdout().write_all(&buf[..len])?;

    Ok(())
}
