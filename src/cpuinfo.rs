// SPDX-License-Identifier: GPL-2.0

//! Virtualized /proc/cpuinfo.
//!
//! Filters the host's cpuinfo stream down to the processors the cgroup's
//! cpuset allows, relabelling them contiguously from zero and stopping
//! after the quota's visible CPU count.

use std::io::BufRead;
use std::io::Cursor;
use std::io::Write;

use anyhow::Context;
use anyhow::Result;
use log::error;

use crate::cpuset::CpuSet;

/// Pull the CPU id out of a `processor : N` line, tolerating the kernel's
/// whitespace padding.
fn processor_line_cpu(line: &str) -> Option<usize> {
    let rest = line.strip_prefix("processor")?;
    let rest = rest.trim_start().strip_prefix(':')?;
    rest.trim().parse().ok()
}

/// Copy the cpuinfo blocks whose processor is in `cpuset` into `buf`,
/// relabelled from zero. With `max_cpus > 0` at most that many blocks are
/// emitted. Returns the number of bytes written.
pub fn proc_cpuinfo(
    cpuset: &CpuSet,
    max_cpus: usize,
    mut host_cpuinfo: impl BufRead,
    buf: &mut [u8],
) -> Result<usize> {
    let mut out = Cursor::new(buf);
    let mut printing = false;
    let mut printed: usize = 0;

    let rendered = (|| -> std::io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if host_cpuinfo.read_line(&mut line)? == 0 {
                break;
            }

            if let Some(cpu) = processor_line_cpu(&line) {
                if max_cpus > 0 && printed == max_cpus {
                    break;
                }
                printing = cpuset.contains(cpu);
                if printing {
                    writeln!(out, "processor\t: {}", printed)?;
                    printed += 1;
                }
                continue;
            }

            if printing {
                out.write_all(line.as_bytes())?;
            }
        }
        Ok(())
    })();

    if let Err(err) = rendered {
        error!("Failed to render the virtualized cpuinfo block");
        return Err(err).context("Failed to render the virtualized cpuinfo block");
    }

    Ok(out.position() as usize)
}
