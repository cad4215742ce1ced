// SPDX-License-Identifier: GPL-2.0

//! Cgroup control-file access.
//!
//! The engine only ever reads a handful of per-cgroup control files, so the
//! accessor is a narrow trait. The production implementation resolves files
//! in a v1-style cgroupfs directory layout; a v2 deployment supplies its own
//! implementation that maps the v1 names onto equivalent controls.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;

/// Read access to cgroup control files.
pub trait CgroupReader: Send + Sync {
    /// Read a control file and return its text, trimmed. Fails when the
    /// file is absent or unreadable.
    fn get(&self, controller: &str, cg: &str, file: &str) -> Result<String>;

    /// Probe whether a control file exists for the cgroup.
    fn param_exists(&self, controller: &str, cg: &str, file: &str) -> bool;

    /// The cgroup's cpuset as a cpulist string.
    fn cpuset(&self, cg: &str) -> Result<String> {
        self.get("cpuset", cg, "cpuset.cpus")
    }
}

/// Cgroupfs accessor over a `<root>/<controller>/<cgroup>/<file>` layout.
pub struct CgroupDirFs {
    root: PathBuf,
}

impl CgroupDirFs {
    pub fn new() -> Self {
        Self::with_root("/sys/fs/cgroup")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        CgroupDirFs { root: root.into() }
    }

    fn control_path(&self, controller: &str, cg: &str, file: &str) -> PathBuf {
        self.root
            .join(controller)
            .join(cg.trim_start_matches('/'))
            .join(file)
    }
}

impl Default for CgroupDirFs {
    fn default() -> Self {
        Self::new()
    }
}

impl CgroupReader for CgroupDirFs {
    fn get(&self, controller: &str, cg: &str, file: &str) -> Result<String> {
        let path = self.control_path(controller, cg, file);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(text.trim().to_string())
    }

    fn param_exists(&self, controller: &str, cg: &str, file: &str) -> bool {
        self.control_path(controller, cg, file).exists()
    }
}
