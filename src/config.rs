use log::warn;

use crate::{Result, VmError};

/// Largest pager pool `initialize` accepts by default.
pub const MAX_PAGERS: usize = 4;

/// Number of page-table slots; process ids are folded onto them modulo this.
pub const MAX_PROCESSES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of virtual page mappings the gateway is asked to hold.
    pub mappings: usize,
    /// Virtual pages per process.
    pub pages: usize,
    /// Physical frames.
    pub frames: usize,
    /// Pager workers to spawn.
    pub pagers: usize,
    pub max_pagers: usize,
    pub max_processes: usize,
}

impl VmConfig {
    pub fn new(mappings: usize, pages: usize, frames: usize, pagers: usize) -> Self {
        VmConfig {
            mappings,
            pages,
            frames,
            pagers,
            max_pagers: MAX_PAGERS,
            max_processes: MAX_PROCESSES,
        }
    }

    pub fn with_max_pagers(mut self, max_pagers: usize) -> Self {
        self.max_pagers = max_pagers;
        self
    }

    pub fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pagers > self.max_pagers {
            return Err(VmError::InvalidConfig(format!(
                "{} pagers requested, at most {} allowed",
                self.pagers, self.max_pagers
            )));
        }
        if self.pagers < 1 {
            return Err(VmError::InvalidConfig(String::from(
                "at least one pager is required",
            )));
        }
        if self.mappings < 1 || self.mappings != self.pages {
            return Err(VmError::InvalidConfig(format!(
                "mappings ({}) must be positive and equal to pages ({})",
                self.mappings, self.pages
            )));
        }
        if self.frames < 1 {
            return Err(VmError::InvalidConfig(String::from(
                "at least one frame is required",
            )));
        }
        if self.max_processes < 1 {
            return Err(VmError::InvalidConfig(String::from(
                "process table must have at least one slot",
            )));
        }
        Ok(())
    }

    /// Pager workers actually started.
    ///
    /// Every pager holds at most one frame reserved, so keeping the pool no
    /// larger than the frame count leaves the clock sweep at least one frame
    /// it is allowed to visit.
    pub fn effective_pagers(&self) -> usize {
        if self.pagers > self.frames {
            warn!(
                "{} pagers requested for {} frames, starting {}",
                self.pagers, self.frames, self.frames
            );
            return self.frames;
        }
        self.pagers
    }
}
