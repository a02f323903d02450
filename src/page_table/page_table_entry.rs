/// Where a virtual page's contents currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Never touched.
    Unreferenced,
    Resident { frame: usize },
    /// Not in memory. Contents are in `swap_block`, or all zero if it has none.
    Evicted,
}

/// One slot of a process's page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub residency: Residency,
    /// Once assigned it stays with the page until the process exits.
    pub swap_block: Option<usize>,
    /// Set while the page's contents are on their way to `swap_block`.
    pub writeback: bool,
}

impl PageTableEntry {
    pub(crate) fn zero() -> Self {
        PageTableEntry {
            residency: Residency::Unreferenced,
            swap_block: None,
            writeback: false,
        }
    }

    pub fn frame(&self) -> Option<usize> {
        match self.residency {
            Residency::Resident { frame } => Some(frame),
            _ => None,
        }
    }

    pub fn is_resident(&self) -> bool {
        self.frame().is_some()
    }
}

impl Default for PageTableEntry {
    fn default() -> Self {
        Self::zero()
    }
}
