use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Point-in-time copy of the paging counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    /// Size of the virtual region, in pages.
    pub pages: usize,
    /// Size of physical memory, in frames.
    pub frames: usize,
    /// Size of the swap disk, in blocks.
    pub disk_blocks: usize,
    pub free_frames: usize,
    pub free_disk_blocks: usize,
    pub switches: usize,
    pub faults: usize,
    /// Faults on pages that had never been touched.
    pub new: usize,
    /// Faults that read the page back from disk.
    pub page_ins: usize,
    /// Evictions that wrote the victim to disk.
    pub page_outs: usize,
    /// Faults whose frame still held another page.
    pub replaced: usize,
}

impl fmt::Display for VmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VmStats")?;
        writeln!(f, "pages:          {}", self.pages)?;
        writeln!(f, "frames:         {}", self.frames)?;
        writeln!(f, "diskBlocks:     {}", self.disk_blocks)?;
        writeln!(f, "freeFrames:     {}", self.free_frames)?;
        writeln!(f, "freeDiskBlocks: {}", self.free_disk_blocks)?;
        writeln!(f, "switches:       {}", self.switches)?;
        writeln!(f, "faults:         {}", self.faults)?;
        writeln!(f, "new:            {}", self.new)?;
        writeln!(f, "pageIns:        {}", self.page_ins)?;
        writeln!(f, "pageOuts:       {}", self.page_outs)?;
        write!(f, "replaced:       {}", self.replaced)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub free_frames: AtomicUsize,
    pub switches: AtomicUsize,
    pub faults: AtomicUsize,
    pub new: AtomicUsize,
    pub page_ins: AtomicUsize,
    pub page_outs: AtomicUsize,
    pub replaced: AtomicUsize,
}

impl Counters {
    pub fn new(frames: usize) -> Self {
        let counters = Counters::default();
        counters.free_frames.store(frames, Ordering::SeqCst);
        counters
    }

    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn drop_one(counter: &AtomicUsize) {
        counter.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}
