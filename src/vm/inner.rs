use std::sync::{Arc, Mutex};

use disk::BackingStore;
use log::{debug, error, info};
use memory::{AccessBits, Mmu, MmuError, Protection};

use crate::{
    config::VmConfig,
    fault::FaultQueue,
    frame_table::FrameTable,
    page_table::PageTables,
    stats::{Counters, VmStats},
    swap::SwapSpace,
    Pid, Result, VmError,
};

/// The single simulated processor. Whoever holds it owns the gateway's
/// mappings; `current` is the process whose pages are installed there.
#[derive(Debug, Default)]
pub(crate) struct Cpu {
    pub current: Option<Pid>,
}

/// Everything that exists between `initialize` and `shutdown`.
///
/// Lock order: `cpu`, then a page table, then the frame table, then the
/// gateway's own lock. The swap bitmap and the fault slots are leaves.
pub(crate) struct VmCore<M, S> {
    pub config: VmConfig,
    pub page_size: usize,
    pub mmu: Arc<M>,
    pub store: Arc<S>,
    pub cpu: Mutex<Cpu>,
    pub page_tables: PageTables,
    pub frames: FrameTable,
    pub swap: SwapSpace,
    pub faults: FaultQueue,
    pub counters: Counters,
}

impl<M: Mmu, S: BackingStore> VmCore<M, S> {
    pub fn new(config: VmConfig, mmu: Arc<M>, store: Arc<S>) -> Self {
        let page_size = mmu.page_size();
        let blocks = store.block_count();
        VmCore {
            config,
            page_size,
            mmu,
            store,
            cpu: Mutex::new(Cpu::default()),
            page_tables: PageTables::init(config.max_processes, config.pages),
            frames: FrameTable::init(config.frames),
            swap: SwapSpace::init(blocks),
            faults: FaultQueue::new(config.max_processes),
            counters: Counters::new(config.frames),
        }
    }

    /// Fault intake: parks the faulting process until a pager has made the
    /// page at `offset` resident.
    pub fn handle_fault(&self, pid: Pid, offset: usize) -> Result<()> {
        if offset / self.page_size >= self.config.pages {
            return Err(MmuError::OutOfRegion { offset }.into());
        }
        let answer = self.faults.submit(pid, offset)?;
        Counters::bump(&self.counters.faults);
        match answer.recv() {
            Ok(result) => result,
            Err(_) => Err(match self.faults.halt_cause() {
                Some(cause) => VmError::Halted(cause),
                None => VmError::NotStarted,
            }),
        }
    }

    /// Runs a user-mode access for `pid`, installing its address space first.
    pub fn user_access<T>(
        &self,
        pid: Pid,
        access: impl FnOnce(&M) -> std::result::Result<T, MmuError>,
    ) -> Result<T> {
        let mut cpu = self.cpu.lock().unwrap();
        self.switch_in_locked(&mut cpu, pid)?;
        Ok(access(self.mmu.as_ref())?)
    }

    pub fn switch_out(&self, pid: Pid) -> Result<()> {
        let mut cpu = self.cpu.lock().unwrap();
        self.switch_out_locked(&mut cpu, pid)
    }

    pub fn switch_in(&self, pid: Pid) -> Result<()> {
        let mut cpu = self.cpu.lock().unwrap();
        self.switch_in_locked(&mut cpu, pid)
    }

    pub(crate) fn switch_out_locked(&self, cpu: &mut Cpu, pid: Pid) -> Result<()> {
        if cpu.current != Some(pid) {
            debug!("switch out of pid {} which is not installed", pid);
            return Ok(());
        }
        for (page, frame) in self.page_tables.get(pid).resident_pages() {
            let bits = self.mmu.access_bits(frame)?;
            self.frames.fold(frame, bits);
            self.mmu.unmap_page(page)?;
        }
        cpu.current = None;
        Ok(())
    }

    pub(crate) fn switch_in_locked(&self, cpu: &mut Cpu, pid: Pid) -> Result<()> {
        if cpu.current == Some(pid) {
            return Ok(());
        }
        if let Some(old) = cpu.current {
            self.switch_out_locked(cpu, old)?;
        }
        for (page, frame) in self.page_tables.get(pid).resident_pages() {
            self.mmu.map_page(page, frame, Protection::READ_WRITE)?;
        }
        cpu.current = Some(pid);
        Counters::bump(&self.counters.switches);
        debug!("switched to pid {}", pid);
        Ok(())
    }

    /// Gives back every frame and swap block `pid` holds.
    pub fn terminate(&self, pid: Pid) -> Result<()> {
        let mut cpu = self.cpu.lock().unwrap();
        let installed = cpu.current == Some(pid);
        let table = self.page_tables.get(pid);
        let mut frames_freed = 0;
        let mut blocks_freed = 0;
        for page in 0..table.len() {
            let entry = table.reset(page);
            if let Some(frame) = entry.frame() {
                if installed {
                    self.mmu.unmap_page(page)?;
                }
                self.frames.release(frame);
                self.mmu.set_access_bits(frame, AccessBits::empty())?;
                Counters::bump(&self.counters.free_frames);
                frames_freed += 1;
            }
            if let Some(block) = entry.swap_block {
                self.swap.free(block);
                blocks_freed += 1;
            }
        }
        if installed {
            cpu.current = None;
        }
        if frames_freed + blocks_freed > 0 {
            info!(
                "pid {} exited: {} frames and {} swap blocks reclaimed",
                pid, frames_freed, blocks_freed
            );
        }
        Ok(())
    }

    /// Puts the subsystem into the halted state and returns the cause that
    /// faulting processes will see.
    pub fn halt(&self, err: &VmError) -> String {
        error!("virtual memory halting: {}", err);
        self.faults.halt(err.to_string());
        self.faults.halt_cause().unwrap_or_else(|| err.to_string())
    }

    pub fn stats(&self) -> VmStats {
        let counters = &self.counters;
        VmStats {
            pages: self.config.pages,
            frames: self.config.frames,
            disk_blocks: self.swap.capacity(),
            free_frames: Counters::get(&counters.free_frames),
            free_disk_blocks: self.swap.free_blocks(),
            switches: Counters::get(&counters.switches),
            faults: Counters::get(&counters.faults),
            new: Counters::get(&counters.new),
            page_ins: Counters::get(&counters.page_ins),
            page_outs: Counters::get(&counters.page_outs),
            replaced: Counters::get(&counters.replaced),
        }
    }
}
