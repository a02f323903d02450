pub(crate) mod inner;

use std::{
    sync::{Arc, Mutex},
    thread::JoinHandle,
};

use disk::BackingStore;
use log::{debug, error, info};
use memory::{Mmu, MmuError};

use self::inner::VmCore;
use crate::{
    config::VmConfig,
    frame_table::FrameTableEntry,
    page_table::{PageTableEntry, Residency},
    pager::Pager,
    process::Process,
    stats::VmStats,
    Pid, Result, VmError,
};

struct Running<M, S> {
    core: Arc<VmCore<M, S>>,
    pagers: Vec<JoinHandle<()>>,
}

struct State<M, S> {
    running: Option<Running<M, S>>,
    /// Statistics captured by the last shutdown.
    final_stats: Option<VmStats>,
}

/// Demand-paged virtual memory on top of an [`Mmu`] and a swap device.
///
/// Between [`PagingSystem::initialize`] and [`PagingSystem::shutdown`] a pool
/// of pager threads resolves faults. The process lifecycle hooks are no-ops
/// while the system is stopped.
pub struct PagingSystem<M: Mmu + 'static, S: BackingStore + 'static> {
    mmu: Arc<M>,
    store: Arc<S>,
    state: Mutex<State<M, S>>,
}

impl<M: Mmu + 'static, S: BackingStore + 'static> PagingSystem<M, S> {
    pub fn new(mmu: M, store: S) -> Self {
        Self::from_shared(Arc::new(mmu), Arc::new(store))
    }

    pub fn from_shared(mmu: Arc<M>, store: Arc<S>) -> Self {
        PagingSystem {
            mmu,
            store,
            state: Mutex::new(State {
                running: None,
                final_stats: None,
            }),
        }
    }

    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn page_size(&self) -> usize {
        self.mmu.page_size()
    }

    /// Brings up the gateway, the tables and the pager pool. Returns the base
    /// address of the virtual region.
    pub fn initialize(&self, config: VmConfig) -> Result<usize> {
        config.validate()?;
        let mut state = self.state.lock().unwrap();
        if state.running.is_some() {
            return Err(VmError::AlreadyStarted);
        }
        let page_size = self.mmu.page_size();
        if self.store.block_size() != page_size {
            return Err(VmError::InvalidConfig(format!(
                "swap block size {} does not match page size {}",
                self.store.block_size(),
                page_size
            )));
        }

        self.mmu.init(config.mappings, config.frames)?;
        let core = Arc::new(VmCore::new(config, self.mmu.clone(), self.store.clone()));

        let pager_count = config.effective_pagers();
        let mut pagers = Vec::with_capacity(pager_count);
        for id in 0..pager_count {
            match Pager::spawn(id, core.clone()) {
                Ok(handle) => pagers.push(handle),
                Err(err) => {
                    error!("starting pager {} failed: {}", id, err);
                    Self::stop(&core, pagers);
                    self.mmu.done()?;
                    return Err(err);
                }
            }
        }

        info!(
            "virtual memory started: {} pages, {} frames, {} swap blocks, {} pagers",
            config.pages,
            config.frames,
            self.store.block_count(),
            pager_count
        );
        state.running = Some(Running { core, pagers });
        state.final_stats = None;
        Ok(self.mmu.region_base())
    }

    /// Drains the pager pool and tears down the gateway. Statistics remain
    /// readable through [`PagingSystem::stats`].
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Running { core, pagers } = state.running.take().ok_or(VmError::NotStarted)?;
        Self::stop(&core, pagers);
        let stats = core.stats();
        state.final_stats = Some(stats);
        self.mmu.done()?;
        info!("virtual memory stopped\n{}", stats);
        Ok(())
    }

    fn stop(core: &VmCore<M, S>, pagers: Vec<JoinHandle<()>>) {
        core.faults.release();
        for pager in pagers {
            if pager.join().is_err() {
                error!("a pager panicked before shutdown");
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().unwrap().running.is_some()
    }

    /// Live statistics while running, the final ones after shutdown.
    pub fn stats(&self) -> Option<VmStats> {
        let state = self.state.lock().unwrap();
        match &state.running {
            Some(running) => Some(running.core.stats()),
            None => state.final_stats,
        }
    }

    pub(crate) fn core(&self) -> Option<Arc<VmCore<M, S>>> {
        self.state
            .lock()
            .unwrap()
            .running
            .as_ref()
            .map(|running| running.core.clone())
    }

    /// Parks the caller until the page behind `offset` is resident for `pid`.
    pub fn handle_fault(&self, pid: Pid, offset: usize) -> Result<()> {
        self.core()
            .ok_or(VmError::NotStarted)?
            .handle_fault(pid, offset)
    }

    pub fn switch_out(&self, pid: Pid) -> Result<()> {
        match self.core() {
            Some(core) => core.switch_out(pid),
            None => Ok(()),
        }
    }

    pub fn switch_in(&self, pid: Pid) -> Result<()> {
        match self.core() {
            Some(core) => core.switch_in(pid),
            None => Ok(()),
        }
    }

    /// Reclaims everything `pid` holds. Safe to call more than once.
    pub fn terminate(&self, pid: Pid) -> Result<()> {
        match self.core() {
            Some(core) => core.terminate(pid),
            None => Ok(()),
        }
    }

    /// Children start with an empty address space; nothing is copied.
    pub fn on_fork(&self, pid: Pid) -> Result<()> {
        debug!("pid {} forked with an empty address space", pid);
        Ok(())
    }

    pub fn process(&self, pid: Pid) -> Process<'_, M, S> {
        Process::new(self, pid)
    }

    /// Residency of `page` in the address space of `pid`.
    pub fn lookup(&self, pid: Pid, page: usize) -> Result<Residency> {
        Ok(self.page_entry(pid, page)?.residency)
    }

    pub fn page_entry(&self, pid: Pid, page: usize) -> Result<PageTableEntry> {
        let core = self.core().ok_or(VmError::NotStarted)?;
        if page >= core.config.pages {
            return Err(MmuError::InvalidPage(page).into());
        }
        Ok(core.page_tables.get(pid).entry(page))
    }

    pub fn frame_entry(&self, frame: usize) -> Result<FrameTableEntry> {
        let core = self.core().ok_or(VmError::NotStarted)?;
        if frame >= core.config.frames {
            return Err(MmuError::InvalidFrame(frame).into());
        }
        Ok(core.frames.entry(frame))
    }
}

impl<M: Mmu + 'static, S: BackingStore + 'static> Drop for PagingSystem<M, S> {
    fn drop(&mut self) {
        if self.is_started() {
            if let Err(err) = self.shutdown() {
                error!("shutdown on drop failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use disk::DiskError;
    use memory::SimulatedMmu;

    use super::*;

    struct VecStore(Mutex<Vec<Vec<u8>>>);

    impl BackingStore for VecStore {
        fn block_size(&self) -> usize {
            16
        }

        fn block_count(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        fn read_block(&self, block_number: usize) -> std::result::Result<Vec<u8>, DiskError> {
            Ok(self.0.lock().unwrap()[block_number].clone())
        }

        fn write_block(&self, block_number: usize, block: &[u8]) -> std::result::Result<(), DiskError> {
            self.0.lock().unwrap()[block_number] = block.to_vec();
            Ok(())
        }
    }

    fn system() -> PagingSystem<SimulatedMmu, VecStore> {
        let _ = env_logger::builder().is_test(true).try_init();
        PagingSystem::new(SimulatedMmu::new(16), VecStore(Mutex::new(vec![vec![0; 16]; 4])))
    }

    #[test]
    fn switch_out_folds_access_bits() {
        let system = system();
        system.initialize(VmConfig::new(2, 2, 2, 1)).unwrap();
        system.process(5).write_u8(3, 1).unwrap();
        system.process(5).read_u8(17).unwrap();

        let core = system.core().unwrap();
        let written = core.page_tables.get(5).entry(0).frame().unwrap();
        let read = core.page_tables.get(5).entry(1).frame().unwrap();
        assert!(!core.frames.entry(written).dirty);

        system.switch_out(5).unwrap();
        assert_eq!(core.cpu.lock().unwrap().current, None);
        let written = core.frames.entry(written);
        assert!(written.referenced && written.dirty);
        let read = core.frames.entry(read);
        assert!(read.referenced && !read.dirty);
        assert_eq!(system.mmu().mapping(0).unwrap(), None);
        assert_eq!(system.mmu().mapping(1).unwrap(), None);
    }

    #[test]
    fn switching_to_another_process_counts_once() {
        let system = system();
        system.initialize(VmConfig::new(2, 2, 2, 1)).unwrap();
        system.switch_in(1).unwrap();
        system.switch_in(1).unwrap();
        system.switch_in(2).unwrap();
        system.switch_out(1).unwrap();
        assert_eq!(system.stats().unwrap().switches, 2);
        assert_eq!(system.core().unwrap().cpu.lock().unwrap().current, Some(2));
    }

    #[test]
    fn dropping_a_running_system_stops_it() {
        let mmu = Arc::new(SimulatedMmu::new(16));
        {
            let system = PagingSystem::from_shared(
                mmu.clone(),
                Arc::new(VecStore(Mutex::new(vec![vec![0; 16]; 2]))),
            );
            system.initialize(VmConfig::new(2, 2, 1, 1)).unwrap();
        }
        assert!(matches!(mmu.mapping(0), Err(MmuError::NotInitialized)));
    }
}
