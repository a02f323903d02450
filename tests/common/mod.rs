#![allow(dead_code)]

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use demand_pager::{PagingSystem, Pid, Residency};
use disk::{BackingStore, DiskError};
use memory::{Mmu, SimulatedMmu};

pub const PAGE_SIZE: usize = 64;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Swap device kept in memory, with switchable write failures.
#[derive(Debug)]
pub struct MemStore {
    block_size: usize,
    blocks: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemStore {
    pub fn new(block_size: usize, blocks: usize) -> Self {
        MemStore {
            block_size,
            blocks: Mutex::new(vec![vec![0; block_size]; blocks]),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

impl BackingStore for MemStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    fn read_block(&self, block_number: usize) -> Result<Vec<u8>, DiskError> {
        self.blocks
            .lock()
            .unwrap()
            .get(block_number)
            .cloned()
            .ok_or(DiskError::OverCapacity)
    }

    fn write_block(&self, block_number: usize, block: &[u8]) -> Result<(), DiskError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DiskError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        if block.len() != self.block_size {
            return Err(DiskError::IncorrectBlockSize);
        }
        let mut blocks = self.blocks.lock().unwrap();
        let slot = blocks
            .get_mut(block_number)
            .ok_or(DiskError::OverCapacity)?;
        slot.copy_from_slice(block);
        Ok(())
    }
}

pub fn system(blocks: usize) -> PagingSystem<SimulatedMmu, MemStore> {
    init_logger();
    PagingSystem::new(SimulatedMmu::new(PAGE_SIZE), MemStore::new(PAGE_SIZE, blocks))
}

/// Every frame owner points back at the frame through its page table, and no
/// two resident pages share a frame.
pub fn assert_frame_ownership<M: Mmu, S: BackingStore>(
    system: &PagingSystem<M, S>,
    frames: usize,
    pids: &[Pid],
    pages: usize,
) {
    for frame in 0..frames {
        let entry = system.frame_entry(frame).unwrap();
        assert!(!entry.reserved, "frame {} still reserved", frame);
        if let Some(owner) = entry.owner {
            assert_eq!(
                system.lookup(owner.pid, owner.page).unwrap(),
                Residency::Resident { frame }
            );
        }
    }

    let mut seen = vec![None; frames];
    for &pid in pids {
        for page in 0..pages {
            if let Residency::Resident { frame } = system.lookup(pid, page).unwrap() {
                assert_eq!(
                    seen[frame], None,
                    "frame {} resident for two pages",
                    frame
                );
                seen[frame] = Some((pid, page));
            }
        }
    }
}
