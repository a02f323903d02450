use std::sync::Mutex;

use bitflags::bitflags;
use log::{debug, info};
use thiserror::Error;

use crate::PhysicalMemory;

/// Virtual address the simulated region is reported to start at.
pub const DEFAULT_REGION_BASE: usize = 0x1000_0000;

bitflags! {
    /// Hardware access bits kept per physical frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccessBits: u8 {
        const REFERENCED = 0b01;
        const DIRTY = 0b10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Protection: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MmuError {
    #[error("mmu is not initialized")]
    NotInitialized,
    #[error("mmu is already initialized")]
    AlreadyInitialized,
    #[error("page fault at region offset {offset:#x}")]
    Fault { offset: usize },
    #[error("offset {offset:#x} is outside the mapped region")]
    OutOfRegion { offset: usize },
    #[error("access at offset {offset:#x} of {len} bytes crosses a page boundary")]
    CrossesPage { offset: usize, len: usize },
    #[error("write to read-only page at offset {offset:#x}")]
    Protection { offset: usize },
    #[error("invalid page {0}")]
    InvalidPage(usize),
    #[error("invalid frame {0}")]
    InvalidFrame(usize),
    #[error("page {0} is already mapped")]
    AlreadyMapped(usize),
    #[error("page {0} is not mapped")]
    NotMapped(usize),
}

/// The address-translation gateway.
///
/// Holds the mappings of exactly one address space at a time; whoever installs
/// a process is responsible for mapping its resident pages and unmapping them
/// again when it leaves.
pub trait Mmu: Send + Sync {
    fn init(&self, pages: usize, frames: usize) -> Result<(), MmuError>;

    fn done(&self) -> Result<(), MmuError>;

    fn page_size(&self) -> usize;

    fn region_base(&self) -> usize;

    fn map_page(&self, page: usize, frame: usize, protection: Protection) -> Result<(), MmuError>;

    fn unmap_page(&self, page: usize) -> Result<(), MmuError>;

    /// Frame and protection currently mapped at `page`, if any.
    fn mapping(&self, page: usize) -> Result<Option<(usize, Protection)>, MmuError>;

    fn access_bits(&self, frame: usize) -> Result<AccessBits, MmuError>;

    fn set_access_bits(&self, frame: usize, bits: AccessBits) -> Result<(), MmuError>;

    /// Copies a whole frame out. Does not touch the access bits.
    fn read_frame(&self, frame: usize, buf: &mut [u8]) -> Result<(), MmuError>;

    /// Overwrites a whole frame. Does not touch the access bits.
    fn write_frame(&self, frame: usize, data: &[u8]) -> Result<(), MmuError>;

    /// User-mode load through the current mappings.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), MmuError>;

    /// User-mode store through the current mappings.
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), MmuError>;
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    frame: usize,
    protection: Protection,
}

#[derive(Debug)]
struct MmuState {
    memory: PhysicalMemory,
    mappings: Vec<Option<Mapping>>,
    access: Vec<AccessBits>,
}

impl MmuState {
    fn check_page(&self, page: usize) -> Result<(), MmuError> {
        if page >= self.mappings.len() {
            return Err(MmuError::InvalidPage(page));
        }
        Ok(())
    }

    /// Resolves a user access to `(frame, offset in frame)`.
    fn translate(
        &self,
        page_size: usize,
        offset: usize,
        len: usize,
        wanted: Protection,
    ) -> Result<(usize, usize), MmuError> {
        let page = offset / page_size;
        if page >= self.mappings.len() {
            return Err(MmuError::OutOfRegion { offset });
        }
        let in_page = offset % page_size;
        if in_page + len > page_size {
            return Err(MmuError::CrossesPage { offset, len });
        }
        let mapping = self.mappings[page].ok_or(MmuError::Fault { offset })?;
        if !mapping.protection.contains(wanted) {
            return Err(MmuError::Protection { offset });
        }
        Ok((mapping.frame, in_page))
    }
}

/// In-process stand-in for the MMU hardware.
#[derive(Debug)]
pub struct SimulatedMmu {
    page_size: usize,
    region_base: usize,
    state: Mutex<Option<MmuState>>,
}

impl SimulatedMmu {
    pub fn new(page_size: usize) -> Self {
        Self::with_region_base(page_size, DEFAULT_REGION_BASE)
    }

    pub fn with_region_base(page_size: usize, region_base: usize) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        SimulatedMmu {
            page_size,
            region_base,
            state: Mutex::new(None),
        }
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MmuState) -> Result<T, MmuError>,
    ) -> Result<T, MmuError> {
        let mut state = self.state.lock().unwrap();
        let state = state.as_mut().ok_or(MmuError::NotInitialized)?;
        f(state)
    }
}

impl Mmu for SimulatedMmu {
    fn init(&self, pages: usize, frames: usize) -> Result<(), MmuError> {
        let mut state = self.state.lock().unwrap();
        if state.is_some() {
            return Err(MmuError::AlreadyInitialized);
        }
        *state = Some(MmuState {
            memory: PhysicalMemory::create(frames, self.page_size),
            mappings: vec![None; pages],
            access: vec![AccessBits::empty(); frames],
        });
        info!(
            "MMU initialized: {} pages, {} frames of {} bytes",
            pages, frames, self.page_size
        );
        Ok(())
    }

    fn done(&self) -> Result<(), MmuError> {
        let mut state = self.state.lock().unwrap();
        if state.take().is_none() {
            return Err(MmuError::NotInitialized);
        }
        info!("MMU shut down");
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn region_base(&self) -> usize {
        self.region_base
    }

    fn map_page(&self, page: usize, frame: usize, protection: Protection) -> Result<(), MmuError> {
        self.with_state(|state| {
            state.check_page(page)?;
            state.memory.check_frame(frame)?;
            if state.mappings[page].is_some() {
                return Err(MmuError::AlreadyMapped(page));
            }
            debug!("map page {} -> frame {}", page, frame);
            state.mappings[page] = Some(Mapping { frame, protection });
            Ok(())
        })
    }

    fn unmap_page(&self, page: usize) -> Result<(), MmuError> {
        self.with_state(|state| {
            state.check_page(page)?;
            if state.mappings[page].take().is_none() {
                return Err(MmuError::NotMapped(page));
            }
            debug!("unmap page {}", page);
            Ok(())
        })
    }

    fn mapping(&self, page: usize) -> Result<Option<(usize, Protection)>, MmuError> {
        self.with_state(|state| {
            state.check_page(page)?;
            Ok(state.mappings[page].map(|m| (m.frame, m.protection)))
        })
    }

    fn access_bits(&self, frame: usize) -> Result<AccessBits, MmuError> {
        self.with_state(|state| {
            state.memory.check_frame(frame)?;
            Ok(state.access[frame])
        })
    }

    fn set_access_bits(&self, frame: usize, bits: AccessBits) -> Result<(), MmuError> {
        self.with_state(|state| {
            state.memory.check_frame(frame)?;
            state.access[frame] = bits;
            Ok(())
        })
    }

    fn read_frame(&self, frame: usize, buf: &mut [u8]) -> Result<(), MmuError> {
        self.with_state(|state| {
            buf.copy_from_slice(state.memory.frame(frame)?);
            Ok(())
        })
    }

    fn write_frame(&self, frame: usize, data: &[u8]) -> Result<(), MmuError> {
        self.with_state(|state| {
            state.memory.frame_mut(frame)?.copy_from_slice(data);
            Ok(())
        })
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), MmuError> {
        let page_size = self.page_size;
        self.with_state(|state| {
            let (frame, in_page) = state.translate(page_size, offset, buf.len(), Protection::READ)?;
            state.memory.read(frame, in_page, buf)?;
            state.access[frame] |= AccessBits::REFERENCED;
            Ok(())
        })
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), MmuError> {
        let page_size = self.page_size;
        self.with_state(|state| {
            let (frame, in_page) =
                state.translate(page_size, offset, data.len(), Protection::WRITE)?;
            state.memory.write(frame, in_page, data)?;
            state.access[frame] |= AccessBits::REFERENCED | AccessBits::DIRTY;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmu() -> SimulatedMmu {
        let mmu = SimulatedMmu::new(64);
        mmu.init(4, 2).unwrap();
        mmu
    }

    #[test]
    fn init_twice_fails() {
        let mmu = mmu();
        assert_eq!(mmu.init(4, 2), Err(MmuError::AlreadyInitialized));
        mmu.done().unwrap();
        assert_eq!(mmu.done(), Err(MmuError::NotInitialized));
        mmu.init(4, 2).unwrap();
    }

    #[test]
    fn unmapped_access_faults() {
        let mmu = mmu();
        let mut buf = [0; 4];
        assert_eq!(mmu.read(70, &mut buf), Err(MmuError::Fault { offset: 70 }));
        assert_eq!(
            mmu.write(64 * 4, &[1]),
            Err(MmuError::OutOfRegion { offset: 256 })
        );
    }

    #[test]
    fn mapped_access_sets_access_bits() {
        let mmu = mmu();
        mmu.map_page(1, 0, Protection::READ_WRITE).unwrap();
        let mut buf = [0; 2];
        mmu.read(64, &mut buf).unwrap();
        assert_eq!(mmu.access_bits(0).unwrap(), AccessBits::REFERENCED);

        mmu.write(65, &[9, 8]).unwrap();
        assert_eq!(
            mmu.access_bits(0).unwrap(),
            AccessBits::REFERENCED | AccessBits::DIRTY
        );

        let mut frame = vec![0; 64];
        mmu.read_frame(0, &mut frame).unwrap();
        assert_eq!(&frame[1..3], &[9, 8]);

        mmu.set_access_bits(0, AccessBits::empty()).unwrap();
        assert!(mmu.access_bits(0).unwrap().is_empty());
    }

    #[test]
    fn map_and_unmap() {
        let mmu = mmu();
        mmu.map_page(2, 1, Protection::READ_WRITE).unwrap();
        assert_eq!(
            mmu.map_page(2, 0, Protection::READ_WRITE),
            Err(MmuError::AlreadyMapped(2))
        );
        assert_eq!(mmu.mapping(2).unwrap(), Some((1, Protection::READ_WRITE)));
        mmu.unmap_page(2).unwrap();
        assert_eq!(mmu.unmap_page(2), Err(MmuError::NotMapped(2)));
        assert_eq!(mmu.mapping(2).unwrap(), None);
        assert_eq!(
            mmu.map_page(0, 2, Protection::READ),
            Err(MmuError::InvalidFrame(2))
        );
    }

    #[test]
    fn read_only_mapping_rejects_writes() {
        let mmu = mmu();
        mmu.map_page(0, 0, Protection::READ).unwrap();
        assert_eq!(mmu.write(3, &[1]), Err(MmuError::Protection { offset: 3 }));
        assert_eq!(
            mmu.read(60, &mut [0; 8]),
            Err(MmuError::CrossesPage { offset: 60, len: 8 })
        );
    }

    #[test]
    fn frame_copies_do_not_touch_access_bits() {
        let mmu = mmu();
        mmu.write_frame(1, &[7; 64]).unwrap();
        let mut buf = vec![0; 64];
        mmu.read_frame(1, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 7));
        assert!(mmu.access_bits(1).unwrap().is_empty());
    }
}
