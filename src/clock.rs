//! Second-chance (clock) frame selection.
//!
//! Free frames are handed out first. Once memory is full the hand sweeps the
//! frame table: a referenced frame has its bit cleared and is passed over, the
//! first unreferenced one is taken. Frames reserved by another pager are never
//! looked at. Dirtiness plays no part in the choice.
//!
//! Callers must hold the CPU so no process sets reference bits mid-sweep; with
//! at most `F - 1` frames reserved elsewhere the sweep then ends within `2F`
//! examined frames.

use log::trace;
use memory::{AccessBits, Mmu, MmuError};

use crate::frame_table::FrameTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub frame: usize,
    /// Frames the clock hand looked at. Zero when a free frame was found.
    pub examined: usize,
}

/// Picks a frame and marks it reserved for the caller.
pub fn select_frame<M: Mmu + ?Sized>(table: &FrameTable, mmu: &M) -> Result<Selection, MmuError> {
    let mut inner = table.lock();
    let frames = inner.entries.len();

    if let Some(frame) = inner
        .entries
        .iter()
        .position(|e| e.owner.is_none() && !e.reserved)
    {
        inner.entries[frame].reserve();
        trace!("clock: free frame {}", frame);
        return Ok(Selection { frame, examined: 0 });
    }

    let mut examined = 0;
    loop {
        assert!(
            examined < 2 * frames,
            "clock sweep examined {} of {} frames without finding a victim",
            examined,
            frames
        );
        let frame = inner.hand;
        inner.hand = (inner.hand + 1) % frames;
        examined += 1;

        if inner.entries[frame].reserved {
            trace!("clock: frame {} reserved, skipping", frame);
            continue;
        }

        let bits = mmu.access_bits(frame)?;
        let entry = &mut inner.entries[frame];
        entry.dirty |= bits.contains(AccessBits::DIRTY);
        if entry.referenced || bits.contains(AccessBits::REFERENCED) {
            trace!("clock: frame {} referenced, second chance", frame);
            entry.referenced = false;
            mmu.set_access_bits(frame, bits & AccessBits::DIRTY)?;
            continue;
        }

        entry.reserve();
        trace!("clock: frame {} selected after {} examined", frame, examined);
        return Ok(Selection { frame, examined });
    }
}

#[cfg(test)]
mod tests {
    use memory::SimulatedMmu;

    use super::*;
    use crate::frame_table::FrameOwner;

    fn full_table(frames: usize) -> (FrameTable, SimulatedMmu) {
        let mmu = SimulatedMmu::new(32);
        mmu.init(frames, frames).unwrap();
        let table = FrameTable::init(frames);
        for frame in 0..frames {
            table.lock().entries[frame].reserve();
            table.bind(frame, FrameOwner { pid: 1, page: frame });
        }
        (table, mmu)
    }

    #[test]
    fn prefers_free_frames() {
        let mmu = SimulatedMmu::new(32);
        mmu.init(4, 3).unwrap();
        let table = FrameTable::init(3);
        let first = select_frame(&table, &mmu).unwrap();
        let second = select_frame(&table, &mmu).unwrap();
        assert_eq!(first, Selection { frame: 0, examined: 0 });
        assert_eq!(second, Selection { frame: 1, examined: 0 });
        assert!(table.entry(0).reserved && table.entry(0).in_use);
    }

    #[test]
    fn takes_first_unreferenced_frame() {
        let (table, mmu) = full_table(3);
        mmu.set_access_bits(0, AccessBits::REFERENCED).unwrap();
        let selection = select_frame(&table, &mmu).unwrap();
        assert_eq!(selection, Selection { frame: 1, examined: 2 });
        assert_eq!(table.lock().hand, 2);
        assert!(!table.entry(0).referenced);
        assert!(mmu.access_bits(0).unwrap().is_empty());
    }

    #[test]
    fn clearing_keeps_dirty_bit() {
        let (table, mmu) = full_table(2);
        mmu.set_access_bits(0, AccessBits::REFERENCED | AccessBits::DIRTY)
            .unwrap();
        let selection = select_frame(&table, &mmu).unwrap();
        assert_eq!(selection.frame, 1);
        assert_eq!(mmu.access_bits(0).unwrap(), AccessBits::DIRTY);
        assert!(table.entry(0).dirty);
    }

    #[test]
    fn all_referenced_wraps_once() {
        let (table, mmu) = full_table(4);
        for frame in 0..4 {
            mmu.set_access_bits(frame, AccessBits::REFERENCED).unwrap();
        }
        let selection = select_frame(&table, &mmu).unwrap();
        assert_eq!(selection, Selection { frame: 0, examined: 5 });
    }

    #[test]
    fn skips_reserved_frames_and_stays_within_two_passes() {
        let frames = 5;
        let (table, mmu) = full_table(frames);
        for frame in 0..frames {
            mmu.set_access_bits(frame, AccessBits::REFERENCED).unwrap();
        }
        for frame in 0..frames - 1 {
            table.lock().entries[frame].reserve();
        }
        let selection = select_frame(&table, &mmu).unwrap();
        assert_eq!(selection.frame, frames - 1);
        assert!(selection.examined <= 2 * frames);
        assert_eq!(table.reserved_count(), frames);
    }

    #[test]
    fn never_hands_out_the_same_frame_twice() {
        let (table, mmu) = full_table(3);
        let a = select_frame(&table, &mmu).unwrap().frame;
        let b = select_frame(&table, &mmu).unwrap().frame;
        let c = select_frame(&table, &mmu).unwrap().frame;
        let mut picked = vec![a, b, c];
        picked.sort();
        assert_eq!(picked, vec![0, 1, 2]);
    }
}
