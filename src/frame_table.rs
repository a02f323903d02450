use std::sync::{Mutex, MutexGuard};

use memory::AccessBits;

use crate::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    pub pid: Pid,
    pub page: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTableEntry {
    /// `None` while the frame is free.
    pub owner: Option<FrameOwner>,
    /// Chosen as a fault's destination and not yet published.
    pub in_use: bool,
    pub referenced: bool,
    /// Sticky until the contents reach swap.
    pub dirty: bool,
    /// A pager is moving data into or out of this frame.
    pub reserved: bool,
}

impl FrameTableEntry {
    /// Folds live hardware bits into the entry.
    pub fn fold(&mut self, bits: AccessBits) {
        self.referenced = bits.contains(AccessBits::REFERENCED);
        self.dirty |= bits.contains(AccessBits::DIRTY);
    }

    pub(crate) fn reserve(&mut self) {
        assert!(!self.reserved, "frame reserved twice");
        self.reserved = true;
        self.in_use = true;
    }
}

/// Frame entries plus the clock hand. Holding the guard is the only way to
/// choose and reserve a frame.
#[derive(Debug)]
pub struct FrameTableInner {
    pub entries: Vec<FrameTableEntry>,
    pub hand: usize,
}

#[derive(Debug)]
pub struct FrameTable {
    inner: Mutex<FrameTableInner>,
}

impl FrameTable {
    pub fn init(frames: usize) -> Self {
        FrameTable {
            inner: Mutex::new(FrameTableInner {
                entries: vec![FrameTableEntry::default(); frames],
                hand: 0,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, FrameTableInner> {
        self.inner.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, frame: usize) -> FrameTableEntry {
        self.lock().entries[frame]
    }

    pub fn owner(&self, frame: usize) -> Option<FrameOwner> {
        self.entry(frame).owner
    }

    pub fn fold(&self, frame: usize, bits: AccessBits) {
        self.lock().entries[frame].fold(bits);
    }

    /// Detaches the current occupant of a reserved frame and returns whether
    /// the page was modified since it was loaded.
    pub fn evict(&self, frame: usize, bits: AccessBits) -> bool {
        let mut inner = self.lock();
        let entry = &mut inner.entries[frame];
        assert!(entry.reserved, "evicting frame {} without reserving it", frame);
        let dirty = entry.dirty || bits.contains(AccessBits::DIRTY);
        entry.owner = None;
        entry.referenced = false;
        entry.dirty = false;
        dirty
    }

    /// Hands a reserved frame to its new page and drops the reservation.
    pub fn bind(&self, frame: usize, owner: FrameOwner) {
        let mut inner = self.lock();
        let entry = &mut inner.entries[frame];
        assert!(entry.reserved, "binding frame {} without reserving it", frame);
        assert!(
            entry.owner.is_none(),
            "frame {} bound while owned by {:?}",
            frame,
            entry.owner
        );
        *entry = FrameTableEntry {
            owner: Some(owner),
            ..Default::default()
        };
    }

    /// Frees a frame whose owner is going away.
    pub fn release(&self, frame: usize) {
        let mut inner = self.lock();
        let entry = &mut inner.entries[frame];
        assert!(!entry.reserved, "releasing frame {} while a pager holds it", frame);
        *entry = FrameTableEntry::default();
    }

    /// Gives up a reservation without touching the owner. A frame that was
    /// already evicted goes back to being free.
    pub fn unreserve(&self, frame: usize) {
        let mut inner = self.lock();
        let entry = &mut inner.entries[frame];
        assert!(entry.reserved, "unreserving frame {} that is not reserved", frame);
        entry.reserved = false;
        entry.in_use = false;
    }

    pub fn reserved_count(&self) -> usize {
        self.lock().entries.iter().filter(|e| e.reserved).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_keeps_dirty_sticky() {
        let mut entry = FrameTableEntry::default();
        entry.fold(AccessBits::REFERENCED | AccessBits::DIRTY);
        assert!(entry.referenced && entry.dirty);
        entry.fold(AccessBits::empty());
        assert!(!entry.referenced);
        assert!(entry.dirty);
    }

    #[test]
    fn evict_then_bind() {
        let table = FrameTable::init(2);
        let owner = FrameOwner { pid: 3, page: 1 };
        table.lock().entries[1].reserve();
        table.bind(1, owner);
        assert_eq!(table.owner(1), Some(owner));
        assert!(!table.entry(1).reserved);
        assert!(!table.entry(1).in_use);

        table.fold(1, AccessBits::DIRTY);
        table.lock().entries[1].reserve();
        assert!(table.evict(1, AccessBits::empty()));
        assert_eq!(table.owner(1), None);
        assert!(table.entry(1).reserved);
        assert_eq!(table.reserved_count(), 1);
    }

    #[test]
    fn clean_frame_evicts_clean() {
        let table = FrameTable::init(1);
        table.lock().entries[0].reserve();
        table.bind(0, FrameOwner { pid: 1, page: 0 });
        table.lock().entries[0].reserve();
        assert!(!table.evict(0, AccessBits::REFERENCED));
    }

    #[test]
    fn unreserve_keeps_owner() {
        let table = FrameTable::init(1);
        let owner = FrameOwner { pid: 2, page: 3 };
        table.lock().entries[0].reserve();
        table.bind(0, owner);
        table.fold(0, AccessBits::DIRTY);
        table.lock().entries[0].reserve();
        table.unreserve(0);
        let entry = table.entry(0);
        assert_eq!(entry.owner, Some(owner));
        assert!(entry.dirty);
        assert!(!entry.reserved && !entry.in_use);
        table.release(0);
        assert_eq!(table.entry(0), FrameTableEntry::default());
    }

    #[test]
    #[should_panic]
    fn bind_requires_reservation() {
        let table = FrameTable::init(1);
        table.bind(0, FrameOwner { pid: 1, page: 0 });
    }

    #[test]
    fn release_clears_everything() {
        let table = FrameTable::init(1);
        table.lock().entries[0].reserve();
        table.bind(0, FrameOwner { pid: 1, page: 2 });
        table.fold(0, AccessBits::REFERENCED | AccessBits::DIRTY);
        table.release(0);
        assert_eq!(table.entry(0), FrameTableEntry::default());
    }
}
