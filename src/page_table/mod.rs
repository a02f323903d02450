mod page_table_entry;

use std::sync::{Condvar, Mutex};

pub use page_table_entry::{PageTableEntry, Residency};

use crate::Pid;

/// Page table of a single process, one entry per virtual page.
#[derive(Debug)]
pub struct PageTable {
    entries: Mutex<Vec<PageTableEntry>>,
    writeback_done: Condvar,
}

impl PageTable {
    pub fn init(pages: usize) -> Self {
        Self {
            entries: Mutex::new(vec![PageTableEntry::zero(); pages]),
            writeback_done: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, page: usize) -> PageTableEntry {
        self.entries.lock().unwrap()[page]
    }

    pub fn lookup(&self, page: usize) -> Residency {
        self.entry(page).residency
    }

    /// Marks `page` resident in `frame`, returning what it was before.
    pub fn bind(&self, page: usize, frame: usize) -> Residency {
        let mut entries = self.entries.lock().unwrap();
        let entry = &mut entries[page];
        assert!(
            !entry.is_resident(),
            "page {} bound to frame {} while resident in {:?}",
            page,
            frame,
            entry.frame()
        );
        let previous = entry.residency;
        entry.residency = Residency::Resident { frame };
        previous
    }

    /// Marks `page` evicted from `frame`.
    ///
    /// With `writeback` set the page is given that swap block (if it had none)
    /// and stays fenced until [`PageTable::end_writeback`].
    pub fn unbind(&self, page: usize, frame: usize, writeback: Option<usize>) {
        let mut entries = self.entries.lock().unwrap();
        let entry = &mut entries[page];
        assert_eq!(
            entry.residency,
            Residency::Resident { frame },
            "page {} evicted from a frame it does not occupy",
            page
        );
        entry.residency = Residency::Evicted;
        if let Some(block) = writeback {
            assert!(
                entry.swap_block.map_or(true, |b| b == block),
                "page {} already owns swap block {:?}",
                page,
                entry.swap_block
            );
            entry.swap_block = Some(block);
            entry.writeback = true;
        }
    }

    pub fn end_writeback(&self, page: usize) {
        let mut entries = self.entries.lock().unwrap();
        entries[page].writeback = false;
        self.writeback_done.notify_all();
    }

    /// Blocks until no write of `page` to swap is in flight.
    pub fn wait_writeback(&self, page: usize) -> PageTableEntry {
        let mut entries = self.entries.lock().unwrap();
        while entries[page].writeback {
            entries = self.writeback_done.wait(entries).unwrap();
        }
        entries[page]
    }

    /// `(page, frame)` for every resident page.
    pub fn resident_pages(&self) -> Vec<(usize, usize)> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .enumerate()
            .filter_map(|(page, entry)| entry.frame().map(|frame| (page, frame)))
            .collect()
    }

    /// Returns `page` to its initial state once any write-back has landed.
    pub fn reset(&self, page: usize) -> PageTableEntry {
        let mut entries = self.entries.lock().unwrap();
        while entries[page].writeback {
            entries = self.writeback_done.wait(entries).unwrap();
        }
        std::mem::take(&mut entries[page])
    }
}

/// Fixed arena of page tables, indexed by process id modulo its capacity.
#[derive(Debug)]
pub struct PageTables {
    tables: Vec<PageTable>,
}

impl PageTables {
    pub fn init(processes: usize, pages: usize) -> Self {
        Self {
            tables: (0..processes).map(|_| PageTable::init(pages)).collect(),
        }
    }

    pub fn get(&self, pid: Pid) -> &PageTable {
        &self.tables[pid % self.tables.len()]
    }

    pub fn capacity(&self) -> usize {
        self.tables.len()
    }
}
