pub mod bitmap;

use std::sync::Mutex;

use log::debug;

use self::bitmap::Bitmap;
use crate::{Result, VmError};

/// Allocator for swap blocks, one block per page.
/// Implemented as a bitmap, where each bit represents a block on the swap disk.
#[derive(Debug)]
pub struct SwapSpace {
    bitmap: Mutex<Bitmap>,
}

impl SwapSpace {
    pub fn init(blocks: usize) -> SwapSpace {
        SwapSpace {
            bitmap: Mutex::new(Bitmap::new(blocks)),
        }
    }

    pub fn allocate(&self) -> Result<usize> {
        match self.bitmap.lock().unwrap().allocate() {
            Some(block) => {
                debug!("swap block {} allocated", block);
                Ok(block)
            }
            None => Err(VmError::OutOfSwap),
        }
    }

    /// Returns a block to the pool. Freeing a block that is not allocated is a bug.
    pub fn free(&self, block: usize) {
        let mut bitmap = self.bitmap.lock().unwrap();
        assert!(
            bitmap.is_allocated(block),
            "swap block {} freed while not allocated",
            block
        );
        bitmap.deallocate(block);
        debug!("swap block {} freed", block);
    }

    pub fn capacity(&self) -> usize {
        self.bitmap.lock().unwrap().len()
    }

    pub fn free_blocks(&self) -> usize {
        self.bitmap.lock().unwrap().free()
    }
}
