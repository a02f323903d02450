#[derive(Debug)]
pub struct Bitmap {
    bitmap: Vec<u8>,
    blocks: usize,
    free: usize,
}

impl Bitmap {
    pub fn new(blocks: usize) -> Bitmap {
        let mut bitmap = Vec::new();
        bitmap.resize(blocks / 8 + if blocks % 8 == 0 { 0 } else { 1 }, 0);
        Bitmap {
            bitmap,
            blocks,
            free: blocks,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    pub fn free(&self) -> usize {
        self.free
    }

    pub fn is_allocated(&self, block: usize) -> bool {
        self.bitmap[block / 8] & (1 << (block % 8)) != 0
    }

    /// Claims the lowest free block.
    pub fn allocate(&mut self) -> Option<usize> {
        for i in 0..self.bitmap.len() {
            if self.bitmap[i] == u8::MAX {
                continue;
            }
            for j in 0..8 {
                let block = i * 8 + j;
                if block >= self.blocks {
                    return None;
                }
                if self.bitmap[i] & (1 << j) == 0 {
                    self.bitmap[i] |= 1 << j;
                    self.free -= 1;
                    return Some(block);
                }
            }
        }
        None
    }

    pub fn deallocate(&mut self, block: usize) {
        if self.is_allocated(block) {
            self.bitmap[block / 8] &= !(1 << (block % 8));
            self.free += 1;
        }
    }
}
