use crate::MmuError;

/// Frame-granular physical memory.
///
/// Frames are stored back to back, frame `n` occupying bytes
/// `n * frame_size..(n + 1) * frame_size`.
#[derive(Debug, Clone)]
pub struct PhysicalMemory {
    frame_size: usize,
    buffer: Vec<u8>,
}

impl PhysicalMemory {
    pub fn create(frames: usize, frame_size: usize) -> Self {
        PhysicalMemory {
            frame_size,
            buffer: vec![0; frames * frame_size],
        }
    }

    pub fn frames(&self) -> usize {
        self.buffer.len() / self.frame_size
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn check_frame(&self, frame: usize) -> Result<(), MmuError> {
        if frame >= self.frames() {
            return Err(MmuError::InvalidFrame(frame));
        }
        Ok(())
    }

    pub fn frame(&self, frame: usize) -> Result<&[u8], MmuError> {
        self.check_frame(frame)?;
        Ok(&self.buffer[frame * self.frame_size..(frame + 1) * self.frame_size])
    }

    pub fn frame_mut(&mut self, frame: usize) -> Result<&mut [u8], MmuError> {
        self.check_frame(frame)?;
        Ok(&mut self.buffer[frame * self.frame_size..(frame + 1) * self.frame_size])
    }

    pub fn read(&self, frame: usize, offset: usize, buf: &mut [u8]) -> Result<(), MmuError> {
        let frame = self.frame(frame)?;
        buf.copy_from_slice(&frame[offset..offset + buf.len()]);
        Ok(())
    }

    pub fn write(&mut self, frame: usize, offset: usize, data: &[u8]) -> Result<(), MmuError> {
        let frame = self.frame_mut(frame)?;
        frame[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}
