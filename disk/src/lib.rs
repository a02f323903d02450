use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    sync::{Arc, Mutex},
};

use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("block has the wrong size")]
    IncorrectBlockSize,
    #[error("block number is past the end of the disk")]
    OverCapacity,
    #[error("disk image i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl PartialEq for DiskError {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (DiskError::IncorrectBlockSize, DiskError::IncorrectBlockSize)
                | (DiskError::OverCapacity, DiskError::OverCapacity)
                | (DiskError::Io(_), DiskError::Io(_))
        )
    }
}

/// Block device the pager swaps pages to and from.
///
/// One block holds exactly one page. Implementations must be safe to call from
/// several pager threads at once.
pub trait BackingStore: Send + Sync {
    fn block_size(&self) -> usize;

    fn block_count(&self) -> usize;

    fn read_block(&self, block_number: usize) -> Result<Vec<u8>, DiskError>;

    fn write_block(&self, block_number: usize, block: &[u8]) -> Result<(), DiskError>;
}

const HEADER_SIZE: usize = size_of::<u32>() * 2;

#[derive(Debug, Clone)]
pub struct Disk<const BLOCKSIZE: usize, const CAPACITY: usize> {
    file_name: String,
    file: Arc<Mutex<File>>,
}

pub fn make_name(name: &str) -> String {
    let name = name.replace("-", "_");
    let mut disk_name = String::from("DISK_IMAGE_");
    disk_name.push_str(&name);
    disk_name
}

fn write_header(file: &mut File, block_size: u32, capacity: u32) -> Result<(), std::io::Error> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&block_size.to_be_bytes())?;
    file.write_all(&capacity.to_be_bytes())?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<(u32, u32), std::io::Error> {
    let mut block_size = [0; size_of::<u32>()];
    let mut capacity = [0; size_of::<u32>()];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut block_size)?;
    file.read_exact(&mut capacity)?;
    Ok((u32::from_be_bytes(block_size), u32::from_be_bytes(capacity)))
}

impl<const BLOCKSIZE: usize, const CAPACITY: usize> Disk<BLOCKSIZE, CAPACITY> {
    pub fn create(name: &str) -> Result<Self, DiskError> {
        assert_eq!(
            CAPACITY % BLOCKSIZE,
            0,
            "Capacity must be a multiply of BlockSize"
        );
        let mut file = File::options()
            .truncate(true)
            .write(true)
            .read(true)
            .create(true)
            .open(make_name(name))?;
        file.set_len((HEADER_SIZE + CAPACITY) as u64)?;
        write_header(&mut file, BLOCKSIZE as u32, CAPACITY as u32)?;
        info!(
            "Created swap disk {} with {} blocks of {} bytes",
            name,
            CAPACITY / BLOCKSIZE,
            BLOCKSIZE
        );
        Ok(Self {
            file_name: String::from(name),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn connect(name: &str) -> Result<Self, DiskError> {
        assert_eq!(
            CAPACITY % BLOCKSIZE,
            0,
            "Capacity must be a multiply of BlockSize"
        );
        let mut file = File::options()
            .write(true)
            .read(true)
            .open(make_name(name))?;
        let (block_size, capacity) = read_header(&mut file)?;
        assert_eq!(BLOCKSIZE, block_size as usize, "Incorrect disk block size");
        assert_eq!(CAPACITY, capacity as usize, "Incorrect disk capacity");
        Ok(Self {
            file_name: String::from(name),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn name(&self) -> &str {
        &self.file_name
    }

    fn seek_block(file: &mut File, block_number: usize) -> Result<(), DiskError> {
        file.seek(SeekFrom::Start(
            HEADER_SIZE as u64 + (block_number * BLOCKSIZE) as u64,
        ))?;
        Ok(())
    }
}

impl<const BLOCKSIZE: usize, const CAPACITY: usize> BackingStore for Disk<BLOCKSIZE, CAPACITY> {
    fn block_size(&self) -> usize {
        BLOCKSIZE
    }

    fn block_count(&self) -> usize {
        CAPACITY / BLOCKSIZE
    }

    fn read_block(&self, block_number: usize) -> Result<Vec<u8>, DiskError> {
        if block_number >= CAPACITY / BLOCKSIZE {
            return Err(DiskError::OverCapacity);
        }
        let mut file = self.file.lock().unwrap();
        info!("Start reading block[{}]", block_number);
        Self::seek_block(&mut file, block_number)?;
        let mut buf = vec![0; BLOCKSIZE];
        file.read_exact(&mut buf)?;
        info!("Done reading block[{}]", block_number);
        Ok(buf)
    }

    fn write_block(&self, block_number: usize, block: &[u8]) -> Result<(), DiskError> {
        if block.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize);
        } else if block_number >= CAPACITY / BLOCKSIZE {
            return Err(DiskError::OverCapacity);
        }
        let mut file = self.file.lock().unwrap();
        info!("Start writing block[{}]", block_number);
        Self::seek_block(&mut file, block_number)?;
        file.write_all(block)?;
        info!("Done writing block[{}]", block_number);
        Ok(())
    }
}
