use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("physical address {address:#x} (+{len}) is outside of {capacity} bytes")]
    OverCapacity {
        address: usize,
        len: usize,
        capacity: usize,
    },
    #[error("frame {frame} does not exist ({frames} frames)")]
    NoSuchFrame { frame: usize, frames: usize },
}

/// Flat physical memory: `frames` frames of `PAGE_SIZE` bytes, addressed by
/// `frame * PAGE_SIZE + offset`.
///
/// Every access takes the buffer lock for the length of one copy only, so
/// callers may hold other locks around it.
#[derive(Clone)]
pub struct PhysicalMemory<const PAGE_SIZE: usize> {
    frames: usize,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<const PAGE_SIZE: usize> PhysicalMemory<PAGE_SIZE> {
    pub fn new(frames: usize) -> Self {
        assert!(PAGE_SIZE.is_power_of_two(), "Page size {} is not a power of 2", PAGE_SIZE);
        Self {
            frames,
            buffer: Arc::new(Mutex::new(vec![0; frames * PAGE_SIZE])),
        }
    }

    fn capacity(&self) -> usize {
        self.frames * PAGE_SIZE
    }

    fn check_address(&self, address: usize, len: usize) -> Result<(), MemoryError> {
        match address.checked_add(len) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(MemoryError::OverCapacity {
                address,
                len,
                capacity: self.capacity(),
            }),
        }
    }

    fn check_frame(&self, frame: usize) -> Result<usize, MemoryError> {
        if frame >= self.frames {
            return Err(MemoryError::NoSuchFrame {
                frame,
                frames: self.frames,
            });
        }
        Ok(frame * PAGE_SIZE)
    }

    pub fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.check_address(address, buf.len())?;
        let buffer = self.buffer.lock();
        buf.copy_from_slice(&buffer[address..address + buf.len()]);
        Ok(())
    }

    pub fn write(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        self.check_address(address, data.len())?;
        let mut buffer = self.buffer.lock();
        buffer[address..address + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_frame(&self, frame: usize, buf: &mut [u8; PAGE_SIZE]) -> Result<(), MemoryError> {
        let start = self.check_frame(frame)?;
        trace!("Reading frame {}", frame);
        let buffer = self.buffer.lock();
        buf.copy_from_slice(&buffer[start..start + PAGE_SIZE]);
        Ok(())
    }

    pub fn write_frame(&self, frame: usize, data: &[u8; PAGE_SIZE]) -> Result<(), MemoryError> {
        let start = self.check_frame(frame)?;
        trace!("Writing frame {}", frame);
        let mut buffer = self.buffer.lock();
        buffer[start..start + PAGE_SIZE].copy_from_slice(data);
        Ok(())
    }

    pub fn zero_frame(&self, frame: usize) -> Result<(), MemoryError> {
        let start = self.check_frame(frame)?;
        let mut buffer = self.buffer.lock();
        buffer[start..start + PAGE_SIZE].fill(0);
        Ok(())
    }
}
