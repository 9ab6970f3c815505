use std::{
    fs::{remove_file, File},
    io::{self, Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{info, trace};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("block buffer is {0} bytes, expected one block")]
    IncorrectBlockSize(usize),
    #[error("disk i/o failed: {0}")]
    Io(#[from] io::Error),
}

const HEADER_SIZE: usize = size_of::<u32>();

/// A growable file of fixed-size blocks.
///
/// Blocks are addressed by index and are created on first write; the file
/// only ever grows. Handles are cheap to clone and share the underlying
/// file, so every transfer is serialized on it.
#[derive(Debug, Clone)]
pub struct Disk<const BLOCKSIZE: usize> {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

fn write_header(file: &mut File, block_size: u32) -> Result<(), io::Error> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&block_size.to_be_bytes())?;
    Ok(())
}

fn offset_of<const BLOCKSIZE: usize>(block_number: usize) -> u64 {
    HEADER_SIZE as u64 + (block_number * BLOCKSIZE) as u64
}

impl<const BLOCKSIZE: usize> Disk<BLOCKSIZE> {
    /// Create a fresh disk at `path`, truncating whatever was there.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, DiskError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::options()
            .truncate(true)
            .write(true)
            .read(true)
            .create(true)
            .open(&path)?;
        write_header(&mut file, BLOCKSIZE as u32)?;
        info!("Created disk {} (block size {})", path.display(), BLOCKSIZE);
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read block `block_number` into `buf`, returning the bytes transferred.
    ///
    /// Reading past the end of the file is not an error; the count simply
    /// comes back short and the caller decides what that means.
    pub fn read_block(&self, block_number: usize, buf: &mut [u8]) -> Result<usize, DiskError> {
        if buf.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize(buf.len()));
        }
        let mut file = self.lock();
        trace!("Start reading block[{}]", block_number);
        file.seek(SeekFrom::Start(offset_of::<BLOCKSIZE>(block_number)))?;
        let mut read = 0;
        while read < BLOCKSIZE {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        trace!("Done reading block[{}] ({} bytes)", block_number, read);
        Ok(read)
    }

    /// Write `block` to block `block_number`, growing the file if needed.
    pub fn write_block(&self, block_number: usize, block: &[u8]) -> Result<usize, DiskError> {
        if block.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize(block.len()));
        }
        let mut file = self.lock();
        trace!("Start writing block[{}]", block_number);
        file.seek(SeekFrom::Start(offset_of::<BLOCKSIZE>(block_number)))?;
        let mut written = 0;
        while written < BLOCKSIZE {
            match file.write(&block[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        trace!("Done writing block[{}] ({} bytes)", block_number, written);
        Ok(written)
    }

    /// Delete the backing file. Other clones keep their open handle but
    /// the name is gone.
    pub fn remove(&self) -> Result<(), DiskError> {
        info!("Removing disk {}", self.path.display());
        remove_file(&self.path)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock()
    }
}
