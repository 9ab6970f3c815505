use std::{collections::VecDeque, path::Path};

use disk::{Disk, DiskError};
use log::{debug, info};

/// Slot allocation for the swap file: reclaimed slots are reused before the
/// file is grown past its high-water mark.
#[derive(Debug, Default)]
pub(crate) struct SwapSlots {
    free: VecDeque<usize>,
    next: usize,
    limit: Option<usize>,
}

impl SwapSlots {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        SwapSlots {
            free: VecDeque::new(),
            next: 0,
            limit,
        }
    }

    pub(crate) fn allocate(&mut self) -> Option<usize> {
        if let Some(slot) = self.free.pop_front() {
            return Some(slot);
        }
        if self.limit.map_or(false, |limit| self.next >= limit) {
            debug!("No free swap slots");
            return None;
        }
        let slot = self.next;
        self.next += 1;
        Some(slot)
    }

    pub(crate) fn deallocate(&mut self, slot: usize) {
        debug_assert!(slot < self.next, "slot {} was never handed out", slot);
        debug_assert!(!self.free.contains(&slot), "slot {} freed twice", slot);
        self.free.push_back(slot);
    }

    /// Slots currently backing some page.
    pub(crate) fn in_use(&self) -> usize {
        self.next - self.free.len()
    }

    pub(crate) fn high_water(&self) -> usize {
        self.next
    }
}

/// The swap file viewed as an array of page-sized slots.
///
/// Transfers are synchronous and always a full page; a short transfer means
/// the file is not what we left there, and is treated as fatal.
pub struct SwapStore<const PAGE_SIZE: usize> {
    disk: Disk<PAGE_SIZE>,
}

impl<const PAGE_SIZE: usize> SwapStore<PAGE_SIZE> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, DiskError> {
        let disk = Disk::create(path)?;
        info!("Swap file {} ready", disk.path().display());
        Ok(SwapStore { disk })
    }

    pub fn path(&self) -> &Path {
        self.disk.path()
    }

    pub fn write_page(&self, slot: usize, page: &[u8; PAGE_SIZE]) -> Result<(), DiskError> {
        let written = self.disk.write_block(slot, page)?;
        assert_eq!(written, PAGE_SIZE, "short write to swap slot {}", slot);
        Ok(())
    }

    pub fn read_page(&self, slot: usize, page: &mut [u8; PAGE_SIZE]) -> Result<(), DiskError> {
        let read = self.disk.read_block(slot, page)?;
        assert_eq!(read, PAGE_SIZE, "short read from swap slot {}", slot);
        Ok(())
    }

    pub fn remove(&self) -> Result<(), DiskError> {
        self.disk.remove()
    }
}
