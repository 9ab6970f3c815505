use std::ops::Range;

use log::debug;
use parking_lot::MutexGuard;

use crate::{
    address_space::AddressSpace,
    error::{Result, VmError},
    frame_registry::Owner,
    manager::{Inner, MemoryManager},
    Pid,
};

/// Where a page's contents came from when it faulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    Swap { slot: usize },
    Image { section: usize, page: usize },
    ZeroFill,
}

/// Outcome of resolving a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The page was already valid; nothing was done.
    Resident,
    PagedIn { frame: usize, source: PageSource },
}

impl<const PAGE_SIZE: usize> MemoryManager<PAGE_SIZE> {
    /// Make the page containing `vaddr` resident in `pid`'s address space.
    pub fn resolve_fault(&self, pid: Pid, vaddr: usize) -> Result<Fault> {
        let space = self.address_space(pid)?;
        let vpn = vaddr / PAGE_SIZE;
        if vpn >= space.num_pages() {
            return Err(VmError::InvalidAddress { vaddr });
        }
        self.fault_in(&space, vpn)
    }

    pub(crate) fn fault_in(&self, space: &AddressSpace<PAGE_SIZE>, vpn: usize) -> Result<Fault> {
        let mut inner = self.inner.lock();
        self.fault_locked(&mut inner, space, vpn)
    }

    /// Entered and left with the global lock held; drops it around the
    /// page-in itself.
    fn fault_locked(
        &self,
        inner: &mut MutexGuard<'_, Inner<PAGE_SIZE>>,
        space: &AddressSpace<PAGE_SIZE>,
        vpn: usize,
    ) -> Result<Fault> {
        let owner = Owner {
            pid: space.pid(),
            vpn,
        };

        // Another thread may already be bringing this page in; wait for it
        // rather than loading a second copy.
        loop {
            let mut table = space.table.lock();
            if table.is_torn_down() {
                return Err(VmError::UnknownProcess(owner.pid));
            }
            if table.entry(vpn).valid {
                return Ok(Fault::Resident);
            }
            if !table.is_loading(vpn) {
                table.begin_loading(vpn);
                break;
            }
            drop(table);
            self.page_ready.wait(inner);
        }
        inner.stats.faults += 1;

        let frame = match self.allocate_locked(inner, owner) {
            Ok(frame) => frame,
            Err(err) => {
                space.table.lock().finish_loading(vpn);
                self.page_ready.notify_all();
                return Err(err);
            }
        };
        // Owned but not yet valid: the pin keeps the evictor off it while
        // the lock is released.
        inner.frames.pin(frame);

        let source = {
            let mut table = space.table.lock();
            table.entry_mut(vpn).ppn = frame;
            match table.swap_slot(vpn) {
                Some(slot) => PageSource::Swap { slot },
                None => match space.image().locate(vpn) {
                    Some((section, s)) => PageSource::Image {
                        section,
                        page: vpn - s.first_vpn,
                    },
                    None => PageSource::ZeroFill,
                },
            }
        };

        debug!("Paging in {:?} into frame {} from {:?}", owner, frame, source);
        let loaded = MutexGuard::unlocked(inner, || self.page_in(space, frame, source));

        let mut table = space.table.lock();
        table.finish_loading(vpn);
        let result = match loaded {
            Ok(()) => {
                let entry = table.entry_mut(vpn);
                entry.valid = true;
                entry.used = false;
                entry.dirty = false;
                entry.read_only = space.is_read_only(vpn);
                drop(table);
                if let PageSource::Swap { .. } = source {
                    inner.stats.swap_reads += 1;
                }
                inner.frames.unpin(frame);
                Ok(Fault::PagedIn { frame, source })
            }
            Err(err) => {
                drop(table);
                inner.frames.clear(frame);
                Err(err)
            }
        };
        self.page_ready.notify_all();
        self.frames_available.notify_all();
        result
    }

    fn page_in(
        &self,
        space: &AddressSpace<PAGE_SIZE>,
        frame: usize,
        source: PageSource,
    ) -> Result<()> {
        match source {
            PageSource::Swap { slot } => self.read_in(slot, frame),
            PageSource::Image { section, page } => {
                let mut contents = Box::new([0; PAGE_SIZE]);
                space.image().load_page(section, page, &mut contents[..])?;
                self.memory.write_frame(frame, &contents)?;
                Ok(())
            }
            PageSource::ZeroFill => self.zero_fill(frame),
        }
    }

    /// Pin the frame behind `vpn`, faulting the page in first if needed.
    fn pin_resident(
        &self,
        space: &AddressSpace<PAGE_SIZE>,
        vpn: usize,
        write: bool,
    ) -> Result<usize> {
        let mut inner = self.inner.lock();
        loop {
            // The lock was dropped during any page-in, so look again.
            let resident = {
                let table = space.table.lock();
                if table.is_torn_down() {
                    return Err(VmError::UnknownProcess(space.pid()));
                }
                table.get(vpn).filter(|e| e.valid)
            };
            if let Some(entry) = resident {
                if write && entry.read_only {
                    return Err(VmError::ReadOnly { vpn });
                }
                inner.frames.pin(entry.ppn);
                return Ok(entry.ppn);
            }
            self.fault_locked(&mut inner, space, vpn)?;
        }
    }

    /// Copy `len` bytes at `vaddr` page by page, each page pinned for the
    /// length of its copy. Stops at the first failure; returns it only if
    /// nothing was transferred.
    fn transfer<F>(&self, pid: Pid, vaddr: usize, len: usize, write: bool, mut copy: F) -> Result<usize>
    where
        F: FnMut(usize, Range<usize>) -> Result<()>,
    {
        let space = self.address_space(pid)?;
        let limit = space.limit();
        let mut done = 0;
        while done < len {
            let addr = match vaddr.checked_add(done) {
                Some(addr) if addr < limit => addr,
                _ if done == 0 => return Err(VmError::InvalidAddress { vaddr }),
                _ => break,
            };
            let vpn = addr / PAGE_SIZE;
            let offset = addr % PAGE_SIZE;
            let amount = (len - done).min(PAGE_SIZE - offset);

            let ppn = match self.pin_resident(&space, vpn, write) {
                Ok(ppn) => ppn,
                Err(err) if done == 0 => return Err(err),
                Err(err) => {
                    debug!("Process {} transfer stopped at {:#x}: {}", pid, addr, err);
                    break;
                }
            };
            let copied = copy(ppn * PAGE_SIZE + offset, done..done + amount);
            if copied.is_ok() {
                let mut table = space.table.lock();
                let entry = table.entry_mut(vpn);
                entry.used = true;
                if write {
                    entry.dirty = true;
                }
            }
            self.unpin(ppn);
            copied?;
            done += amount;
        }
        Ok(done)
    }

    /// Read from `pid`'s virtual memory, faulting pages in as needed.
    /// Returns the number of bytes read, which is short if the range runs
    /// off the end of the address space.
    pub fn read_virtual(&self, pid: Pid, vaddr: usize, buf: &mut [u8]) -> Result<usize> {
        let memory = &self.memory;
        self.transfer(pid, vaddr, buf.len(), false, |paddr, range| {
            memory.read(paddr, &mut buf[range])?;
            Ok(())
        })
    }

    /// Write to `pid`'s virtual memory, faulting pages in as needed.
    /// Read-only pages are refused; every page written is marked dirty.
    pub fn write_virtual(&self, pid: Pid, vaddr: usize, data: &[u8]) -> Result<usize> {
        let memory = &self.memory;
        self.transfer(pid, vaddr, data.len(), true, |paddr, range| {
            memory.write(paddr, &data[range])?;
            Ok(())
        })
    }
}
