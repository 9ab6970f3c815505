use std::{collections::HashMap, sync::Arc};

use log::{debug, info, warn};
use memory::PhysicalMemory;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    address_space::{AddressSpace, LoadPolicy},
    config::VmConfig,
    error::{Result, VmError},
    evictor::Clock,
    frame_registry::{FrameEntry, FrameRegistry, Owner},
    image::Executable,
    swap::{SwapSlots, SwapStore},
    translation::TranslationEntry,
    Pid,
};

/// Counters kept under the global lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    pub faults: u64,
    pub evictions: u64,
    pub swap_writes: u64,
    pub swap_reads: u64,
    pub swap_slots_in_use: usize,
    pub swap_high_water: usize,
}

/// What `destroy_address_space` gave back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Teardown {
    pub frames_freed: usize,
    pub slots_freed: usize,
}

/// State guarded by the global lock.
pub(crate) struct Inner<const PAGE_SIZE: usize> {
    pub(crate) frames: FrameRegistry,
    pub(crate) slots: SwapSlots,
    pub(crate) clock: Clock,
    /// Live from `create_address_space` until `destroy_address_space`.
    pub(crate) processes: HashMap<Pid, Arc<AddressSpace<PAGE_SIZE>>>,
    pub(crate) stats: VmStats,
}

impl<const PAGE_SIZE: usize> Inner<PAGE_SIZE> {
    pub(crate) fn space(&self, pid: Pid) -> Option<Arc<AddressSpace<PAGE_SIZE>>> {
        self.processes.get(&pid).cloned()
    }
}

/// The kernel's demand-paging core: multiplexes a fixed pool of physical
/// frames over every registered address space.
///
/// One global lock covers the frame registry, the swap slot list, the clock
/// hand and the process registry. Page-in I/O runs with it released; the
/// frame being filled stays pinned for the duration.
pub struct MemoryManager<const PAGE_SIZE: usize> {
    config: VmConfig,
    pub(crate) inner: Mutex<Inner<PAGE_SIZE>>,
    /// Signalled whenever a frame is unpinned or released.
    pub(crate) frames_available: Condvar,
    /// Signalled whenever an in-flight page-in completes.
    pub(crate) page_ready: Condvar,
    pub(crate) memory: PhysicalMemory<PAGE_SIZE>,
    swap: SwapStore<PAGE_SIZE>,
}

impl<const PAGE_SIZE: usize> MemoryManager<PAGE_SIZE> {
    pub fn boot(config: VmConfig) -> Result<Self> {
        let swap = SwapStore::create(&config.swap_path)?;
        info!(
            "Booting memory manager: {} frames of {} bytes, swap at {}",
            config.num_frames,
            PAGE_SIZE,
            config.swap_path.display()
        );
        Ok(MemoryManager {
            inner: Mutex::new(Inner {
                frames: FrameRegistry::new(config.num_frames),
                slots: SwapSlots::new(config.swap_slots),
                clock: Clock::default(),
                processes: HashMap::new(),
                stats: VmStats::default(),
            }),
            frames_available: Condvar::new(),
            page_ready: Condvar::new(),
            memory: PhysicalMemory::new(config.num_frames),
            swap,
            config,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn physical_memory(&self) -> &PhysicalMemory<PAGE_SIZE> {
        &self.memory
    }

    /// Give a frame to `(pid, vpn)`, evicting if none is free.
    ///
    /// The frame is owned but backs no valid translation. `free_frame` or
    /// teardown releases it; failing that, the evictor reclaims it as
    /// unmapped once the hand finds it unpinned.
    pub fn allocate_frame(&self, pid: Pid, vpn: usize) -> Result<usize> {
        let mut inner = self.inner.lock();
        let space = inner.space(pid).ok_or(VmError::UnknownProcess(pid))?;
        if vpn >= space.num_pages() {
            return Err(VmError::InvalidAddress {
                vaddr: vpn * PAGE_SIZE,
            });
        }
        self.allocate_locked(&mut inner, Owner { pid, vpn })
    }

    /// Blocks, with the global lock released, while every frame is pinned.
    pub(crate) fn allocate_locked(
        &self,
        inner: &mut MutexGuard<'_, Inner<PAGE_SIZE>>,
        owner: Owner,
    ) -> Result<usize> {
        loop {
            if let Some(frame) = inner.frames.find_free() {
                inner.frames.assign(frame, owner);
                debug!("Frame {} -> {:?}", frame, owner);
                return Ok(frame);
            }
            if let Some(frame) = self.evict_locked(inner)? {
                inner.frames.assign(frame, owner);
                debug!("Frame {} -> {:?} (evicted)", frame, owner);
                return Ok(frame);
            }
            warn!("All {} frames pinned, {:?} waiting", inner.frames.len(), owner);
            self.frames_available.wait(inner);
        }
    }

    /// Release a frame. The caller guarantees nobody else has it pinned.
    pub fn free_frame(&self, frame: usize) {
        let mut inner = self.inner.lock();
        inner.frames.clear(frame);
        self.frames_available.notify_all();
    }

    pub fn pin(&self, frame: usize) {
        self.inner.lock().frames.pin(frame);
    }

    pub fn unpin(&self, frame: usize) {
        let mut inner = self.inner.lock();
        inner.frames.unpin(frame);
        self.frames_available.notify_all();
    }

    /// Evict one resident page and return its (now free) frame.
    pub fn evict(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(frame) = self.evict_locked(&mut inner)? {
                return Ok(frame);
            }
            self.frames_available.wait(&mut inner);
        }
    }

    pub fn alloc_swap_slot(&self) -> Result<usize> {
        self.inner.lock().slots.allocate().ok_or(VmError::SwapFull)
    }

    pub fn free_swap_slot(&self, slot: usize) {
        self.inner.lock().slots.deallocate(slot);
    }

    /// Copy a frame out to a swap slot.
    pub fn write_back(&self, frame: usize, slot: usize) -> Result<()> {
        let mut page = Box::new([0; PAGE_SIZE]);
        self.memory.read_frame(frame, &mut page)?;
        self.swap.write_page(slot, &page)?;
        Ok(())
    }

    /// Copy a swap slot into a frame.
    pub fn read_in(&self, slot: usize, frame: usize) -> Result<()> {
        let mut page = Box::new([0; PAGE_SIZE]);
        self.swap.read_page(slot, &mut page)?;
        self.memory.write_frame(frame, &page)?;
        Ok(())
    }

    pub fn zero_fill(&self, frame: usize) -> Result<()> {
        self.memory.zero_frame(frame)?;
        Ok(())
    }

    /// Register a fresh, fully invalid address space for `pid`.
    ///
    /// The space is widened to cover the whole image if `num_pages` is
    /// smaller. Under [`LoadPolicy::Eager`] every image page is faulted in
    /// before returning.
    pub fn create_address_space(
        &self,
        pid: Pid,
        image: Arc<dyn Executable>,
        num_pages: usize,
        policy: LoadPolicy,
    ) -> Result<Arc<AddressSpace<PAGE_SIZE>>> {
        let image_pages = image.num_pages();
        let space = Arc::new(AddressSpace::new(
            pid,
            image,
            num_pages.max(image_pages),
            policy,
        ));
        {
            let mut inner = self.inner.lock();
            if inner.space(pid).is_some() {
                return Err(VmError::DuplicateProcess(pid));
            }
            inner.processes.insert(pid, Arc::clone(&space));
        }
        info!(
            "Process {} address space: {} pages ({:?})",
            pid,
            space.num_pages(),
            policy
        );

        if policy == LoadPolicy::Eager {
            for vpn in 0..image_pages {
                if let Err(err) = self.fault_in(&space, vpn) {
                    warn!("Eager load of process {} failed at page {}: {}", pid, vpn, err);
                    if let Err(cleanup) = self.destroy_address_space(pid) {
                        warn!("Process {} teardown after failed load: {}", pid, cleanup);
                    }
                    return Err(err);
                }
            }
        }
        Ok(space)
    }

    /// Release every frame and swap slot `pid` owns and forget the process.
    ///
    /// Further faults on the space are refused at once; page-ins and pinned
    /// copies already under way are waited out.
    pub fn destroy_address_space(&self, pid: Pid) -> Result<Teardown> {
        let mut inner = self.inner.lock();
        let space = inner.space(pid).ok_or(VmError::UnknownProcess(pid))?;
        space.table.lock().tear_down();

        loop {
            let busy = space.table.lock().any_loading()
                || inner
                    .frames
                    .owned_by(pid)
                    .into_iter()
                    .any(|frame| inner.frames.is_pinned(frame));
            if !busy {
                break;
            }
            debug!("Process {} teardown waiting for pinned pages", pid);
            self.frames_available.wait(&mut inner);
        }

        let mut teardown = Teardown::default();
        {
            let mut table = space.table.lock();
            for vpn in 0..table.len() {
                table.entry_mut(vpn).valid = false;
            }
            for frame in inner.frames.owned_by(pid) {
                inner.frames.clear(frame);
                teardown.frames_freed += 1;
            }
            for slot in table.take_swap_slots() {
                inner.slots.deallocate(slot);
                teardown.slots_freed += 1;
            }
        }
        inner.processes.remove(&pid);
        self.frames_available.notify_all();
        info!(
            "Process {} torn down: {} frames, {} swap slots released",
            pid, teardown.frames_freed, teardown.slots_freed
        );
        Ok(teardown)
    }

    pub fn address_space(&self, pid: Pid) -> Result<Arc<AddressSpace<PAGE_SIZE>>> {
        self.inner
            .lock()
            .space(pid)
            .ok_or(VmError::UnknownProcess(pid))
    }

    pub fn translation(&self, pid: Pid, vpn: usize) -> Option<TranslationEntry> {
        self.inner.lock().space(pid)?.translation(vpn)
    }

    pub fn swap_slot(&self, pid: Pid, vpn: usize) -> Option<usize> {
        let space = self.inner.lock().space(pid)?;
        let slot = space.table.lock().swap_slot(vpn);
        slot
    }

    pub fn frame_snapshot(&self) -> Vec<FrameEntry> {
        self.inner.lock().frames.snapshot()
    }

    pub fn stats(&self) -> VmStats {
        let inner = self.inner.lock();
        VmStats {
            swap_slots_in_use: inner.slots.in_use(),
            swap_high_water: inner.slots.high_water(),
            ..inner.stats
        }
    }
}

impl<const PAGE_SIZE: usize> Drop for MemoryManager<PAGE_SIZE> {
    fn drop(&mut self) {
        if self.config.remove_swap_on_drop {
            if let Err(err) = self.swap.remove() {
                warn!("Could not remove swap file {}: {}", self.swap.path().display(), err);
            }
        }
    }
}
