use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    image::Executable,
    translation::{PageTable, TranslationEntry},
    Pid,
};

/// How a process's image pages reach memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Every image page is faulted in when the address space is created.
    Eager,
    /// Nothing is resident until first touched.
    #[default]
    DemandPaged,
}

/// A process's private view of memory: its translation table and the image
/// its pages come from.
///
/// The table lock is always taken after the manager's global lock, never
/// before it.
pub struct AddressSpace<const PAGE_SIZE: usize> {
    pid: Pid,
    num_pages: usize,
    policy: LoadPolicy,
    image: Arc<dyn Executable>,
    pub(crate) table: Mutex<PageTable>,
}

impl<const PAGE_SIZE: usize> AddressSpace<PAGE_SIZE> {
    pub(crate) fn new(
        pid: Pid,
        image: Arc<dyn Executable>,
        num_pages: usize,
        policy: LoadPolicy,
    ) -> Self {
        AddressSpace {
            pid,
            num_pages,
            policy,
            image,
            table: Mutex::new(PageTable::new(num_pages)),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// One past the highest valid virtual address.
    pub fn limit(&self) -> usize {
        self.num_pages() * PAGE_SIZE
    }

    pub fn image(&self) -> &Arc<dyn Executable> {
        &self.image
    }

    /// A copy of the entry for `vpn`.
    pub fn translation(&self, vpn: usize) -> Option<TranslationEntry> {
        self.table.lock().get(vpn)
    }

    pub fn resident_pages(&self) -> usize {
        self.table.lock().resident().count()
    }

    pub(crate) fn is_read_only(&self, vpn: usize) -> bool {
        self.image
            .locate(vpn)
            .map_or(false, |(_, section)| section.read_only)
    }
}
