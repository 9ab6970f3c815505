use std::collections::{HashMap, HashSet};

/// Maps one virtual page of a process onto a physical frame.
///
/// `ppn` is only meaningful while `valid` is set; an evicted page keeps its
/// stale frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: usize,
    pub ppn: usize,
    pub valid: bool,
    pub read_only: bool,
    pub used: bool,
    pub dirty: bool,
}

impl TranslationEntry {
    pub fn invalid(vpn: usize) -> Self {
        TranslationEntry {
            vpn,
            ppn: 0,
            valid: false,
            read_only: false,
            used: false,
            dirty: false,
        }
    }
}

/// Per-process translation array plus the bookkeeping that lives next to it:
/// which pages have a copy in swap, and which are being paged in right now.
#[derive(Debug)]
pub(crate) struct PageTable {
    entries: Vec<TranslationEntry>,
    swap: HashMap<usize, usize>,
    loading: HashSet<usize>,
    torn_down: bool,
}

impl PageTable {
    pub(crate) fn new(num_pages: usize) -> Self {
        PageTable {
            entries: (0..num_pages).map(TranslationEntry::invalid).collect(),
            swap: HashMap::new(),
            loading: HashSet::new(),
            torn_down: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Panics on a vpn outside the table; callers range-check first.
    pub(crate) fn entry(&self, vpn: usize) -> &TranslationEntry {
        &self.entries[vpn]
    }

    pub(crate) fn entry_mut(&mut self, vpn: usize) -> &mut TranslationEntry {
        &mut self.entries[vpn]
    }

    pub(crate) fn get(&self, vpn: usize) -> Option<TranslationEntry> {
        self.entries.get(vpn).copied()
    }

    /// `(vpn, ppn)` of every resident page.
    pub(crate) fn resident(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries
            .iter()
            .filter(|e| e.valid)
            .map(|e| (e.vpn, e.ppn))
    }

    pub(crate) fn swap_slot(&self, vpn: usize) -> Option<usize> {
        self.swap.get(&vpn).copied()
    }

    pub(crate) fn set_swap_slot(&mut self, vpn: usize, slot: usize) {
        let previous = self.swap.insert(vpn, slot);
        debug_assert!(previous.is_none() || previous == Some(slot));
    }

    pub(crate) fn take_swap_slots(&mut self) -> Vec<usize> {
        self.swap.drain().map(|(_, slot)| slot).collect()
    }

    pub(crate) fn is_loading(&self, vpn: usize) -> bool {
        self.loading.contains(&vpn)
    }

    pub(crate) fn begin_loading(&mut self, vpn: usize) {
        self.loading.insert(vpn);
    }

    pub(crate) fn finish_loading(&mut self, vpn: usize) {
        self.loading.remove(&vpn);
    }

    pub(crate) fn any_loading(&self) -> bool {
        !self.loading.is_empty()
    }

    /// No page may be faulted in or pinned once this is set.
    pub(crate) fn tear_down(&mut self) {
        self.torn_down = true;
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_all_invalid() {
        let table = PageTable::new(8);
        assert_eq!(table.len(), 8);
        for vpn in 0..8 {
            assert_eq!(*table.entry(vpn), TranslationEntry::invalid(vpn));
        }
        assert_eq!(table.resident().count(), 0);
        assert_eq!(table.get(8), None);
    }

    #[test]
    fn resident_lists_valid_pages() {
        let mut table = PageTable::new(4);
        let entry = table.entry_mut(2);
        entry.ppn = 7;
        entry.valid = true;
        table.entry_mut(3).ppn = 1;
        assert_eq!(table.resident().collect::<Vec<_>>(), vec![(2, 7)]);
    }

    #[test]
    fn swap_slots_are_drained_once() {
        let mut table = PageTable::new(4);
        table.set_swap_slot(0, 5);
        table.set_swap_slot(3, 2);
        table.set_swap_slot(3, 2);
        assert_eq!(table.swap_slot(3), Some(2));
        let mut slots = table.take_swap_slots();
        slots.sort();
        assert_eq!(slots, vec![2, 5]);
        assert!(table.take_swap_slots().is_empty());
        assert_eq!(table.swap_slot(0), None);
    }

    #[test]
    fn loading_marks() {
        let mut table = PageTable::new(2);
        assert!(!table.any_loading());
        table.begin_loading(1);
        assert!(table.is_loading(1));
        assert!(!table.is_loading(0));
        assert!(table.any_loading());
        table.finish_loading(1);
        assert!(!table.any_loading());
    }

    #[test]
    fn tear_down_sticks() {
        let mut table = PageTable::new(1);
        assert!(!table.is_torn_down());
        table.tear_down();
        assert!(table.is_torn_down());
    }
}
