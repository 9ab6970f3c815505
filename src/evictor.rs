use log::{debug, warn};

use crate::{
    error::{Result, VmError},
    manager::{Inner, MemoryManager},
};

/// The clock hand: one cursor over the frame index space shared by every
/// process, so eviction pressure rotates across all of them.
#[derive(Debug, Default)]
pub(crate) struct Clock {
    hand: usize,
}

impl Clock {
    /// Return the frame under the hand and move the hand past it.
    pub(crate) fn advance(&mut self, frames: usize) -> usize {
        let current = self.hand % frames;
        self.hand = (current + 1) % frames;
        current
    }
}

impl<const PAGE_SIZE: usize> MemoryManager<PAGE_SIZE> {
    /// Second-chance sweep. Must be called with the global lock held.
    ///
    /// Returns the reclaimed frame, now free; `None` if every candidate was
    /// pinned and the caller should wait for an unpin.
    pub(crate) fn evict_locked(&self, inner: &mut Inner<PAGE_SIZE>) -> Result<Option<usize>> {
        let frames = inner.frames.len();
        if frames == 0 {
            return Err(VmError::OutOfMemory);
        }

        let mut saw_pinned = false;
        let mut swap_starved = false;
        // Two revolutions: the first may only clear used bits.
        for _ in 0..2 * frames {
            let frame = inner.clock.advance(frames);
            let entry = inner.frames.entry(frame);
            if entry.is_pinned() {
                saw_pinned = true;
                continue;
            }
            let Some(owner) = entry.owner else {
                continue;
            };
            // Frames are only handed to registered processes, and teardown
            // clears every frame a process owns before unregistering it.
            let Some(space) = inner.space(owner.pid) else {
                unreachable!("frame {} owned by unregistered process {}", frame, owner.pid);
            };

            let mut table = space.table.lock();
            let page = *table.entry(owner.vpn);
            if !page.valid || page.ppn != frame {
                // Allocated outside a fault and never mapped.
                drop(table);
                debug!("Reclaiming unmapped frame {} from {:?}", frame, owner);
                inner.frames.clear(frame);
                return Ok(Some(frame));
            }
            if page.used {
                table.entry_mut(owner.vpn).used = false;
                continue;
            }

            if page.dirty {
                let slot = match table.swap_slot(owner.vpn) {
                    Some(slot) => slot,
                    None => match inner.slots.allocate() {
                        Some(slot) => {
                            table.set_swap_slot(owner.vpn, slot);
                            slot
                        }
                        None => {
                            swap_starved = true;
                            continue;
                        }
                    },
                };
                self.write_back(frame, slot)?;
                inner.stats.swap_writes += 1;
                debug!("Wrote {:?} from frame {} to swap slot {}", owner, frame, slot);
            }

            let evicted = table.entry_mut(owner.vpn);
            evicted.valid = false;
            evicted.dirty = false;
            drop(table);
            inner.frames.clear(frame);
            inner.stats.evictions += 1;
            debug!("Evicted {:?} from frame {}", owner, frame);
            return Ok(Some(frame));
        }

        if saw_pinned {
            return Ok(None);
        }
        if swap_starved {
            warn!("No swap slot for any dirty victim");
        }
        Err(VmError::OutOfMemory)
    }
}

#[cfg(test)]
mod tests {
    use super::Clock;

    #[test]
    fn clock_wraps() {
        let mut clock = Clock::default();
        let visited: Vec<_> = (0..7).map(|_| clock.advance(3)).collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }
}
