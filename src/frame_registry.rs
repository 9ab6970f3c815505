use crate::Pid;

/// The `(process, virtual page)` a frame currently backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    pub pid: Pid,
    pub vpn: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameEntry {
    pub owner: Option<Owner>,
    pub pin_count: u32,
}

impl FrameEntry {
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }
}

/// Inverted page table: one entry per physical frame naming its owner.
///
/// Only touched with the manager's global lock held.
#[derive(Debug)]
pub(crate) struct FrameRegistry {
    entries: Vec<FrameEntry>,
}

impl FrameRegistry {
    pub(crate) fn new(frames: usize) -> Self {
        FrameRegistry {
            entries: vec![FrameEntry::default(); frames],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entry(&self, frame: usize) -> FrameEntry {
        self.entries[frame]
    }

    /// Lowest-numbered free, unpinned frame.
    pub(crate) fn find_free(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.is_free() && !e.is_pinned())
    }

    pub(crate) fn assign(&mut self, frame: usize, owner: Owner) {
        let entry = &mut self.entries[frame];
        assert!(
            entry.is_free(),
            "frame {} handed to {:?} while owned by {:?}",
            frame,
            owner,
            entry.owner
        );
        entry.owner = Some(owner);
    }

    /// Release the frame, dropping any pins it still carries.
    pub(crate) fn clear(&mut self, frame: usize) -> Option<Owner> {
        let entry = &mut self.entries[frame];
        entry.pin_count = 0;
        entry.owner.take()
    }

    pub(crate) fn pin(&mut self, frame: usize) {
        self.entries[frame].pin_count += 1;
    }

    pub(crate) fn unpin(&mut self, frame: usize) {
        let entry = &mut self.entries[frame];
        if entry.pin_count == 0 {
            panic!("Frame {} is not pinned", frame);
        }
        entry.pin_count -= 1;
    }

    pub(crate) fn is_pinned(&self, frame: usize) -> bool {
        self.entries[frame].is_pinned()
    }

    pub(crate) fn owned_by(&self, pid: Pid) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.owner.map_or(false, |o| o.pid == pid))
            .map(|(frame, _)| frame)
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<FrameEntry> {
        self.entries.clone()
    }
}
