#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tempfile::TempDir;
use vm_kernel::{Executable, ImageError, MemoryManager, Pid, Section, VmConfig};

pub const PAGE: usize = 64;

pub type Manager = MemoryManager<PAGE>;

/// A manager whose swap file lives in a scratch directory. The manager is
/// dropped before the directory.
pub struct Harness {
    pub mm: Arc<Manager>,
    _dir: TempDir,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn boot(config: VmConfig) -> Harness {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = config.with_swap_path(dir.path().join("swap"));
    Harness {
        mm: Arc::new(Manager::boot(config).unwrap()),
        _dir: dir,
    }
}

pub fn boot_frames(frames: usize) -> Harness {
    boot(VmConfig::default().with_frames(frames))
}

pub fn page_of(byte: u8) -> Vec<u8> {
    vec![byte; PAGE]
}

/// Every owned frame maps back to a valid entry naming it, and every valid
/// entry of the given processes is owned by exactly one frame.
pub fn check_invariants(mm: &Manager, pids: &[Pid]) {
    let mut owned = HashSet::new();
    for (frame, entry) in mm.frame_snapshot().iter().enumerate() {
        if let Some(owner) = entry.owner {
            let te = mm
                .translation(owner.pid, owner.vpn)
                .expect("frame owner has no translation table");
            assert!(te.valid, "frame {} owned by invalid {:?}", frame, owner);
            assert_eq!(te.ppn, frame, "{:?} points elsewhere", owner);
            assert!(owned.insert((owner.pid, owner.vpn)), "{:?} owns two frames", owner);
        }
    }
    for &pid in pids {
        let space = mm.address_space(pid).unwrap();
        for vpn in 0..space.num_pages() {
            let te = space.translation(vpn).unwrap();
            if te.valid {
                assert!(owned.contains(&(pid, vpn)), "({}, {}) valid but unowned", pid, vpn);
            }
        }
    }
}

/// An image that counts, and optionally slows down, page loads.
pub struct CountingImage {
    sections: Vec<Section>,
    pub loads: AtomicUsize,
    delay: Duration,
}

impl CountingImage {
    pub fn new(pages: usize, delay: Duration) -> Arc<Self> {
        Arc::new(CountingImage {
            sections: vec![Section {
                name: String::from(".text"),
                first_vpn: 0,
                num_pages: pages,
                read_only: false,
            }],
            loads: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Executable for CountingImage {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn load_page(&self, _section: usize, page: usize, frame: &mut [u8]) -> Result<(), ImageError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        frame.fill(page as u8 + 1);
        Ok(())
    }
}
