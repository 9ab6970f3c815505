use std::{mem::size_of, sync::Arc};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{
    address_space::{AddressSpace, LoadPolicy},
    error::{Result, VmError},
    image::Executable,
    manager::{MemoryManager, Teardown},
    Pid,
};

const POINTER_SIZE: usize = size_of::<u32>();

/// A user process as seen from memory management: an address space built
/// from an executable, with its arguments laid out in the top page.
pub struct Process<const PAGE_SIZE: usize> {
    pid: Pid,
    mm: Arc<MemoryManager<PAGE_SIZE>>,
    space: Arc<AddressSpace<PAGE_SIZE>>,
    argc: usize,
    argv: usize,
    initial_sp: usize,
    exit_status: Mutex<Option<i32>>,
}

/// Bytes needed for `argv`: the pointer array with its null terminator,
/// then every string with its NUL.
fn args_size(args: &[&str]) -> usize {
    (args.len() + 1) * POINTER_SIZE + args.iter().map(|a| a.len() + 1).sum::<usize>()
}

fn layout_args(args: &[&str], argv: usize) -> Vec<u8> {
    let mut block = Vec::with_capacity(args_size(args));
    let mut string_at = argv + (args.len() + 1) * POINTER_SIZE;
    for arg in args {
        block.extend_from_slice(&(string_at as u32).to_le_bytes());
        string_at += arg.len() + 1;
    }
    block.extend_from_slice(&0u32.to_le_bytes());
    for arg in args {
        block.extend_from_slice(arg.as_bytes());
        block.push(0);
    }
    block
}

impl<const PAGE_SIZE: usize> Process<PAGE_SIZE> {
    /// Build `pid`'s address space from `image`: the image pages, then the
    /// configured stack, then one page holding the arguments.
    pub fn load(
        mm: &Arc<MemoryManager<PAGE_SIZE>>,
        pid: Pid,
        image: Arc<dyn Executable>,
        args: &[&str],
        policy: LoadPolicy,
    ) -> Result<Self> {
        let mut image_pages = 0;
        for (index, section) in image.sections().iter().enumerate() {
            if section.first_vpn != image_pages {
                return Err(VmError::FragmentedExecutable { section: index });
            }
            debug!(
                "Process {} section {} ({} pages{})",
                pid,
                section.name,
                section.num_pages,
                if section.read_only { ", read-only" } else { "" }
            );
            image_pages += section.num_pages;
        }

        let size = args_size(args);
        if size > PAGE_SIZE {
            return Err(VmError::ArgumentsTooLarge { size });
        }

        let num_pages = image_pages + mm.config().stack_pages + 1;
        let argv = (num_pages - 1) * PAGE_SIZE;
        let space = mm.create_address_space(pid, image, num_pages, policy)?;

        let block = layout_args(args, argv);
        let written = match mm.write_virtual(pid, argv, &block) {
            Ok(written) if written == block.len() => Ok(()),
            Ok(_) => Err(VmError::InvalidAddress { vaddr: argv }),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            if let Err(cleanup) = mm.destroy_address_space(pid) {
                warn!("Process {} teardown after failed load: {}", pid, cleanup);
            }
            return Err(err);
        }

        info!("Process {} loaded: {} pages, argc {}", pid, num_pages, args.len());
        Ok(Process {
            pid,
            mm: Arc::clone(mm),
            space,
            argc: args.len(),
            argv,
            initial_sp: argv,
            exit_status: Mutex::new(None),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    pub fn argv(&self) -> usize {
        self.argv
    }

    /// The stack grows down from just below the argument page.
    pub fn initial_sp(&self) -> usize {
        self.initial_sp
    }

    pub fn address_space(&self) -> &Arc<AddressSpace<PAGE_SIZE>> {
        &self.space
    }

    /// Page-fault exception entry. A fault that cannot be resolved kills the
    /// process; returns whether it may keep running.
    pub fn handle_page_fault(&self, vaddr: usize) -> bool {
        match self.mm.resolve_fault(self.pid, vaddr) {
            Ok(_) => true,
            Err(err) => {
                warn!("Process {} killed by fault at {:#x}: {}", self.pid, vaddr, err);
                self.exit(err.exit_status());
                false
            }
        }
    }

    pub fn read_virtual(&self, vaddr: usize, buf: &mut [u8]) -> Result<usize> {
        self.mm.read_virtual(self.pid, vaddr, buf)
    }

    pub fn write_virtual(&self, vaddr: usize, data: &[u8]) -> Result<usize> {
        self.mm.write_virtual(self.pid, vaddr, data)
    }

    /// Read a NUL-terminated string of at most `max_len` bytes.
    pub fn read_string(&self, vaddr: usize, max_len: usize) -> Result<Option<String>> {
        let mut buf = vec![0; max_len + 1];
        let read = self.read_virtual(vaddr, &mut buf)?;
        Ok(buf[..read]
            .iter()
            .position(|&b| b == 0)
            .map(|end| String::from_utf8_lossy(&buf[..end]).into_owned()))
    }

    /// Release the address space and record `status`. Only the first call
    /// does anything.
    pub fn exit(&self, status: i32) -> Option<Teardown> {
        let mut exit_status = self.exit_status.lock();
        if exit_status.is_some() {
            return None;
        }
        *exit_status = Some(status);
        info!("Process {} exiting with status {}", self.pid, status);
        match self.mm.destroy_address_space(self.pid) {
            Ok(teardown) => Some(teardown),
            Err(err) => {
                warn!("Process {} teardown failed: {}", self.pid, err);
                None
            }
        }
    }

    pub fn exit_status(&self) -> Option<i32> {
        *self.exit_status.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_block_layout() {
        let block = layout_args(&["ls", "-l"], 0x100);
        assert_eq!(block.len(), args_size(&["ls", "-l"]));
        assert_eq!(&block[0..4], &0x10cu32.to_le_bytes());
        assert_eq!(&block[4..8], &0x10fu32.to_le_bytes());
        assert_eq!(&block[8..12], &[0; 4]);
        assert_eq!(&block[12..], b"ls\0-l\0");
    }

    #[test]
    fn no_args_is_just_the_terminator() {
        assert_eq!(layout_args(&[], 0x40), vec![0; 4]);
    }
}
