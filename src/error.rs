use disk::DiskError;
use memory::MemoryError;
use thiserror::Error;

use crate::{config::ConfigError, image::ImageError, Pid};

/// Exit status handed to a process killed by a memory fault.
pub const FAULT_EXIT_STATUS: i32 = -1;

pub type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Error)]
pub enum VmError {
    /// No frame could be produced, even by eviction.
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("swap space exhausted")]
    SwapFull,
    #[error("virtual address {vaddr:#x} is outside the address space")]
    InvalidAddress { vaddr: usize },
    #[error("page {vpn} is read-only")]
    ReadOnly { vpn: usize },
    #[error("process {0} has no address space")]
    UnknownProcess(Pid),
    #[error("process {0} already has an address space")]
    DuplicateProcess(Pid),
    #[error("section {section} is not contiguous with the previous one")]
    FragmentedExecutable { section: usize },
    #[error("arguments need {size} bytes, more than one page")]
    ArgumentsTooLarge { size: usize },
    #[error("executable image: {0}")]
    Image(#[from] ImageError),
    #[error("swap: {0}")]
    Swap(#[from] DiskError),
    #[error("physical memory: {0}")]
    Memory(#[from] MemoryError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

impl VmError {
    /// Status the faulting process exits with. Every memory failure is
    /// terminal for the process.
    pub fn exit_status(&self) -> i32 {
        FAULT_EXIT_STATUS
    }
}
