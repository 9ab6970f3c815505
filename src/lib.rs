//! Demand-paged virtual memory for a small teaching kernel.
//!
//! A [`MemoryManager`] owns a fixed pool of physical frames and a swap file
//! and shares them across every registered [`AddressSpace`]. Pages are
//! brought in on first touch, from swap, from the process's executable
//! image, or zero-filled, and are reclaimed under pressure by a clock
//! (second-chance) sweep.

pub mod address_space;
pub mod config;
pub mod error;
pub mod fault;
pub mod frame_registry;
pub mod image;
pub mod manager;
pub mod process;
pub mod swap;
pub mod translation;

mod evictor;

pub use address_space::{AddressSpace, LoadPolicy};
pub use config::{ConfigError, VmConfig};
pub use error::{Result, VmError};
pub use fault::{Fault, PageSource};
pub use frame_registry::{FrameEntry, Owner};
pub use image::{Executable, ImageError, MemoryImage, Section};
pub use manager::{MemoryManager, Teardown, VmStats};
pub use process::Process;
pub use translation::TranslationEntry;

/// Page size of the kernel build.
pub const PAGE_SIZE: usize = 1024;

pub type Pid = u32;

/// The manager at the kernel's page size.
pub type Kernel = MemoryManager<PAGE_SIZE>;
