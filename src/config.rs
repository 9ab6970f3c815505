use std::{env, path::PathBuf};

use thiserror::Error;

pub const DEFAULT_NUM_FRAMES: usize = 16;
pub const DEFAULT_STACK_PAGES: usize = 8;
pub const DEFAULT_SWAP_FILE: &str = "SWAP_FILE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}={value:?} is not a valid count")]
    InvalidCount { name: &'static str, value: String },
}

/// Boot-time parameters of the memory manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Physical frames available to user pages.
    pub num_frames: usize,
    pub swap_path: PathBuf,
    /// Stack pages placed after the executable image of every process.
    pub stack_pages: usize,
    /// Upper bound on swap slots; `None` lets the swap file grow freely.
    pub swap_slots: Option<usize>,
    /// Delete the swap file when the manager is dropped.
    pub remove_swap_on_drop: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            num_frames: DEFAULT_NUM_FRAMES,
            swap_path: PathBuf::from(DEFAULT_SWAP_FILE),
            stack_pages: DEFAULT_STACK_PAGES,
            swap_slots: None,
            remove_swap_on_drop: true,
        }
    }
}

fn count_from_env(name: &'static str) -> Result<Option<usize>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidCount { name, value }),
        Err(_) => Ok(None),
    }
}

impl VmConfig {
    /// Defaults overlaid with `VM_NUM_FRAMES`, `VM_SWAP_FILE`,
    /// `VM_STACK_PAGES` and `VM_SWAP_SLOTS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(frames) = count_from_env("VM_NUM_FRAMES")? {
            config.num_frames = frames;
        }
        if let Some(stack) = count_from_env("VM_STACK_PAGES")? {
            config.stack_pages = stack;
        }
        if let Some(slots) = count_from_env("VM_SWAP_SLOTS")? {
            config.swap_slots = Some(slots);
        }
        if let Some(path) = env::var_os("VM_SWAP_FILE") {
            config.swap_path = PathBuf::from(path);
        }
        Ok(config)
    }

    pub fn with_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn with_swap_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.swap_path = path.into();
        self
    }

    pub fn with_stack_pages(mut self, stack_pages: usize) -> Self {
        self.stack_pages = stack_pages;
        self
    }

    pub fn with_swap_slots(mut self, swap_slots: usize) -> Self {
        self.swap_slots = Some(swap_slots);
        self
    }

    pub fn keep_swap_file(mut self) -> Self {
        self.remove_swap_on_drop = false;
        self
    }
}
