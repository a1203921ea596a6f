//! Process-wide allocator configuration.
//!
//! The configuration picks how page memory is obtained from the OS. It can
//! only change before the first page is allocated: after that, pages in
//! flight must be released the same way they were obtained, so the value
//! is frozen.

use std::sync::atomic::{AtomicU8, Ordering};

const DISABLE_MMAP: u8 = 1 << 0;
const POPULATE: u8 = 1 << 1;
const NO_RESERVE: u8 = 1 << 2;
const FROZEN: u8 = 1 << 7;

/// How page memory is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Take pages from the global Rust allocator instead of `mmap`.
    pub disable_mmap: bool,
    /// Prefault mapped pages.
    pub populate: bool,
    /// Do not reserve swap for mapped pages.
    pub no_reserve: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            disable_mmap: false,
            populate: true,
            no_reserve: true,
        }
    }
}

impl AllocatorConfig {
    const fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.disable_mmap {
            bits |= DISABLE_MMAP;
        }
        if self.populate {
            bits |= POPULATE;
        }
        if self.no_reserve {
            bits |= NO_RESERVE;
        }
        bits
    }

    const fn from_bits(bits: u8) -> Self {
        Self {
            disable_mmap: bits & DISABLE_MMAP != 0,
            populate: bits & POPULATE != 0,
            no_reserve: bits & NO_RESERVE != 0,
        }
    }
}

static CONFIG: AtomicU8 = AtomicU8::new(POPULATE | NO_RESERVE);

/// Install `config` for the whole process.
///
/// Returns `false`, leaving the current configuration in place, once any
/// page has been allocated.
pub fn set_allocator_config(config: AllocatorConfig) -> bool {
    let mut current = CONFIG.load(Ordering::Acquire);
    loop {
        if current & FROZEN != 0 {
            return false;
        }
        match CONFIG.compare_exchange_weak(
            current,
            config.to_bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
}

/// The configuration currently in effect.
pub fn allocator_config() -> AllocatorConfig {
    AllocatorConfig::from_bits(CONFIG.load(Ordering::Acquire))
}

/// Freeze the configuration and return it.
pub(crate) fn freeze_allocator_config() -> AllocatorConfig {
    AllocatorConfig::from_bits(CONFIG.fetch_or(FROZEN, Ordering::AcqRel))
}
