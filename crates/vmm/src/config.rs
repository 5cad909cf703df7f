//! Boot-time configuration of the virtual memory manager.

use crate::{
    VirtualAddress,
    layout::{PAGE_SIZE, USER_STACK_PAGES, USER_STACK_TOP},
};

/// Settings chosen by the kernel at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Address just above the highest byte of every user stack.
    pub stack_top: VirtualAddress,
    /// Number of pages in every user stack.
    pub stack_pages: usize,
}

impl VmConfig {
    /// The default layout: a 16-page stack ending at the base of the kernel segment.
    pub const DEFAULT: Self = Self {
        stack_top: VirtualAddress::new(USER_STACK_TOP),
        stack_pages: USER_STACK_PAGES,
    };
}

/// Returns the lowest address of a stack of `pages` pages ending at `stack_top`, or None
/// if it would extend below address zero.
pub(crate) fn stack_base(stack_top: VirtualAddress, pages: usize) -> Option<VirtualAddress> {
    let size = pages.checked_mul(PAGE_SIZE)?;
    let base = stack_top.as_usize().checked_sub(size)?;
    Some(VirtualAddress::new(base))
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(not(any(test, feature = "software-emulation")))]
static CONFIG: spin::Once<VmConfig> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static CONFIG: spin::Once<VmConfig> = spin::Once::new();
}

/// Initializes the virtual memory manager.
///
/// Must be called once during kernel initialization, before the first address space is
/// created.
///
/// # Panics
///
/// Panics if the manager has already been bootstrapped, or if the configured stack top is
/// not page-aligned or has no room for the configured stack below it.
pub fn bootstrap(config: VmConfig) {
    assert!(
        config.stack_top.is_aligned(PAGE_SIZE),
        "stack top {} is not page-aligned",
        config.stack_top
    );
    assert!(
        stack_base(config.stack_top, config.stack_pages).is_some(),
        "stack of {} pages does not fit below {}",
        config.stack_pages,
        config.stack_top
    );

    #[cfg(not(any(test, feature = "software-emulation")))]
    let already_set = CONFIG.get().is_some() || {
        CONFIG.call_once(|| config);
        false
    };

    #[cfg(any(test, feature = "software-emulation"))]
    let already_set = CONFIG.with(|c| {
        c.get().is_some() || {
            c.call_once(|| config);
            false
        }
    });

    if already_set {
        panic!("virtual memory manager already bootstrapped");
    }

    log::debug!(
        "vm bootstrapped: {} stack pages below {}",
        config.stack_pages,
        config.stack_top
    );
}

/// Returns the active configuration, or the defaults if [`bootstrap`] has not run.
pub fn config() -> VmConfig {
    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        CONFIG.get().copied().unwrap_or_default()
    }

    #[cfg(any(test, feature = "software-emulation"))]
    {
        CONFIG.with(|c| c.get().copied().unwrap_or_default())
    }
}
