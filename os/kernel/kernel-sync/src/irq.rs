use crate::{Mutex, MutexGuard, RawLock};

/// A mutex guard that also masks IRQs on the local core while held.
///
/// Created via [`Mutex::lock_irq`], it
///
/// 1. saves the current IRQ mask and masks IRQs, then
/// 2. acquires the underlying mutex,
///
/// and releases them in reverse order on drop. An interrupt handler on the
/// same core can therefore never spin on a lock its own core already holds.
///
/// # Examples
///
/// ```
/// use kernel_sync::TicketMutex;
///
/// static M: TicketMutex<u64> = TicketMutex::new(0);
///
/// {
///     let mut g = M.lock_irq();
///     *g += 1;
/// }
/// assert_eq!(*M.lock(), 1);
/// ```
pub struct IrqMutexGuard<'a, T, R: RawLock> {
    // Field order matters: the mutex is released before IRQs are restored.
    guard: MutexGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock> Mutex<T, R> {
    /// Acquires the mutex with IRQs masked for the guard's lifetime.
    #[inline]
    pub fn lock_irq(&self) -> IrqMutexGuard<'_, T, R> {
        let irq = IrqGuard::new();
        let guard = self.lock();
        IrqMutexGuard { guard, _irq: irq }
    }
}

impl<T, R: RawLock> core::ops::Deref for IrqMutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, R: RawLock> core::ops::DerefMut for IrqMutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// RAII guard that masks IRQs on creation and restores the previous mask on drop.
///
/// On bare-metal AArch64 this snapshots `DAIF` and sets the I bit
/// (`msr daifset, #2`); dropping the guard unmasks IRQs only if they were
/// unmasked before. Elsewhere (host builds, unit tests) it is a no-op, since
/// EL0 may not touch `DAIF`.
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = arch::irqs_enabled();
        if enabled {
            arch::mask_irqs();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            arch::unmask_irqs();
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod arch {
    /// `DAIF.I`, the IRQ mask bit.
    const DAIF_I: u64 = 1 << 7;

    #[inline]
    pub fn irqs_enabled() -> bool {
        let daif: u64;
        unsafe { core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack, preserves_flags)) }
        daif & DAIF_I == 0
    }

    #[inline]
    pub fn mask_irqs() {
        unsafe { core::arch::asm!("msr daifset, #2", options(nostack, preserves_flags)) }
    }

    #[inline]
    pub fn unmask_irqs() {
        unsafe { core::arch::asm!("msr daifclr, #2", options(nostack, preserves_flags)) }
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
mod arch {
    #[inline]
    pub const fn irqs_enabled() -> bool {
        false
    }

    #[inline]
    pub const fn mask_irqs() {}

    #[inline]
    pub const fn unmask_irqs() {}
}
