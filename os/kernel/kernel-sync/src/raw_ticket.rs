use crate::RawLock;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering};

/// Ticket spinlock.
///
/// Every acquirer draws a ticket from `next` and spins until `serving`
/// reaches it; unlocking advances `serving`. Waiters are admitted in the
/// order they arrived.
pub struct RawTicket {
    next: AtomicU32,
    serving: AtomicU32,
}

impl Default for RawTicket {
    fn default() -> Self {
        Self::new()
    }
}

impl RawTicket {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
            serving: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn lock(&self) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            spin_loop();
        }
    }

    /// Claims the lock only if nobody holds or waits for it.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let serving = self.serving.load(Ordering::Relaxed);
        self.next
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        let t = self.serving.load(Ordering::Relaxed);
        self.serving.store(t.wrapping_add(1), Ordering::Release);
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.next.load(Ordering::Relaxed) != self.serving.load(Ordering::Relaxed)
    }
}

unsafe impl RawLock for RawTicket {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }

    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }

    fn raw_is_locked(&self) -> bool {
        self.is_locked()
    }
}
