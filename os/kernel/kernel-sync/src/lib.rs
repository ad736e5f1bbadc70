//! # Kernel synchronization primitives
//!
//! The memory manager is shared by every core and guarded by one coarse lock.
//! This crate provides that lock ([`TicketMutex`], FIFO hand-off through a
//! ticket counter), the IRQ masking that must accompany it on the local core
//! ([`IrqGuard`]), and a once-cell for publishing boot-initialized globals.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_ticket;
mod sync_once_cell;

pub use irq::{IrqGuard, IrqMutexGuard};
pub use mutex::{Mutex, MutexGuard};
pub use raw_ticket::RawTicket;
pub use sync_once_cell::SyncOnceCell;

pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

/// A raw mutual-exclusion primitive without associated data.
///
/// # Safety
/// Implementations must guarantee that between a successful `raw_lock` or
/// `raw_try_lock` and the matching `raw_unlock`, no other caller's lock
/// attempt succeeds.
pub unsafe trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;

    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn raw_unlock(&self);

    fn raw_is_locked(&self) -> bool;
}
