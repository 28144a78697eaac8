//! # Kernel synchronization primitives
//!
//! Busy-wait building blocks for code that must not sleep: interrupt
//! handlers, pre-scheduler boot, and cross-CPU coordination.
//!
//! * [`SpinLock`]: test-and-test-and-set lock with an RAII guard. The
//!   [`SpinLock::lock_with`] variant runs a relax hook on every contended
//!   iteration, which lets a waiting CPU service its own interrupts.
//! * [`SpinBarrier`]: resettable arrival counter that participants bump
//!   and then spin on until it reaches an expected total.
//! * [`SyncOnceCell`]: one-time initialization for data that is built
//!   once and read forever after.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_barrier;
mod spin_lock;
mod sync_once_cell;

pub use spin_barrier::SpinBarrier;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
