//! # Symmetric multiprocessing coordination
//!
//! Hardware-independent primitives for making several CPUs act together.
//!
//! * **Rendezvous** ([`Smp::rendezvous_cpus`]) runs a setup/action/teardown
//!   triple on a CPU set with barriers between the phases. This is what TLB
//!   shootdowns and global state flips are built on.
//! * **Stop/restart** ([`Smp::stop_cpus`], [`Smp::restart_cpus`]) parks a
//!   CPU set in a spin loop and lets it go again, for panics and debugger
//!   entry.
//! * **Topology** ([`CpuTopology`]) describes which CPUs share which caches,
//!   built once and read by the scheduler.
//!
//! ## Platform
//!
//! Sending IPIs, naming the current CPU and knowing when the application
//! processors run are the platform's job, behind [`Platform`]. The
//! platform's interrupt dispatch calls [`Smp::handle_ipi`] on the receiving
//! CPU.
//!
//! ```text
//! initiator                          target cpus
//! ─────────                          ───────────
//! lock session ─┐
//! queue session │ ──── send_ipi ───▶ handle_ipi(Rendezvous)
//! run own share │                      run session
//! wait for done │ ◀─── done counter ── leave handler
//! unlock       ─┘
//! ```
//!
//! ## Waiting
//!
//! Every wait is a spin on an atomic counter. Nothing here sleeps, so all
//! of it is usable with interrupts disabled and before the scheduler runs.
//! There are no timeouts on rendezvous barriers; the stop path has a
//! diagnostic spin cap that only logs.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod config;
mod cpuset;
mod platform;
mod rendezvous;
mod smp;
mod stop;
pub mod topology;

pub use config::{DEFAULT_STOP_SPIN_LIMIT, SmpConfig};
pub use cpuset::{AtomicCpuSet, CpuId, CpuSet, CpuSetError, CpuSetIter, MAX_CPUS};
pub use platform::{Ipi, Platform};
pub use rendezvous::{PhaseFn, Teardown};
pub use smp::{Smp, SmpInfo};
pub use stop::StopOutcome;
pub use topology::{
    CpuGroup, CpuGroupFlags, CpuTopology, GroupId, ShareLevel, TopologyBuilder, TopologyError,
    TopologyOverride,
};
