//! # Stopping and restarting CPUs
//!
//! A stopped CPU sits in its IPI handler, spinning on `started_cpus`:
//!
//! 1. sets its bit in `stopped_cpus`,
//! 2. spins until its bit shows up in `started_cpus`,
//! 3. clears its bit in `started_cpus`, then in `stopped_cpus`.
//!
//! The masks are plain atomics; there is no lock. Callers normally stop
//! [`Smp::other_cpus`], since a CPU cannot wait for itself to stop.

use crate::cpuset::{AtomicCpuSet, CpuId, CpuSet};
use crate::platform::{Ipi, Platform};
use crate::smp::Smp;
use core::sync::atomic::Ordering;
use kernel_sync::SpinLock;
use log::{debug, warn};

/// Result of a stop or restart request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub enum StopOutcome {
    /// SMP is not running; nothing was signalled.
    NotStarted,
    /// The request was carried out. After a stop this is best effort: a
    /// CPU that missed the diagnostic deadline is logged, not reported.
    Done,
}

pub(crate) struct StopState {
    /// CPUs parked in the stop handler.
    stopped: AtomicCpuSet,
    /// CPUs released by `restart_cpus` that have not left the handler.
    started: AtomicCpuSet,
    /// Stop requests not yet picked up.
    requested: AtomicCpuSet,
    /// Run once by the boot CPU on its way out of the next stop.
    restart_hook: SpinLock<Option<fn()>>,
}

impl StopState {
    pub(crate) const fn new() -> Self {
        Self {
            stopped: AtomicCpuSet::new(CpuSet::empty()),
            started: AtomicCpuSet::new(CpuSet::empty()),
            requested: AtomicCpuSet::new(CpuSet::empty()),
            restart_hook: SpinLock::new(None),
        }
    }
}

impl<P: Platform> Smp<P> {
    /// Parks every CPU in `map` other than the caller in its stop handler.
    ///
    /// Spins until all of them report stopped. With a
    /// [`stop_spin_limit`](crate::SmpConfig::stop_spin_limit) the wait gives
    /// up after that many spins, logs the CPUs that did not stop, and still
    /// returns [`StopOutcome::Done`].
    pub fn stop_cpus(&self, map: CpuSet) -> StopOutcome {
        self.generic_stop_cpus(map, Ipi::Stop)
    }

    /// [`stop_cpus`](Self::stop_cpus) delivered as a non-maskable IPI.
    pub fn stop_cpus_hard(&self, map: CpuSet) -> StopOutcome {
        self.generic_stop_cpus(map, Ipi::StopHard)
    }

    fn generic_stop_cpus(&self, map: CpuSet, ipi: Ipi) -> StopOutcome {
        if !self.is_started() {
            return StopOutcome::NotStarted;
        }
        // The caller cannot park itself while it waits for the others.
        let map = map - CpuSet::of(self.platform.current_cpu());
        debug!("stopping cpus {map} ({ipi:?})");

        if map.is_empty() {
            return StopOutcome::Done;
        }
        self.stop.requested.insert_all(map);
        self.platform.send_ipi(map, ipi);

        let mut spins: u64 = 0;
        loop {
            let missing = map - self.stop.stopped.load(Ordering::Acquire);
            if missing.is_empty() {
                break;
            }
            self.platform.cpu_spinwait();
            spins += 1;
            if self.config.stop_spin_limit.is_some_and(|limit| spins >= limit) {
                warn!("timeout stopping cpus: {missing} still running after {spins} spins");
                break;
            }
        }
        StopOutcome::Done
    }

    /// Releases every stopped CPU in `map` and waits until each has left
    /// its stop handler.
    ///
    /// Writes made before the call are visible to the released CPUs.
    pub fn restart_cpus(&self, map: CpuSet) -> StopOutcome {
        if !self.is_started() {
            return StopOutcome::NotStarted;
        }
        debug!("restarting cpus {map}");

        self.stop.started.store(map, Ordering::Release);
        while self.stop.stopped.load(Ordering::Acquire).overlaps(map) {
            self.platform.cpu_spinwait();
        }
        StopOutcome::Done
    }

    /// CPUs currently parked in the stop handler.
    #[must_use]
    pub fn stopped_cpus(&self) -> CpuSet {
        self.stop.stopped.load(Ordering::Acquire)
    }

    /// Registers `hook` to run once on the boot CPU as it next restarts.
    pub fn set_restart_hook(&self, hook: fn()) {
        *self.stop.restart_hook.lock() = Some(hook);
    }

    pub(crate) fn take_stop_request(&self, cpu: CpuId) {
        if self.stop.requested.take(cpu) {
            self.cpustop_handler(cpu);
        }
    }

    fn cpustop_handler(&self, cpu: CpuId) {
        self.stop.stopped.set(cpu);

        while !self.stop.started.contains(cpu, Ordering::Acquire) {
            self.platform.cpu_spinwait();
        }

        self.stop.started.clear(cpu);
        self.stop.stopped.clear(cpu);

        if cpu == CpuId::BOOT {
            let hook = self.stop.restart_hook.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
    }
}
