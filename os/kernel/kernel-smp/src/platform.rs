//! The machine-dependent layer the SMP core is built on.

use crate::cpuset::{CpuId, CpuSet};
use crate::topology::{CpuTopology, TopologyBuilder};

/// Interprocessor interrupt kinds the SMP core sends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Ipi {
    /// Run pending rendezvous sessions.
    Rendezvous,
    /// Park in the stop handler; delivered as a regular interrupt.
    Stop,
    /// Park in the stop handler; delivered as an NMI where available.
    StopHard,
}

/// Hooks into interrupt delivery and CPU identification.
///
/// The interrupt dispatch code of the platform is expected to call
/// [`Smp::handle_ipi`](crate::Smp::handle_ipi) on the receiving CPU for
/// every IPI sent through [`send_ipi`](Self::send_ipi).
pub trait Platform: Sync {
    /// CPUs found by the platform probe, including the boot CPU.
    fn present_cpus(&self) -> CpuSet;

    /// Whether the application processors have been released.
    ///
    /// Until this returns `true` every rendezvous runs inline on the caller.
    fn smp_started(&self) -> bool;

    /// The CPU executing the call.
    fn current_cpu(&self) -> CpuId;

    /// Asynchronously interrupts every CPU in `targets`.
    ///
    /// Fire-and-forget. Delivery is confirmed through the barrier counters,
    /// never through a return value.
    fn send_ipi(&self, targets: CpuSet, ipi: Ipi);

    /// Pause hint used inside every busy-wait.
    #[inline]
    fn cpu_spinwait(&self) {
        core::hint::spin_loop();
    }

    /// Machine-dependent cache topology, if the platform knows it.
    fn cpu_topology(&self, builder: &TopologyBuilder) -> Option<CpuTopology> {
        let _ = builder;
        None
    }
}
