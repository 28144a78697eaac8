use crate::config::SmpConfig;
use crate::cpuset::{CpuId, CpuSet, MAX_CPUS};
use crate::platform::{Ipi, Platform};
use crate::rendezvous::Participant;
use crate::stop::StopState;
use crate::topology::{CpuTopology, TopologyBuilder, TopologyOverride};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_sync::{SpinLock, SyncOnceCell};
use log::{debug, info};

pub(crate) type Mailbox = SpinLock<VecDeque<Arc<dyn Participant>>>;

/// Cross-CPU coordination for one machine.
///
/// A kernel keeps exactly one of these, typically in a `static` built right
/// after the platform probe, and routes every IPI it receives into
/// [`handle_ipi`](Self::handle_ipi).
pub struct Smp<P: Platform> {
    pub(crate) platform: P,
    pub(crate) config: SmpConfig,
    pub(crate) all_cpus: CpuSet,
    ncpus: usize,
    max_id: CpuId,
    /// Held for the whole of a rendezvous.
    pub(crate) session: SpinLock<()>,
    /// Sessions started so far; bumped under `session`.
    pub(crate) generation: AtomicU64,
    pub(crate) mailboxes: Box<[Mailbox]>,
    pub(crate) stop: StopState,
    topology: SyncOnceCell<CpuTopology>,
}

/// Read-only SMP state for diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SmpInfo {
    /// Number of active CPUs.
    pub ncpus: usize,
    /// Highest active CPU id.
    pub max_id: CpuId,
    /// Compile-time CPU limit.
    pub max_cpus: usize,
    pub disabled: bool,
    pub topology: TopologyOverride,
    pub started: bool,
}

impl fmt::Display for SmpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpus={} maxid={} maxcpus={} disabled={} topology={} started={}",
            self.ncpus,
            self.max_id.as_u32(),
            self.max_cpus,
            u8::from(self.disabled),
            self.topology,
            u8::from(self.started),
        )
    }
}

impl<P: Platform> Smp<P> {
    /// Probes the platform for CPUs. Must run on the boot CPU.
    pub fn new(platform: P, config: SmpConfig) -> Self {
        let boot = platform.current_cpu();
        let all_cpus = if config.disabled {
            CpuSet::of(boot)
        } else {
            platform.present_cpus() | CpuSet::of(boot)
        };
        let ncpus = all_cpus.count();
        let max_id = all_cpus.max().unwrap_or(boot);

        if config.disabled {
            info!("SMP: disabled, running on {boot} only");
        } else {
            info!("SMP: multiprocessor system detected: {ncpus} CPUs {all_cpus}");
        }

        Self {
            platform,
            config,
            all_cpus,
            ncpus,
            max_id,
            session: SpinLock::new(()),
            generation: AtomicU64::new(0),
            mailboxes: (0..MAX_CPUS).map(|_| Mailbox::default()).collect(),
            stop: StopState::new(),
            topology: SyncOnceCell::new(),
        }
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub const fn config(&self) -> &SmpConfig {
        &self.config
    }

    /// Whether rendezvous and stop requests reach other CPUs yet.
    #[must_use]
    pub fn is_started(&self) -> bool {
        !self.config.disabled && self.platform.smp_started()
    }

    #[must_use]
    pub const fn all_cpus(&self) -> CpuSet {
        self.all_cpus
    }

    /// Every active CPU except the caller.
    #[must_use]
    pub fn other_cpus(&self) -> CpuSet {
        self.all_cpus - CpuSet::of(self.platform.current_cpu())
    }

    #[must_use]
    pub fn info(&self) -> SmpInfo {
        SmpInfo {
            ncpus: self.ncpus,
            max_id: self.max_id,
            max_cpus: MAX_CPUS,
            disabled: self.config.disabled,
            topology: self.config.topology,
            started: self.is_started(),
        }
    }

    /// Number of rendezvous sessions started so far. Lock-free, so phase
    /// callbacks may read it.
    #[must_use]
    pub fn rendezvous_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Entry point for the platform's IPI dispatch, on the receiving CPU.
    pub fn handle_ipi(&self, ipi: Ipi) {
        let cpu = self.platform.current_cpu();
        match ipi {
            Ipi::Rendezvous => self.drain_mailbox(cpu),
            Ipi::Stop | Ipi::StopHard => self.take_stop_request(cpu),
        }
    }

    /// Runs whatever the caller's interrupts would have run. Called while
    /// spinning for the session lock, where a kernel would briefly let
    /// interrupts in.
    pub(crate) fn service_pending(&self, cpu: CpuId) {
        self.drain_mailbox(cpu);
        self.take_stop_request(cpu);
        self.platform.cpu_spinwait();
    }

    /// The machine's topology, built and checked on first use.
    ///
    /// # Panics
    /// If the selected shape does not cover exactly the active CPUs.
    #[must_use]
    pub fn topology(&self) -> &CpuTopology {
        self.topology.get_or_init(|| self.build_topology())
    }

    fn build_topology(&self) -> CpuTopology {
        let builder = TopologyBuilder::new(self.ncpus, self.all_cpus);
        let mut topology = if self.config.disabled {
            builder.none()
        } else {
            self.config
                .topology
                .build(&builder)
                .or_else(|| self.platform.cpu_topology(&builder))
                .unwrap_or_else(|| builder.none())
        };

        if let Err(err) = topology.validate(self.ncpus, self.all_cpus) {
            panic!("built bad topology: {err}");
        }
        topology.collapse();
        debug!("SMP: cpu topology\n{topology}");
        topology
    }
}
