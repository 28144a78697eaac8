//! # Rendezvous
//!
//! Runs a setup/action/teardown triple on a set of CPUs with barriers
//! between the phases:
//!
//! ```text
//!            observed     entry               exit
//! cpu a  ──▶ ───┼──setup───┼───action───────────┼──teardown──▶
//! cpu b  ──▶ ───┼──setup───┼───action──         ┼──teardown──▶
//! cpu c  ──▶ ───┼──setup───┼───action─────      ┼──teardown──▶
//! ```
//!
//! Every participant has seen the session before anyone runs `setup`,
//! everyone has finished `setup` before anyone runs `action`, and everyone
//! has finished `action` before anyone runs `teardown`. Within a phase CPUs
//! run in any order, possibly in parallel.
//!
//! All waits are spins. A rendezvous is legal with interrupts disabled and
//! before the scheduler exists, and has no timeout: a CPU that never takes
//! the IPI stalls every other participant.

use crate::cpuset::{CpuId, CpuSet};
use crate::platform::{Ipi, Platform};
use crate::smp::Smp;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;
use kernel_sync::SpinBarrier;
use log::trace;

/// A rendezvous phase. Receives the CPU it runs on and the shared argument.
pub type PhaseFn<A> = fn(CpuId, &A);

/// What happens after the action phase.
pub enum Teardown<A> {
    /// Wait for everyone to finish `action`; run nothing.
    None,
    /// Wait for everyone to finish `action`, then run the callback.
    Blocking(PhaseFn<A>),
    /// Fire-and-forget: no setup, no entry barrier, no exit wait and no
    /// callback. The initiator returns as soon as its own action is done.
    /// Only the inline path used before SMP starts still runs `setup`.
    NonBlocking,
}

impl<A> Teardown<A> {
    #[must_use]
    pub const fn is_non_blocking(&self) -> bool {
        matches!(self, Self::NonBlocking)
    }
}

impl<A> Clone for Teardown<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Teardown<A> {}

impl<A> core::fmt::Debug for Teardown<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Blocking(_) => f.write_str("Blocking"),
            Self::NonBlocking => f.write_str("NonBlocking"),
        }
    }
}

/// A published session, as seen from a CPU's mailbox.
pub(crate) trait Participant: Send + Sync {
    fn run(&self, cpu: CpuId, spinwait: &dyn Fn());
}

struct Session<A> {
    generation: u64,
    ncpus: usize,
    setup: Option<PhaseFn<A>>,
    action: Option<PhaseFn<A>>,
    teardown: Teardown<A>,
    arg: Arc<A>,
    /// Participants that have picked up the session.
    observed: SpinBarrier,
    /// Participants done with `setup`.
    entry: SpinBarrier,
    /// Participants done with `action`.
    exit: SpinBarrier,
    /// Participants that left the handler.
    done: SpinBarrier,
}

impl<A: Send + Sync> Participant for Session<A> {
    fn run(&self, cpu: CpuId, spinwait: &dyn Fn()) {
        trace!("rendezvous #{}: {cpu} entered", self.generation);
        self.observed.arrive_and_wait(self.ncpus, spinwait);

        // Fire-and-forget sessions go straight to the action.
        let blocking = !self.teardown.is_non_blocking();
        if blocking {
            if let Some(setup) = self.setup {
                setup(cpu, &self.arg);
            }
            self.entry.arrive_and_wait(self.ncpus, spinwait);
        }

        if let Some(action) = self.action {
            action(cpu, &self.arg);
        }

        self.exit.arrive();
        if blocking {
            self.exit.wait_for(self.ncpus, spinwait);
            if let Teardown::Blocking(teardown) = self.teardown {
                teardown(cpu, &self.arg);
            }
        }
        self.done.arrive();
    }
}

impl<P: Platform> Smp<P> {
    /// Runs `setup`, `action` and `teardown` on every active CPU in `map`.
    ///
    /// The caller takes part if it is in `map`. Only one rendezvous is in
    /// flight system-wide; concurrent callers queue on the session lock and
    /// keep servicing their own IPIs while they wait. Returns once every
    /// participant has left the handler, or, for
    /// [`Teardown::NonBlocking`], once the caller's own part is done.
    ///
    /// Before SMP is started the three phases run inline on the caller
    /// without locking or signalling.
    ///
    /// # Panics
    /// If `map` contains no active CPU.
    pub fn rendezvous_cpus<A>(
        &self,
        map: CpuSet,
        setup: Option<PhaseFn<A>>,
        action: Option<PhaseFn<A>>,
        teardown: Teardown<A>,
        arg: Arc<A>,
    ) where
        A: Send + Sync + 'static,
    {
        let cpu = self.platform.current_cpu();

        if !self.is_started() {
            if let Some(setup) = setup {
                setup(cpu, &arg);
            }
            if let Some(action) = action {
                action(cpu, &arg);
            }
            if let Teardown::Blocking(teardown) = teardown {
                teardown(cpu, &arg);
            }
            return;
        }

        let targets = map & self.all_cpus;
        let ncpus = targets.count();
        assert!(ncpus != 0, "ncpus is 0 with map={map:#x}");

        let guard = self.session.lock_with(|| self.service_pending(cpu));
        // Anything queued for us before we got the lock must run first, or
        // its other participants would wait on us forever.
        self.drain_mailbox(cpu);

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let session = Arc::new(Session {
            generation,
            ncpus,
            setup,
            action,
            teardown,
            arg,
            observed: SpinBarrier::new(),
            entry: SpinBarrier::new(),
            exit: SpinBarrier::new(),
            done: SpinBarrier::new(),
        });
        trace!(
            "rendezvous #{}: {cpu} -> {targets} ({teardown:?})",
            session.generation
        );

        let others = targets - CpuSet::of(cpu);
        for target in others {
            self.mailboxes[target.index()]
                .lock()
                .push_back(Arc::clone(&session) as Arc<dyn Participant>);
        }
        if !others.is_empty() {
            self.platform.send_ipi(others, Ipi::Rendezvous);
        }

        let spinwait = || self.platform.cpu_spinwait();
        if targets.contains(cpu) {
            session.run(cpu, &spinwait);
        }
        if !teardown.is_non_blocking() {
            session.done.wait_for(ncpus, spinwait);
        }
        drop(guard);
    }

    /// [`rendezvous_cpus`](Self::rendezvous_cpus) on every active CPU.
    pub fn rendezvous_all<A>(
        &self,
        setup: Option<PhaseFn<A>>,
        action: Option<PhaseFn<A>>,
        teardown: Teardown<A>,
        arg: Arc<A>,
    ) where
        A: Send + Sync + 'static,
    {
        self.rendezvous_cpus(self.all_cpus, setup, action, teardown, arg);
    }

    /// Runs `action` everywhere and waits for all CPUs to finish it.
    pub fn rendezvous_all_action<A>(&self, action: PhaseFn<A>, arg: Arc<A>)
    where
        A: Send + Sync + 'static,
    {
        self.rendezvous_all(None, Some(action), Teardown::None, arg);
    }

    /// Runs every session queued for `cpu`, oldest first.
    pub(crate) fn drain_mailbox(&self, cpu: CpuId) {
        let spinwait = || self.platform.cpu_spinwait();
        loop {
            // The mailbox lock must not be held while the session runs.
            let next = self.mailboxes[cpu.index()].lock().pop_front();
            let Some(session) = next else {
                break;
            };
            session.run(cpu, &spinwait);
        }
    }
}
