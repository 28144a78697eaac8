//! A simulated machine: one host thread per CPU.
//!
//! Each CPU thread polls its pending-IPI word and otherwise runs jobs
//! submitted with [`Machine::call_on`]. Threads that are not CPU threads
//! identify as the boot CPU.

#![allow(dead_code)]

use kernel_smp::{AtomicCpuSet, CpuId, CpuSet, Ipi, Platform, Smp, SmpConfig};
use std::cell::Cell;
use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

thread_local! {
    static CURRENT_CPU: Cell<Option<CpuId>> = const { Cell::new(None) };
}

pub fn cpus(ids: &[u32]) -> CpuSet {
    ids.iter().copied().map(CpuId::new).collect()
}

const fn ipi_bit(ipi: Ipi) -> u8 {
    match ipi {
        Ipi::Rendezvous => 1 << 0,
        Ipi::Stop => 1 << 1,
        Ipi::StopHard => 1 << 2,
    }
}

struct Shared {
    present: CpuSet,
    started: AtomicBool,
    pending: Vec<AtomicU8>,
    ipis_sent: AtomicUsize,
    /// Every CPU that has been sent an IPI of any kind.
    signalled: AtomicCpuSet,
    /// CPUs that ignore IPIs, as if wedged with interrupts off.
    wedged: AtomicCpuSet,
}

#[derive(Clone)]
pub struct SimPlatform {
    shared: Arc<Shared>,
}

impl SimPlatform {
    fn new(present: CpuSet, started: bool) -> Self {
        let slots = present.max().map_or(1, |max| max.index() + 1);
        Self {
            shared: Arc::new(Shared {
                present,
                started: AtomicBool::new(started),
                pending: (0..slots).map(|_| AtomicU8::new(0)).collect(),
                ipis_sent: AtomicUsize::new(0),
                signalled: AtomicCpuSet::default(),
                wedged: AtomicCpuSet::default(),
            }),
        }
    }

    /// IPI sends so far; one per `send_ipi` call.
    pub fn ipis_sent(&self) -> usize {
        self.shared.ipis_sent.load(Ordering::SeqCst)
    }

    pub fn signalled(&self) -> CpuSet {
        self.shared.signalled.load(Ordering::SeqCst)
    }

    pub fn release_aps(&self) {
        self.shared.started.store(true, Ordering::SeqCst);
    }

    fn take_pending(&self, cpu: CpuId) -> u8 {
        if self.shared.wedged.contains(cpu, Ordering::SeqCst) {
            return 0;
        }
        self.shared.pending[cpu.index()].swap(0, Ordering::AcqRel)
    }
}

impl Platform for SimPlatform {
    fn present_cpus(&self) -> CpuSet {
        self.shared.present
    }

    fn smp_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    fn current_cpu(&self) -> CpuId {
        CURRENT_CPU.with(Cell::get).unwrap_or(CpuId::BOOT)
    }

    fn send_ipi(&self, targets: CpuSet, ipi: Ipi) {
        self.shared.ipis_sent.fetch_add(1, Ordering::SeqCst);
        self.shared.signalled.insert_all(targets);
        for cpu in targets {
            if let Some(slot) = self.shared.pending.get(cpu.index()) {
                slot.fetch_or(ipi_bit(ipi), Ordering::AcqRel);
            }
        }
    }

    fn cpu_spinwait(&self) {
        spin_loop();
        // Host threads outnumber host cores in these tests.
        thread::yield_now();
    }
}

type Job = Box<dyn FnOnce(&Smp<SimPlatform>) + Send>;

struct Cpu {
    jobs: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

pub struct Machine {
    smp: Arc<Smp<SimPlatform>>,
    cpus: Vec<(CpuId, Cpu)>,
}

impl Machine {
    /// A started machine with CPUs `0..ncpus`.
    pub fn boot(ncpus: usize) -> Self {
        Self::build(CpuSet::first_n(ncpus), SmpConfig::default(), true)
    }

    /// A machine that has not released its application processors yet.
    pub fn cold(ncpus: usize) -> Self {
        Self::build(CpuSet::first_n(ncpus), SmpConfig::default(), false)
    }

    pub fn build(present: CpuSet, config: SmpConfig, started: bool) -> Self {
        let platform = SimPlatform::new(present, started);
        let smp = Arc::new(Smp::new(platform, config));

        let cpus = present
            .iter()
            .map(|cpu| {
                let (tx, rx) = mpsc::channel::<Job>();
                let smp = Arc::clone(&smp);
                let thread = thread::Builder::new()
                    .name(format!("{cpu}"))
                    .spawn(move || cpu_loop(cpu, &smp, &rx))
                    .expect("spawn cpu thread");
                (
                    cpu,
                    Cpu {
                        jobs: Some(tx),
                        thread: Some(thread),
                    },
                )
            })
            .collect();

        Self { smp, cpus }
    }

    pub fn smp(&self) -> &Smp<SimPlatform> {
        &self.smp
    }

    /// A handle callbacks can carry in their argument.
    pub fn shared(&self) -> Arc<Smp<SimPlatform>> {
        Arc::clone(&self.smp)
    }

    pub fn platform(&self) -> &SimPlatform {
        self.smp.platform()
    }

    /// Makes `cpu` ignore every IPI from now on.
    pub fn wedge(&self, cpu: u32) {
        self.platform().shared.wedged.set(CpuId::new(cpu));
    }

    /// Runs `f` on `cpu` and returns a receiver for its result.
    pub fn spawn_on<R, F>(&self, cpu: u32, f: F) -> Receiver<R>
    where
        R: Send + 'static,
        F: FnOnce(&Smp<SimPlatform>) -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move |smp| {
            let _ = tx.send(f(smp));
        });
        self.sender(cpu).send(job).expect("cpu thread alive");
        rx
    }

    /// Runs `f` on `cpu` and waits for its result.
    pub fn call_on<R, F>(&self, cpu: u32, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&Smp<SimPlatform>) -> R + Send + 'static,
    {
        self.spawn_on(cpu, f).recv().expect("job panicked")
    }

    fn sender(&self, cpu: u32) -> &Sender<Job> {
        self.cpus
            .iter()
            .find(|(id, _)| id.as_u32() == cpu)
            .and_then(|(_, c)| c.jobs.as_ref())
            .expect("no such cpu")
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        for (_, cpu) in &mut self.cpus {
            cpu.jobs.take();
        }
        for (_, cpu) in &mut self.cpus {
            if let Some(thread) = cpu.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn cpu_loop(cpu: CpuId, smp: &Smp<SimPlatform>, jobs: &Receiver<Job>) {
    CURRENT_CPU.with(|c| c.set(Some(cpu)));
    let platform = smp.platform();
    loop {
        let pending = platform.take_pending(cpu);
        for ipi in [Ipi::Rendezvous, Ipi::Stop, Ipi::StopHard] {
            if pending & ipi_bit(ipi) != 0 {
                smp.handle_ipi(ipi);
            }
        }

        match jobs.try_recv() {
            Ok(job) => job(smp),
            Err(TryRecvError::Empty) => platform.cpu_spinwait(),
            Err(TryRecvError::Disconnected) => break,
        }
    }
}

/// Monotonic event clock shared by instrumented callbacks.
#[derive(Default)]
pub struct Clock(AtomicUsize);

impl Clock {
    pub fn tick(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}
