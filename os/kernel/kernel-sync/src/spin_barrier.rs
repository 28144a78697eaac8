use core::sync::atomic::{AtomicUsize, Ordering};

/// A counting barrier that participants pass by spinning.
///
/// Unlike `std::sync::Barrier` the expected total is supplied by the waiter,
/// not fixed at construction, and the barrier does not reset itself once
/// everyone has arrived. The owner calls [`reset`](Self::reset) before the
/// next round, while no participant can observe it.
///
/// Arrivals use acquire-release ordering, so everything a participant wrote
/// before [`arrive`](Self::arrive) is visible to any participant that has
/// seen the count reach the total.
#[derive(Debug, Default)]
pub struct SpinBarrier {
    arrived: AtomicUsize,
}

impl SpinBarrier {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arrived: AtomicUsize::new(0),
        }
    }

    /// Records one arrival and returns the count including it.
    #[inline]
    pub fn arrive(&self) -> usize {
        self.arrived.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current number of arrivals.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.arrived.load(Ordering::Acquire)
    }

    /// Returns `true` once at least `total` participants have arrived.
    #[inline]
    #[must_use]
    pub fn is_complete(&self, total: usize) -> bool {
        self.count() >= total
    }

    /// Spins until `total` participants have arrived.
    ///
    /// There is no timeout. A participant that never arrives stalls
    /// every waiter.
    #[inline]
    pub fn wait_for(&self, total: usize, mut relax: impl FnMut()) {
        while !self.is_complete(total) {
            relax();
        }
    }

    /// [`arrive`](Self::arrive) followed by [`wait_for`](Self::wait_for).
    #[inline]
    pub fn arrive_and_wait(&self, total: usize, relax: impl FnMut()) {
        self.arrive();
        self.wait_for(total, relax);
    }

    /// Clears the arrival count with release ordering.
    #[inline]
    pub fn reset(&self) {
        self.arrived.store(0, Ordering::Release);
    }
}
