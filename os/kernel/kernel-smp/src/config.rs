//! Boot-time tunables.

use crate::topology::TopologyOverride;

/// Spins `stop_cpus` waits before logging a timeout, with `diagnostic` on.
pub const DEFAULT_STOP_SPIN_LIMIT: u64 = 100_000;

/// Tunables read once when the [`Smp`](crate::Smp) instance is created.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SmpConfig {
    /// Run on the boot CPU only, even if the platform found more.
    pub disabled: bool,

    /// Forced topology; [`TopologyOverride::Auto`] asks the platform.
    pub topology: TopologyOverride,

    /// Diagnostic spin cap for `stop_cpus`. Reaching it is logged and the
    /// wait abandoned; `Some(0)` gives up after a single spin and `None`
    /// waits forever.
    pub stop_spin_limit: Option<u64>,
}

impl Default for SmpConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            topology: TopologyOverride::Auto,
            stop_spin_limit: if cfg!(feature = "diagnostic") {
                Some(DEFAULT_STOP_SPIN_LIMIT)
            } else {
                None
            },
        }
    }
}

impl SmpConfig {
    #[must_use]
    pub const fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    #[must_use]
    pub const fn with_topology(mut self, topology: TopologyOverride) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub const fn with_stop_spin_limit(mut self, limit: Option<u64>) -> Self {
        self.stop_spin_limit = limit;
        self
    }
}
