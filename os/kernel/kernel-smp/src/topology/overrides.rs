use super::{CpuGroupFlags, CpuTopology, ShareLevel, TopologyBuilder, TopologyError};
use core::fmt;

/// Forced topology shapes, selected by number at boot.
///
/// Useful to exercise scheduler paths on hardware that does not have the
/// shape, or to paper over a platform that reports a wrong one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum TopologyOverride {
    /// Ask the platform.
    #[default]
    Auto = 0,
    /// Dual core, nothing shared.
    DualCore = 1,
    /// All CPUs equal.
    None = 2,
    /// Dual core with a shared L2.
    DualCoreSharedL2 = 3,
    /// Quad core with a shared L3 per package, private L2.
    QuadCoreSharedL3 = 4,
    /// Two dual-core dies per package, each die sharing its L2.
    DualDieSharedL2 = 5,
    /// Single core with two hyper-threads.
    Htt2 = 6,
    /// Quad core with a shared L3, two SMT threads per core.
    QuadCoreSmt2 = 7,
}

impl TopologyOverride {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// The forced shape, or `None` for [`Auto`](Self::Auto).
    #[must_use]
    pub fn build(self, builder: &TopologyBuilder) -> Option<CpuTopology> {
        let no_flags = CpuGroupFlags::new();
        let topology = match self {
            Self::Auto => return None,
            Self::DualCore => builder.one_level(ShareLevel::None, 2, no_flags),
            Self::None => builder.none(),
            Self::DualCoreSharedL2 => builder.one_level(ShareLevel::L2, 2, no_flags),
            Self::QuadCoreSharedL3 => builder.one_level(ShareLevel::L3, 4, no_flags),
            Self::DualDieSharedL2 => {
                builder.two_level(ShareLevel::None, 2, ShareLevel::L2, 2, no_flags)
            }
            Self::Htt2 => builder.one_level(ShareLevel::L1, 2, CpuGroupFlags::new().with_htt(true)),
            Self::QuadCoreSmt2 => builder.two_level(
                ShareLevel::L3,
                4,
                ShareLevel::L1,
                2,
                CpuGroupFlags::new().with_smt(true),
            ),
        };
        Some(topology)
    }
}

impl TryFrom<u32> for TopologyOverride {
    type Error = TopologyError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Auto,
            1 => Self::DualCore,
            2 => Self::None,
            3 => Self::DualCoreSharedL2,
            4 => Self::QuadCoreSharedL3,
            5 => Self::DualDieSharedL2,
            6 => Self::Htt2,
            7 => Self::QuadCoreSmt2,
            other => return Err(TopologyError::UnknownOverride(other)),
        })
    }
}

impl fmt::Display for TopologyOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}
