//! CPU identifiers and fixed-width CPU bitmasks.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not, Sub, SubAssign};
use core::sync::atomic::{AtomicU64, Ordering};

/// Number of CPUs a [`CpuSet`] can describe.
pub const MAX_CPUS: usize = 64;

/// Logical CPU index (`0..MAX_CPUS`), not an APIC id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CpuId(u32);

impl CpuId {
    /// The CPU that boots the system and runs the one-shot restart hook.
    pub const BOOT: Self = Self(0);

    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for CpuId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CpuSetError {
    #[error("cpu {0} is outside the supported range 0..{max}", max = MAX_CPUS)]
    OutOfRange(u32),
}

/// A set of CPUs, one bit per [`CpuId`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct CpuSet(u64);

impl CpuSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// The set containing only `cpu`.
    ///
    /// # Panics
    /// If `cpu` is not below [`MAX_CPUS`].
    #[must_use]
    pub const fn of(cpu: CpuId) -> Self {
        assert!(cpu.index() < MAX_CPUS, "cpu id out of range");
        Self(1 << cpu.0)
    }

    /// Fallible [`of`](Self::of) for ids that come from outside the kernel.
    ///
    /// # Errors
    /// [`CpuSetError::OutOfRange`] if `cpu` does not fit the mask.
    pub const fn try_of(cpu: u32) -> Result<Self, CpuSetError> {
        if (cpu as usize) < MAX_CPUS {
            Ok(Self(1 << cpu))
        } else {
            Err(CpuSetError::OutOfRange(cpu))
        }
    }

    /// CPUs `0..n`, saturating at [`MAX_CPUS`].
    #[must_use]
    pub const fn first_n(n: usize) -> Self {
        if n >= MAX_CPUS {
            Self(u64::MAX)
        } else {
            Self((1 << n) - 1)
        }
    }

    #[inline]
    pub const fn insert(&mut self, cpu: CpuId) {
        self.0 |= Self::of(cpu).0;
    }

    #[inline]
    pub const fn remove(&mut self, cpu: CpuId) {
        self.0 &= !Self::of(cpu).0;
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, cpu: CpuId) -> bool {
        cpu.index() < MAX_CPUS && self.0 & (1 << cpu.0) != 0
    }

    #[inline]
    #[must_use]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Highest CPU in the set.
    #[must_use]
    pub const fn max(self) -> Option<CpuId> {
        if self.0 == 0 {
            None
        } else {
            Some(CpuId(63 - self.0.leading_zeros()))
        }
    }

    /// Lowest CPU in the set.
    #[must_use]
    pub const fn min(self) -> Option<CpuId> {
        if self.0 == 0 {
            None
        } else {
            Some(CpuId(self.0.trailing_zeros()))
        }
    }

    /// Members in ascending order.
    #[must_use]
    pub const fn iter(self) -> CpuSetIter {
        CpuSetIter(self.0)
    }
}

impl IntoIterator for CpuSet {
    type Item = CpuId;
    type IntoIter = CpuSetIter;

    fn into_iter(self) -> CpuSetIter {
        self.iter()
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<I: IntoIterator<Item = CpuId>>(iter: I) -> Self {
        let mut set = Self::empty();
        for cpu in iter {
            set.insert(cpu);
        }
        set
    }
}

pub struct CpuSetIter(u64);

impl Iterator for CpuSetIter {
    type Item = CpuId;

    fn next(&mut self) -> Option<CpuId> {
        if self.0 == 0 {
            return None;
        }
        let id = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(CpuId(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for CpuSetIter {}

impl BitOr for CpuSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CpuSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CpuSet {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for CpuSet {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

/// Set difference.
impl Sub for CpuSet {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl SubAssign for CpuSet {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 &= !rhs.0;
    }
}

impl Not for CpuSet {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, cpu) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", cpu.0)?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuSet({self})")
    }
}

impl fmt::LowerHex for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A [`CpuSet`] that CPUs update concurrently.
#[derive(Debug, Default)]
pub struct AtomicCpuSet(AtomicU64);

impl AtomicCpuSet {
    #[must_use]
    pub const fn new(set: CpuSet) -> Self {
        Self(AtomicU64::new(set.0))
    }

    #[inline]
    #[must_use]
    pub fn load(&self, order: Ordering) -> CpuSet {
        CpuSet(self.0.load(order))
    }

    #[inline]
    pub fn store(&self, set: CpuSet, order: Ordering) {
        self.0.store(set.0, order);
    }

    /// Adds `cpu`; release-ordered so the caller's prior writes travel with it.
    #[inline]
    pub fn set(&self, cpu: CpuId) {
        self.0.fetch_or(CpuSet::of(cpu).0, Ordering::AcqRel);
    }

    #[inline]
    pub fn clear(&self, cpu: CpuId) {
        self.0.fetch_and(!CpuSet::of(cpu).0, Ordering::AcqRel);
    }

    #[inline]
    pub fn insert_all(&self, set: CpuSet) {
        self.0.fetch_or(set.0, Ordering::AcqRel);
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, cpu: CpuId, order: Ordering) -> bool {
        self.load(order).contains(cpu)
    }

    /// Clears `cpu` and reports whether it was set.
    #[inline]
    pub fn take(&self, cpu: CpuId) -> bool {
        let bit = CpuSet::of(cpu).0;
        self.0.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }
}
