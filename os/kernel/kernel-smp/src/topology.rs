//! # CPU topology
//!
//! A read-only tree describing which CPUs share a cache or scheduling
//! domain. The scheduler walks it to find a CPU's closest siblings.
//!
//! ```text
//! root (none, {0..7}, 8)
//! ├── package (none, {0..3}, 4)
//! │   ├── die (L2, {0,1}, 2)
//! │   └── die (L2, {2,3}, 2)
//! └── package (none, {4..7}, 4)
//!     ├── die (L2, {4,5}, 2)
//!     └── die (L2, {6,7}, 2)
//! ```
//!
//! Groups live in one arena and refer to each other by [`GroupId`]. The
//! children of a group are contiguous in the arena. Every group's mask is
//! the union of its leaves' masks and its count is their sum.

mod builder;
mod overrides;

pub use builder::TopologyBuilder;
pub use overrides::TopologyOverride;

use crate::cpuset::{CpuId, CpuSet};
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::fmt;
use core::ops::Range;

/// How much the CPUs inside a group share.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ShareLevel {
    #[default]
    None,
    L1,
    L2,
    L3,
    Numa,
}

/// Per-group attributes.
#[bitfield(u8)]
#[derive(PartialEq, Eq, Hash)]
pub struct CpuGroupFlags {
    /// Members are hyper-threading siblings.
    pub htt: bool,

    /// Members are SMT siblings.
    pub smt: bool,

    #[bits(6)]
    _reserved: u8,
}

impl CpuGroupFlags {
    /// Members are hardware threads of one core, of either flavor.
    #[must_use]
    pub fn thread(self) -> bool {
        self.htt() || self.smt()
    }
}

/// Index of a group inside its [`CpuTopology`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(usize);

impl GroupId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("cpu count {found} != {expected}")]
    CountMismatch { found: usize, expected: usize },

    #[error("cpu mask ({found}) != ({expected})")]
    MaskMismatch { found: CpuSet, expected: CpuSet },

    #[error("group {group}: children share cpus {shared}")]
    Overlap { group: GroupId, shared: CpuSet },

    #[error("group {group}: mask/count ({mask}, {count}) disagree with its children")]
    Inconsistent {
        group: GroupId,
        mask: CpuSet,
        count: usize,
    },

    #[error("unknown topology override {0}")]
    UnknownOverride(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuGroup {
    parent: Option<GroupId>,
    first_child: usize,
    children: usize,
    mask: CpuSet,
    count: usize,
    level: ShareLevel,
    flags: CpuGroupFlags,
}

impl CpuGroup {
    pub(crate) const fn new(
        parent: Option<GroupId>,
        level: ShareLevel,
        flags: CpuGroupFlags,
    ) -> Self {
        Self {
            parent,
            first_child: 0,
            children: 0,
            mask: CpuSet::empty(),
            count: 0,
            level,
            flags,
        }
    }

    #[must_use]
    pub const fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    #[must_use]
    pub const fn mask(&self) -> CpuSet {
        self.mask
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn level(&self) -> ShareLevel {
        self.level
    }

    #[must_use]
    pub const fn flags(&self) -> CpuGroupFlags {
        self.flags
    }

    #[must_use]
    pub const fn child_count(&self) -> usize {
        self.children
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.children == 0
    }

    const fn child_range(&self) -> Range<usize> {
        self.first_child..self.first_child + self.children
    }
}

/// The built topology tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    groups: Vec<CpuGroup>,
    root: GroupId,
}

impl CpuTopology {
    pub(crate) const fn from_arena(groups: Vec<CpuGroup>) -> Self {
        Self {
            groups,
            root: GroupId(0),
        }
    }

    #[must_use]
    pub const fn root(&self) -> GroupId {
        self.root
    }

    /// # Panics
    /// If `id` does not belong to this topology.
    #[must_use]
    pub fn group(&self, id: GroupId) -> &CpuGroup {
        &self.groups[id.0]
    }

    #[must_use]
    pub fn get(&self, id: GroupId) -> Option<&CpuGroup> {
        self.groups.get(id.0)
    }

    pub fn children(&self, id: GroupId) -> impl ExactSizeIterator<Item = GroupId> + use<> {
        self.group(id).child_range().map(GroupId)
    }

    #[must_use]
    pub fn parent(&self, id: GroupId) -> Option<GroupId> {
        self.group(id).parent
    }

    /// Leaf groups under the root, in arena order.
    #[must_use]
    pub fn leaves(&self) -> Vec<GroupId> {
        let mut leaves = Vec::new();
        let mut stack = Vec::from([self.root]);
        while let Some(id) = stack.pop() {
            let group = self.group(id);
            if group.is_leaf() {
                leaves.push(id);
            } else {
                stack.extend(group.child_range().rev().map(GroupId));
            }
        }
        leaves
    }

    /// The deepest group containing `cpu`, or `None` if the tree does not
    /// cover it.
    #[must_use]
    pub fn find(&self, cpu: CpuId) -> Option<GroupId> {
        self.find_from(self.root, cpu)
    }

    /// [`find`](Self::find) starting below `start` instead of the root.
    #[must_use]
    pub fn find_from(&self, start: GroupId, cpu: CpuId) -> Option<GroupId> {
        let mut id = start;
        loop {
            let group = self.group(id);
            if !group.mask.contains(cpu) {
                return None;
            }
            if group.is_leaf() {
                return Some(id);
            }
            id = self
                .children(id)
                .find(|&child| self.group(child).mask.contains(cpu))?;
        }
    }

    /// Checks the tree against the machine it was built for.
    ///
    /// # Errors
    /// The first violated invariant: root count or mask differing from
    /// `ncpus`/`all_cpus`, sibling groups sharing a CPU, or an inner group
    /// whose mask or count is not the union or sum of its children's.
    pub fn validate(&self, ncpus: usize, all_cpus: CpuSet) -> Result<(), TopologyError> {
        let root = self.group(self.root);
        if root.count != ncpus {
            return Err(TopologyError::CountMismatch {
                found: root.count,
                expected: ncpus,
            });
        }
        if root.mask != all_cpus {
            return Err(TopologyError::MaskMismatch {
                found: root.mask,
                expected: all_cpus,
            });
        }

        let mut stack = Vec::from([self.root]);
        while let Some(id) = stack.pop() {
            let group = self.group(id);
            if group.is_leaf() {
                if group.mask.count() != group.count {
                    return Err(TopologyError::Inconsistent {
                        group: id,
                        mask: group.mask,
                        count: group.count,
                    });
                }
                continue;
            }

            let mut union = CpuSet::empty();
            let mut sum = 0;
            for child in self.children(id) {
                let mask = self.group(child).mask;
                if union.overlaps(mask) {
                    return Err(TopologyError::Overlap {
                        group: id,
                        shared: union & mask,
                    });
                }
                union |= mask;
                sum += self.group(child).count;
                stack.push(child);
            }
            if union != group.mask || sum != group.count {
                return Err(TopologyError::Inconsistent {
                    group: id,
                    mask: group.mask,
                    count: group.count,
                });
            }
        }
        Ok(())
    }

    /// Drops single-child levels above the first real fan-out.
    pub fn collapse(&mut self) {
        while self.group(self.root).children == 1 {
            self.root = GroupId(self.group(self.root).first_child);
            self.groups[self.root.0].parent = None;
        }
    }

    fn fmt_group(&self, f: &mut fmt::Formatter<'_>, id: GroupId, depth: usize) -> fmt::Result {
        let group = self.group(id);
        writeln!(
            f,
            "{:indent$}{id}: level={:?} count={} mask={}{}",
            "",
            group.level,
            group.count,
            group.mask,
            if group.flags.thread() { " thread" } else { "" },
            indent = depth * 2,
        )?;
        for child in self.children(id) {
            self.fmt_group(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for CpuTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_group(f, self.root, 0)
    }
}
