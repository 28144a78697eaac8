use super::{CpuGroup, CpuGroupFlags, CpuTopology, GroupId, ShareLevel};
use crate::cpuset::{CpuId, CpuSet, MAX_CPUS};
use alloc::vec::Vec;

const ROOT: GroupId = GroupId(0);

/// Builds the standard topology shapes for a given machine.
///
/// Leaves take the next `count` present CPUs in id order; ids missing from
/// `all_cpus` are skipped. CPUs left over when `ncpus` does not divide evenly
/// are not placed, which [`CpuTopology::validate`] reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TopologyBuilder {
    ncpus: usize,
    all_cpus: CpuSet,
}

impl TopologyBuilder {
    #[must_use]
    pub const fn new(ncpus: usize, all_cpus: CpuSet) -> Self {
        Self { ncpus, all_cpus }
    }

    #[must_use]
    pub const fn ncpus(&self) -> usize {
        self.ncpus
    }

    #[must_use]
    pub const fn all_cpus(&self) -> CpuSet {
        self.all_cpus
    }

    /// A single group holding every CPU; nothing is shared.
    #[must_use]
    pub fn none(&self) -> CpuTopology {
        let mut root = CpuGroup::new(None, ShareLevel::None, CpuGroupFlags::new());
        root.mask = self.all_cpus;
        root.count = self.ncpus;
        CpuTopology::from_arena(Vec::from([root]))
    }

    /// Exactly `groups` leaves of `ncpus / groups` CPUs under an unshared
    /// root. The remainder of an uneven split is left unplaced.
    ///
    /// # Panics
    /// If `groups` is zero or exceeds the CPU count.
    #[must_use]
    pub fn flat(&self, groups: usize) -> CpuTopology {
        assert!(
            groups > 0 && groups <= self.ncpus,
            "cannot split {} cpus into {groups} groups",
            self.ncpus
        );
        let count = self.ncpus / groups;
        let mut arena = Arena::new();
        let mut cpu = 0;
        for _ in 0..groups {
            let flags = CpuGroupFlags::new();
            cpu = arena.add_leaf(ROOT, ShareLevel::None, count, flags, cpu, self.all_cpus);
        }
        arena.finish()
    }

    /// Leaves of `count` CPUs sharing `share`, under an unshared root.
    ///
    /// # Panics
    /// If `count` is zero, or a leaf runs out of present CPUs.
    #[must_use]
    pub fn one_level(&self, share: ShareLevel, count: usize, flags: CpuGroupFlags) -> CpuTopology {
        assert!(count > 0, "topology leaf must hold at least one cpu");
        let mut arena = Arena::new();
        let mut cpu = 0;
        for _ in 0..self.ncpus / count {
            cpu = arena.add_leaf(ROOT, share, count, flags, cpu, self.all_cpus);
        }
        arena.finish()
    }

    /// Outer groups sharing `outer_share`, each holding `outer_count` leaves
    /// of `inner_count` CPUs that share `inner_share`.
    ///
    /// # Panics
    /// If either count is zero, or a leaf runs out of present CPUs.
    #[must_use]
    pub fn two_level(
        &self,
        outer_share: ShareLevel,
        outer_count: usize,
        inner_share: ShareLevel,
        inner_count: usize,
        inner_flags: CpuGroupFlags,
    ) -> CpuTopology {
        assert!(
            outer_count > 0 && inner_count > 0,
            "topology groups must hold at least one cpu"
        );
        let mut arena = Arena::new();
        let packages = self.ncpus / (outer_count * inner_count);

        // Outer groups first so the root's children stay contiguous.
        let outer: Vec<GroupId> = (0..packages)
            .map(|_| {
                let group = CpuGroup::new(Some(ROOT), outer_share, CpuGroupFlags::new());
                arena.push(ROOT, group)
            })
            .collect();

        let mut cpu = 0;
        for package in outer {
            for _ in 0..outer_count {
                cpu = arena.add_leaf(
                    package,
                    inner_share,
                    inner_count,
                    inner_flags,
                    cpu,
                    self.all_cpus,
                );
            }
        }
        arena.finish()
    }
}

struct Arena {
    groups: Vec<CpuGroup>,
}

impl Arena {
    fn new() -> Self {
        Self {
            groups: Vec::from([CpuGroup::new(None, ShareLevel::None, CpuGroupFlags::new())]),
        }
    }

    fn push(&mut self, parent: GroupId, group: CpuGroup) -> GroupId {
        let id = GroupId(self.groups.len());
        let parent = &mut self.groups[parent.0];
        if parent.children == 0 {
            parent.first_child = id.0;
        }
        debug_assert_eq!(
            parent.first_child + parent.children,
            id.0,
            "children must be contiguous"
        );
        parent.children += 1;
        self.groups.push(group);
        id
    }

    /// Adds a leaf of `count` present CPUs starting the search at id `start`
    /// and folds it into every ancestor. Returns the next id to search from.
    fn add_leaf(
        &mut self,
        parent: GroupId,
        share: ShareLevel,
        count: usize,
        flags: CpuGroupFlags,
        start: usize,
        all_cpus: CpuSet,
    ) -> usize {
        let mut leaf = CpuGroup::new(Some(parent), share, flags);
        let mut cpu = start;
        while leaf.count < count {
            assert!(
                cpu < MAX_CPUS,
                "ran out of cpus filling a {count}-cpu group from cpu {start}"
            );
            #[allow(clippy::cast_possible_truncation)]
            let id = CpuId::new(cpu as u32);
            if all_cpus.contains(id) {
                leaf.mask.insert(id);
                leaf.count += 1;
            }
            cpu += 1;
        }

        let (mask, count) = (leaf.mask, leaf.count);
        self.push(parent, leaf);

        let mut ancestor = Some(parent);
        while let Some(id) = ancestor {
            let group = &mut self.groups[id.0];
            assert!(
                !group.mask.overlaps(mask),
                "duplicate children in group {id}: mask {} child {mask}",
                group.mask
            );
            group.mask |= mask;
            group.count += count;
            ancestor = group.parent;
        }
        cpu
    }

    fn finish(self) -> CpuTopology {
        CpuTopology::from_arena(self.groups)
    }
}
