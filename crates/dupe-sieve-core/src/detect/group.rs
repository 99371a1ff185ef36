use ahash::AHashMap;
use std::collections::BTreeMap;

use super::policy::{decide, IdFallback};
use super::EntryIndex;
use crate::error::Error;
use crate::model::{
    CandidateEdge, DuplicateGroup, FileId, GroupId, GroupType, MemberRole, Relation,
};

/// Disjoint sets over dense indices, with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, x: usize, y: usize) {
        let (rx, ry) = (self.find(x), self.find(y));
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] = self.rank[rx].saturating_add(1);
            }
        }
    }
}

/// Merges edges into transitively closed groups and picks a canonical member
/// for each.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupBuilder;

impl GroupBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Groups come back ordered by smallest member id and numbered from 1.
    pub fn build(
        &self,
        edges: &[CandidateEdge],
        index: &EntryIndex<'_>,
    ) -> Result<Vec<DuplicateGroup>, Error> {
        let mut slots: AHashMap<FileId, usize> = AHashMap::new();
        let mut ids: Vec<FileId> = Vec::new();
        for edge in edges {
            edge.validate()?;
            for id in [edge.a_id(), edge.b_id()] {
                if !index.contains_key(&id) {
                    return Err(Error::MissingFile(id));
                }
                slots.entry(id).or_insert_with(|| {
                    ids.push(id);
                    ids.len() - 1
                });
            }
        }

        let mut sets = UnionFind::new(ids.len());
        for edge in edges {
            sets.union(slots[&edge.a_id()], slots[&edge.b_id()]);
        }

        let mut members: AHashMap<usize, Vec<FileId>> = AHashMap::new();
        for (slot, &id) in ids.iter().enumerate() {
            members.entry(sets.find(slot)).or_default().push(id);
        }
        let mut internal: AHashMap<usize, Vec<&CandidateEdge>> = AHashMap::new();
        for edge in edges {
            internal
                .entry(sets.find(slots[&edge.a_id()]))
                .or_default()
                .push(edge);
        }

        // BTreeMap on the smallest member id fixes the output order.
        let mut components: BTreeMap<FileId, (Vec<FileId>, Vec<&CandidateEdge>)> = BTreeMap::new();
        for (root, mut group_ids) in members {
            group_ids.sort_unstable();
            let group_edges = internal.remove(&root).unwrap_or_default();
            components.insert(group_ids[0], (group_ids, group_edges));
        }

        components
            .into_values()
            .enumerate()
            .map(|(n, (member_ids, group_edges))| {
                build_group(n as GroupId + 1, member_ids, &group_edges, index)
            })
            .collect()
    }
}

fn build_group(
    group_id: GroupId,
    member_ids: Vec<FileId>,
    edges: &[&CandidateEdge],
    index: &EntryIndex<'_>,
) -> Result<DuplicateGroup, Error> {
    let relation = edges
        .iter()
        .map(|edge| edge.relation())
        .max_by_key(|relation| relation.strength())
        .unwrap_or(Relation::Version);
    let confidence = edges
        .iter()
        .map(|edge| edge.confidence())
        .fold(1.0_f64, f64::min);

    let mut canonical = member_ids[0];
    for &candidate in &member_ids[1..] {
        let (Some(challenger), Some(best)) = (index.get(&candidate), index.get(&canonical)) else {
            return Err(Error::MissingFile(candidate));
        };
        if decide(challenger, best, IdFallback::LowerIsKept).prefers_a() {
            canonical = candidate;
        }
    }

    let bytes_savable = member_ids
        .iter()
        .filter(|&&id| id != canonical)
        .filter_map(|id| index.get(id))
        .map(|entry| entry.record.size)
        .sum();

    DuplicateGroup::new(
        group_id,
        member_ids,
        canonical,
        GroupType::from(relation),
        confidence,
        bytes_savable,
        edges.len(),
    )
}

/// Role of each file in `edges`, taken from the strongest edge it is part of.
pub fn member_roles(edges: &[CandidateEdge]) -> AHashMap<FileId, MemberRole> {
    let mut strongest: AHashMap<FileId, (&CandidateEdge, MemberRole)> = AHashMap::new();
    for edge in edges {
        let (a_role, b_role) = match edge.relation() {
            Relation::Exact => (MemberRole::Copy, MemberRole::Copy),
            Relation::Containment => (MemberRole::Container, MemberRole::Contained),
            Relation::Version => (MemberRole::Newer, MemberRole::Older),
        };
        for (id, role) in [(edge.a_id(), a_role), (edge.b_id(), b_role)] {
            let replace = match strongest.get(&id) {
                None => true,
                Some((current, _)) => {
                    (edge.relation().strength(), edge.confidence())
                        > (current.relation().strength(), current.confidence())
                }
            };
            if replace {
                strongest.insert(id, (edge, role));
            }
        }
    }
    strongest
        .into_iter()
        .map(|(id, (_, role))| (id, role))
        .collect()
}
