//! Deterministic construction of the multi-level group overlay from the
//! directory's shared randomness seed.

use ark_ec::CurveGroup;

use crate::config::{log2, NetworkKind, Seed, SystemConfig};
use crate::crypto::rand::SeedReader;

/// One node of the overlay: a group of servers at a given level.
///
/// The overlay is a DAG with levels strictly increasing, stored as a 2-D
/// arena indexed by `(level, gid)`; `adj` holds indices into the next
/// level, never references.
#[derive(Clone, Debug)]
pub struct Group<C: CurveGroup> {
    /// Server ids, sorted then rotated so the leader role cycles by gid.
    pub members: Vec<usize>,
    /// Members' long-term public keys, in member order.
    pub member_keys: Vec<C>,
    /// Joint group key; filled in after DKG or key combination.
    pub group_key: Option<C>,
    pub level: usize,
    pub gid: usize,
    /// Globally unique across all `(level, gid)` pairs.
    pub uid: u64,
    /// `(level + 1, gid)` pairs; empty at the last level.
    pub adj: Vec<(usize, usize)>,
}

/// The full overlay: `levels[level][gid]`.
#[derive(Clone, Debug)]
pub struct Overlay<C: CurveGroup> {
    pub levels: Vec<Vec<Group<C>>>,
}

impl<C: CurveGroup> Overlay<C> {
    pub fn group(&self, level: usize, gid: usize) -> &Group<C> {
        &self.levels[level][gid]
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Groups at the last level, which extract rather than forward.
    pub fn last_level(&self) -> &[Group<C>] {
        self.levels
            .last()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Draw `per_group` distinct server ids.
fn gen_random_group(num_servers: usize, per_group: usize, rand: &mut SeedReader) -> Vec<usize> {
    let mut group: Vec<usize> = Vec::with_capacity(per_group);
    while group.len() < per_group {
        let candidate = rand.read_below(num_servers);
        if !group.contains(&candidate) {
            group.push(candidate);
        }
    }
    group
}

/// Deterministically build the overlay. Two calls with identical inputs
/// produce structurally equal overlays: same members, same adjacency,
/// identical uids.
pub fn generate_groups<C: CurveGroup>(
    seed: Seed,
    params: &SystemConfig,
    public_keys: &[C],
) -> Overlay<C> {
    let mut rand = SeedReader::new(&seed);

    // The same base assignment is replicated across every level; only the
    // uid and adjacency vary per level.
    let mut base_groups = Vec::with_capacity(params.num_groups);
    for gid in 0..params.num_groups {
        let mut members = gen_random_group(params.num_servers, params.per_group, &mut rand);
        members.sort_unstable();
        members.rotate_left(gid % params.per_group);
        base_groups.push(members);
    }

    let mut used_uids = std::collections::HashSet::new();
    let mut levels = Vec::with_capacity(params.num_levels);
    for level in 0..params.num_levels {
        let mut groups = Vec::with_capacity(params.num_groups);
        for (gid, members) in base_groups.iter().enumerate() {
            let member_keys = members.iter().map(|&m| public_keys[m]).collect();
            let uid = loop {
                let candidate = rand.read_u64();
                if used_uids.insert(candidate) {
                    break candidate;
                }
            };
            groups.push(Group {
                members: members.clone(),
                member_keys,
                group_key: None,
                level,
                gid,
                uid,
                adj: Vec::new(),
            });
        }
        levels.push(groups);
    }

    for level in 0..params.num_levels.saturating_sub(1) {
        for gid in 0..params.num_groups {
            levels[level][gid].adj = match params.net {
                NetworkKind::Butterfly => {
                    let shift = level % log2(params.num_groups);
                    let cross = gid ^ (1 << shift);
                    vec![(level + 1, gid), (level + 1, cross)]
                }
                NetworkKind::Square => {
                    (0..params.num_groups).map(|n| (level + 1, n)).collect()
                }
            };
        }
    }

    Overlay { levels }
}
