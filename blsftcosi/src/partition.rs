//! Tree partitioning
//!
//! Before the round starts, the root splits participants into subtrees that sign in parallel.
//! Subtrees are disjoint and together cover every participant except the root. Each subtree
//! is led by its own root, the subtree leader.
//!
//! Balancing is a heuristic that attempts to minimize the size of the biggest subtree:
//! 1. Start with one subtree per direct child of the root, containing the whole child's branch.
//! 2. While there are fewer subtrees than requested, the biggest subtree is split: the largest
//!    branch hanging off its leader becomes a subtree on its own.
//! 3. While there are more subtrees than requested, the two smallest subtrees are merged: the
//!    smaller one is grafted under the other one's leader.
//!
//! As a result, leaders are direct children of the root whenever the number of subtrees doesn't
//! exceed the number of root's children.

use crate::{signing::root::ConfigError, ParticipantIndex, Scheme, Tree};

/// Identifier of a subtree within a round
pub type SubtreeId = u16;

/// Disjoint part of the tree, handled as one parallel unit of the signing round
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Subtree {
    id: SubtreeId,
    /// Members along with their parent within the subtree, every parent precedes its children.
    /// Leader goes first and is the only member without a parent.
    members: Vec<(ParticipantIndex, Option<ParticipantIndex>)>,
}

impl Subtree {
    /// Identifier of the subtree
    pub fn id(&self) -> SubtreeId {
        self.id
    }

    /// Leader of the subtree
    pub fn leader(&self) -> ParticipantIndex {
        // Subtrees are never empty
        self.members.first().map(|(i, _)| *i).unwrap_or_default()
    }

    /// Number of members, leader included
    pub fn len(&self) -> u16 {
        // Subtree can't have more members than the tree
        self.members.len() as u16
    }

    /// Always `false`: subtree contains at least the leader
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members of the subtree, leader first
    pub fn members(&self) -> impl Iterator<Item = ParticipantIndex> + '_ {
        self.members.iter().map(|(i, _)| *i)
    }

    /// Checks whether participant `i` is a member of the subtree
    pub fn contains(&self, i: ParticipantIndex) -> bool {
        self.members.iter().any(|(j, _)| *j == i)
    }

    /// Parent of member `i` within the subtree
    ///
    /// Returns `None` for the leader and for participants that aren't members
    pub fn parent(&self, i: ParticipantIndex) -> Option<ParticipantIndex> {
        self.members
            .iter()
            .find(|(j, _)| *j == i)
            .and_then(|(_, parent)| *parent)
    }

    /// Children of member `i` within the subtree
    pub fn children(&self, i: ParticipantIndex) -> Vec<ParticipantIndex> {
        self.members
            .iter()
            .filter(|(_, parent)| *parent == Some(i))
            .map(|(j, _)| *j)
            .collect()
    }

    /// Member `i` followed by all its descendants within the subtree
    pub fn branch(&self, i: ParticipantIndex) -> Vec<ParticipantIndex> {
        let mut out = vec![];
        if !self.contains(i) {
            return out;
        }
        let mut stack = vec![i];
        while let Some(j) = stack.pop() {
            out.push(j);
            stack.extend(self.children(j).into_iter().rev());
        }
        out
    }

    /// Depth of member `i` within the subtree: `0` for the leader, `1` for its children, etc.
    pub fn depth(&self, i: ParticipantIndex) -> Option<u16> {
        if !self.contains(i) {
            return None;
        }
        let mut depth = 0;
        let mut current = i;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        Some(depth)
    }

    /// Number of levels below member `i` within the subtree: `0` for a leaf
    pub fn height(&self, i: ParticipantIndex) -> Option<u16> {
        let base = self.depth(i)?;
        self.branch(i)
            .into_iter()
            .filter_map(|j| self.depth(j))
            .max()
            .map(|deepest| deepest - base)
    }

    /// Checks that the subtree is well-formed: it's not empty, has exactly one leader, each
    /// member appears once and parents are members of the subtree
    pub fn is_well_formed(&self, tree_size: u16) -> bool {
        let Some((_, None)) = self.members.first() else {
            return false;
        };
        let mut seen = vec![false; usize::from(tree_size)];
        for (i, (member, parent)) in self.members.iter().enumerate() {
            match seen.get_mut(usize::from(*member)) {
                Some(seen) if !*seen => *seen = true,
                _ => return false,
            }
            match parent {
                None if i == 0 => continue,
                None => return false,
                Some(p) if !self.members[..i].iter().any(|(j, _)| j == p) => return false,
                Some(_) => continue,
            }
        }
        true
    }
}

/// Splits the `tree` into `n` subtrees covering all participants except the root
///
/// Returns error if `n == 0`, or if `n` exceeds the number of non-root participants.
pub fn partition<S: Scheme>(tree: &Tree<S>, n: u16) -> Result<Vec<Subtree>, ConfigError> {
    let available = tree.len() - 1;
    if n == 0 || n > available {
        return Err(ConfigError::SubtreesCount {
            requested: n,
            available,
        });
    }

    let mut groups = tree
        .children(tree.root())
        .iter()
        .map(|&child| Group {
            members: tree
                .branch(child)
                .into_iter()
                .map(|i| (i, if i == child { None } else { tree.parent(i) }))
                .collect(),
        })
        .collect::<Vec<_>>();

    while groups.len() < usize::from(n) {
        let Some(largest) = position_of_max(&groups) else {
            break;
        };
        let Some(detached) = groups[largest].split() else {
            // Largest group consists of the leader only, therefore every group does. It can't
            // happen as long as `n` doesn't exceed number of non-root participants.
            break;
        };
        groups.push(detached);
    }

    while groups.len() > usize::from(n) {
        groups.sort_by_key(|g| g.members.len());
        let smallest = groups.remove(0);
        groups[0].graft(smallest);
    }

    groups.sort_by_key(|g| g.leader());
    Ok(groups
        .into_iter()
        .zip(0..)
        .map(|(group, id)| Subtree {
            id,
            members: group.members,
        })
        .collect())
}

struct Group {
    /// Members along with their parent, parents precede children, leader goes first
    members: Vec<(ParticipantIndex, Option<ParticipantIndex>)>,
}

impl Group {
    fn leader(&self) -> ParticipantIndex {
        self.members.first().map(|(i, _)| *i).unwrap_or_default()
    }

    fn branch_size(&self, i: ParticipantIndex) -> usize {
        self.branch(i).len()
    }

    fn branch(&self, i: ParticipantIndex) -> Vec<ParticipantIndex> {
        let mut out = vec![];
        let mut stack = vec![i];
        while let Some(j) = stack.pop() {
            out.push(j);
            stack.extend(
                self.members
                    .iter()
                    .filter(|(_, parent)| *parent == Some(j))
                    .map(|(k, _)| *k),
            );
        }
        out
    }

    /// Detaches the largest branch hanging off the leader
    ///
    /// Returns `None` if the leader has no children
    fn split(&mut self) -> Option<Group> {
        let leader = self.leader();
        let child = self
            .members
            .iter()
            .filter(|(_, parent)| *parent == Some(leader))
            .map(|(i, _)| *i)
            // ties are resolved in favour of the first child
            .rev()
            .max_by_key(|i| self.branch_size(*i))?;

        let branch = self.branch(child);
        let (detached, kept) = self
            .members
            .drain(..)
            .partition::<Vec<_>, _>(|(i, _)| branch.contains(i));
        self.members = kept;

        Some(Group {
            members: detached
                .into_iter()
                .map(|(i, parent)| (i, if i == child { None } else { parent }))
                .collect(),
        })
    }

    /// Attaches the `other` group under this group's leader
    fn graft(&mut self, other: Group) {
        let leader = self.leader();
        let other_leader = other.leader();
        self.members
            .extend(other.members.into_iter().map(|(i, parent)| {
                (i, if i == other_leader { Some(leader) } else { parent })
            }));
    }
}

fn position_of_max(groups: &[Group]) -> Option<usize> {
    groups
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, g)| g.members.len())
        .map(|(i, _)| i)
}
