//! Communication tree
//!
//! Tree defines how participants are arranged and serves as a directory of their public keys.
//! It's built by the caller before signing starts and is only read by the protocol.
//!
//! Participants are identified by their [index](ParticipantIndex) in the tree. The root always
//! has index `0`, and every other participant has a parent with a smaller index, which makes
//! any valid parents list acyclic by construction.

use core::fmt;

use crate::{ParticipantIndex, Scheme};

/// Rooted, ordered tree of participants
#[derive(Clone)]
pub struct Tree<S: Scheme> {
    nodes: Vec<Node<S>>,
}

#[derive(Clone)]
struct Node<S: Scheme> {
    public_key: S::PublicKey,
    parent: Option<ParticipantIndex>,
    children: Vec<ParticipantIndex>,
}

impl<S: Scheme> Tree<S> {
    /// Constructs a tree from the list of public keys and parent of each participant
    ///
    /// `parents[0]` must be `None` (root), and `parents[i]` must be `Some(j)` with `j < i` for
    /// any other participant. Children of each participant are ordered by their indexes.
    pub fn from_parents(
        public_keys: Vec<S::PublicKey>,
        parents: &[Option<ParticipantIndex>],
    ) -> Result<Self, InvalidTree> {
        if public_keys.is_empty() {
            return Err(Reason::Empty.into());
        }
        if public_keys.len() > usize::from(ParticipantIndex::MAX) {
            return Err(Reason::TooManyParticipants.into());
        }
        if public_keys.len() != parents.len() {
            return Err(Reason::ParentsLength {
                keys: public_keys.len(),
                parents: parents.len(),
            }
            .into());
        }

        let mut nodes = public_keys
            .into_iter()
            .zip(parents)
            .map(|(public_key, &parent)| Node::<S> {
                public_key,
                parent,
                children: vec![],
            })
            .collect::<Vec<_>>();

        for (i, parent) in parents.iter().enumerate() {
            // Length was checked above, index fits into u16
            let i = i as ParticipantIndex;
            match (i, parent) {
                (0, None) => continue,
                (0, Some(_)) => return Err(Reason::RootHasParent.into()),
                (_, None) => return Err(Reason::SecondRoot(i).into()),
                (_, Some(p)) if *p >= i => return Err(Reason::ParentAfterChild(i).into()),
                (_, Some(p)) => nodes[usize::from(*p)].children.push(i),
            }
        }

        Ok(Self { nodes })
    }

    /// Constructs a complete tree where every participant has up to `branching` children
    ///
    /// Participants are laid out in breadth-first order: the parent of participant `i > 0`
    /// is `(i - 1) / branching`.
    pub fn nary(public_keys: Vec<S::PublicKey>, branching: u16) -> Result<Self, InvalidTree> {
        if branching == 0 {
            return Err(Reason::ZeroBranching.into());
        }
        let n = u16::try_from(public_keys.len()).map_err(|_| Reason::TooManyParticipants)?;
        let parents = (0..n)
            .map(|i| i.checked_sub(1).map(|i| i / branching))
            .collect::<Vec<_>>();
        Self::from_parents(public_keys, &parents)
    }

    /// Number of participants in the tree (root included)
    pub fn len(&self) -> u16 {
        // `from_parents` ensures that the length fits into u16
        self.nodes.len() as u16
    }

    /// Always `false`: a tree contains at least the root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the root
    pub fn root(&self) -> ParticipantIndex {
        0
    }

    /// Public key of participant `i`
    pub fn public_key(&self, i: ParticipantIndex) -> Option<&S::PublicKey> {
        self.nodes.get(usize::from(i)).map(|n| &n.public_key)
    }

    /// Public keys of all participants ordered by their indexes
    pub fn public_keys(&self) -> Vec<S::PublicKey> {
        self.nodes.iter().map(|n| n.public_key.clone()).collect()
    }

    /// Parent of participant `i`, `None` for the root or out-of-range index
    pub fn parent(&self, i: ParticipantIndex) -> Option<ParticipantIndex> {
        self.nodes.get(usize::from(i)).and_then(|n| n.parent)
    }

    /// Children of participant `i`, ordered by their indexes
    pub fn children(&self, i: ParticipantIndex) -> &[ParticipantIndex] {
        self.nodes
            .get(usize::from(i))
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Participant `i` followed by all its descendants, in pre-order
    pub fn branch(&self, i: ParticipantIndex) -> Vec<ParticipantIndex> {
        let mut out = vec![];
        if usize::from(i) >= self.nodes.len() {
            return out;
        }
        let mut stack = vec![i];
        while let Some(j) = stack.pop() {
            out.push(j);
            stack.extend(self.children(j).iter().rev());
        }
        out
    }
}

impl<S: Scheme> fmt::Debug for Tree<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field(
                "parents",
                &self.nodes.iter().map(|n| n.parent).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Tree couldn't be constructed
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct InvalidTree(#[from] Reason);

#[derive(Debug, thiserror::Error)]
enum Reason {
    #[error("tree must contain at least one participant")]
    Empty,
    #[error("number of participants overflows u16")]
    TooManyParticipants,
    #[error("got {keys} public keys, but {parents} parents")]
    ParentsLength { keys: usize, parents: usize },
    #[error("root can not have a parent")]
    RootHasParent,
    #[error("participant {0} has no parent, but only root may have no parent")]
    SecondRoot(ParticipantIndex),
    #[error("parent of participant {0} must have a smaller index")]
    ParentAfterChild(ParticipantIndex),
    #[error("branching factor must be at least 1")]
    ZeroBranching,
}
