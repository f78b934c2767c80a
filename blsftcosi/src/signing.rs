//! Collective Signing Protocol
//!
//! The round is carried out by independent participants that only talk through addressed
//! messages. Tree root runs the [orchestrator](root), every other participant runs
//! [`serve`](subtree::ParticipantBuilder::serve).
//!
//! 1. Root [partitions](crate::partition) the tree and sends [`Msg::Start`] to the leader of
//!    every subtree.
//! 2. Each leader carries out a [subtree round](subtree):
//!    * **Announcement** ([`Msg::Announce`]) is pushed down the subtree. Every member decides
//!      whether it's willing to sign the proposal, and if it does, it signs and commits to the
//!      signature share.
//!    * **Commitment** ([`Msg::Commit`]): commitments and refusals flow up, every member merges
//!      reports of its children with its own.
//!    * **Challenge** ([`Msg::Challenge`]): leader asks committed members to reveal their shares.
//!    * **Response** ([`Msg::Respond`]): shares flow up, leader checks every share against its
//!      commitment and verifies it individually, and folds valid ones into a
//!      [partial aggregate](aggregate::PartialAggregate).
//!
//!    Members that don't report in time are simply excluded.
//! 3. Leader reports the [outcome](SubtreeOutcome) to the root ([`Msg::Outcome`]). Root combines
//!    all partial aggregates with its own share, verifies the result, and evaluates the policy.

use core::{fmt, time::Duration};

use digest::Digest;

use crate::{
    partition::{Subtree, SubtreeId},
    ParticipantIndex, Policy, Scheme,
};

pub mod aggregate;
mod link;
pub mod root;
pub mod subtree;

pub use self::link::IoError;

/// Message of the collective signing protocol
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Msg {
    /// Root asks a subtree leader to run the subtree round
    Start(Start),
    /// Proposal pushed down the subtree
    Announce(Announce),
    /// Commitments of a member and its descendants
    Commit(Commit),
    /// Request to reveal signature shares
    Challenge(Challenge),
    /// Signature shares of a member and its descendants
    Respond(Respond),
    /// Subtree leader reports the outcome to the root
    Outcome(Outcome),
}

impl Msg {
    /// Round the message belongs to
    pub fn round(&self) -> RoundId {
        match self {
            Msg::Start(m) => m.round,
            Msg::Announce(m) => m.round,
            Msg::Commit(m) => m.round,
            Msg::Challenge(m) => m.round,
            Msg::Respond(m) => m.round,
            Msg::Outcome(m) => m.round,
        }
    }
}

/// Root asks a subtree leader to run the subtree round
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Start {
    /// Round identifier
    pub round: RoundId,
    /// Message to be signed
    pub msg: Vec<u8>,
    /// Subtree to be led by the recipient
    pub subtree: Subtree,
    /// Timeout of each phase of the subtree round
    pub phase_timeout: Duration,
    /// Acceptance policy of the round
    pub policy: Policy,
}

/// Proposal pushed down the subtree
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Announce {
    /// Round identifier
    pub round: RoundId,
    /// Message to be signed
    pub msg: Vec<u8>,
    /// Subtree the recipient belongs to
    pub subtree: Subtree,
    /// Timeout of each phase of the subtree round, as set by the leader
    pub phase_timeout: Duration,
}

/// Commitments of a member and its descendants
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Commit {
    /// Round identifier
    pub round: RoundId,
    /// Members who signed the proposal, with commitments to their shares
    pub committed: Vec<(ParticipantIndex, Commitment)>,
    /// Members who refused to sign the proposal
    pub refused: Vec<ParticipantIndex>,
}

/// Request to reveal signature shares
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Challenge {
    /// Round identifier
    pub round: RoundId,
    /// Members whose shares are requested
    pub include: Vec<ParticipantIndex>,
}

/// Signature shares of a member and its descendants
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Respond {
    /// Round identifier
    pub round: RoundId,
    /// Revealed signature shares
    pub shares: Vec<(ParticipantIndex, Vec<u8>)>,
}

/// Subtree leader reports the outcome to the root
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Outcome {
    /// Round identifier
    pub round: RoundId,
    /// Subtree round outcome
    pub outcome: SubtreeOutcome,
}

/// Terminal state of a subtree round
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubtreeOutcome {
    /// Every member of the subtree signed
    Done(aggregate::PartialAggregate),
    /// Some members were excluded, remaining ones signed
    Partial(aggregate::PartialAggregate),
    /// Subtree didn't produce any usable signature
    Failed(subtree::SubtreeFailure),
}

impl SubtreeOutcome {
    /// Subtree the outcome refers to
    pub fn subtree(&self) -> SubtreeId {
        match self {
            SubtreeOutcome::Done(p) | SubtreeOutcome::Partial(p) => p.subtree,
            SubtreeOutcome::Failed(f) => f.subtree,
        }
    }
}

/// Round identifier
///
/// Randomly chosen by the root for each round. Participants ignore messages that belong to
/// any other round than the one they take part in.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoundId(pub [u8; 16]);

impl RoundId {
    /// Samples a random round id
    pub fn random(rng: &mut impl rand_core::RngCore) -> Self {
        let mut id = [0u8; 16];
        rng.fill_bytes(&mut id);
        Self(id)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl fmt::Debug for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoundId({self})")
    }
}

/// Commitment to a signature share
///
/// `SHA-256(scheme name || round id || participant index || share)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    /// Commits to the signature `share` issued by participant `i` in the `round`
    pub fn new<S: Scheme>(round: RoundId, i: ParticipantIndex, share: &[u8]) -> Self {
        let hash = sha2::Sha256::new()
            .chain_update(S::NAME)
            .chain_update(round.0)
            .chain_update(i.to_be_bytes())
            .chain_update(share)
            .finalize();
        Self(hash.into())
    }

    /// Checks that the commitment was made to the `share`
    pub fn opens_to<S: Scheme>(&self, round: RoundId, i: ParticipantIndex, share: &[u8]) -> bool {
        *self == Self::new::<S>(round, i, share)
    }
}
