//! Subtree Round
//!
//! Subtree round is led by the subtree leader after the root asks it to [start](Msg::Start),
//! and runs concurrently with all sibling subtrees. It goes through the following states:
//!
//! * **Announced**: leader pushes the proposal down the subtree. Every member forwards it to
//!   its own children, decides whether it's willing to sign the proposal, and if so, signs it
//!   and commits to the signature share.
//! * **Committed**: commitments and refusals flow up the subtree. Each member waits for reports
//!   of its children until its deadline, merges them with its own and forwards the result to
//!   its parent. Children that didn't report in time are left out.
//! * **Responded**: leader requests shares of committed members; the request only goes down
//!   the branches that committed. Shares flow up the same way as commitments.
//! * **Done**: leader checks that each share opens its commitment and verifies it against the
//!   message and member's public key. Valid shares are combined into a
//!   [partial aggregate](PartialAggregate), the mask records accepted members only.
//!   Rejected or missing shares never abort the subtree round.
//! * **Failed**: no share is usable, or none besides the leader's own while the policy can't be
//!   satisfied even if every participant outside of the subtree signs.
//!
//! Timeouts: leader waits `phase_timeout` in each phase. Any other member waits for its children
//! `phase_timeout * h / H`, where `h` is the height of the member's branch and `H` is the height
//! of the whole subtree. Every hop down the subtree thus gets an equal slice of `phase_timeout`,
//! and a member always gives up before its parent does. Members give up waiting for the share
//! request after `2 * phase_timeout`.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use core::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use crate::{
    partition::{Subtree, SubtreeId},
    signing::{
        aggregate::PartialAggregate, link::Link, Announce, Challenge, Commit, Commitment,
        IoError, Msg, Outcome, Respond, RoundId, Start, SubtreeOutcome,
    },
    Mask, ParticipantIndex, Scheme, Tree,
};

/// Decides whether a participant is willing to sign the proposed message
///
/// Called once per round by every participant before it commits. Returning `false` makes the
/// participant refuse: it still relays messages of its children, but its own share is never
/// produced. Implemented for any `Fn(ParticipantIndex, &[u8]) -> bool` closure.
pub trait Verification: Send + Sync + 'static {
    /// Decides whether participant `i` signs `msg`
    fn verify(&self, i: ParticipantIndex, msg: &[u8]) -> bool;
}

impl<F> Verification for F
where
    F: Fn(ParticipantIndex, &[u8]) -> bool + Send + Sync + 'static,
{
    fn verify(&self, i: ParticipantIndex, msg: &[u8]) -> bool {
        self(i, msg)
    }
}

/// Signs any proposal
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Verification for AcceptAll {
    fn verify(&self, _i: ParticipantIndex, _msg: &[u8]) -> bool {
        true
    }
}

/// Builder of a participant taking part in a signing round
pub struct ParticipantBuilder<S: Scheme, V = AcceptAll> {
    i: ParticipantIndex,
    tree: Arc<Tree<S>>,
    secret_key: S::SecretKey,
    verification: V,
}

impl<S: Scheme> ParticipantBuilder<S> {
    /// Constructs a participant builder
    ///
    /// It could be easier to use [participant](crate::participant()) function located in the crate root.
    pub fn new(i: ParticipantIndex, tree: Arc<Tree<S>>, secret_key: S::SecretKey) -> Self {
        Self {
            i,
            tree,
            secret_key,
            verification: AcceptAll,
        }
    }
}

impl<S: Scheme, V: Verification> ParticipantBuilder<S, V> {
    /// Specifies how the participant decides whether to sign a proposal
    pub fn set_verification<W: Verification>(self, verification: W) -> ParticipantBuilder<S, W> {
        ParticipantBuilder {
            i: self.i,
            tree: self.tree,
            secret_key: self.secret_key,
            verification,
        }
    }

    /// Takes part in a single signing round
    ///
    /// Waits until the participant is either asked by the root to lead a subtree round, or
    /// reached by the announcement of its subtree. Returns once the participant has played its
    /// part, or once it realizes it was excluded from the round.
    pub async fn serve<M>(self, party: M) -> Result<(), ParticipantError>
    where
        M: round_based::Mpc<ProtocolMessage = Msg>,
    {
        if self.i == self.tree.root() {
            return Err(ParticipantError::IsRoot);
        }
        if self.tree.public_key(self.i).is_none() {
            return Err(ParticipantError::NotInTree(self.i));
        }

        let round_based::MpcParty { delivery, .. } = party.into_party();
        let mut link = Link::new(delivery);

        let participant = Participant {
            i: self.i,
            tree: &self.tree,
            secret_key: &self.secret_key,
            verification: &self.verification,
        };
        participant
            .serve(&mut link)
            .instrument(tracing::debug_span!("participant", i = self.i))
            .await
    }
}

struct Participant<'a, S: Scheme, V> {
    i: ParticipantIndex,
    tree: &'a Tree<S>,
    secret_key: &'a S::SecretKey,
    verification: &'a V,
}

impl<'a, S: Scheme, V: Verification> Participant<'a, S, V> {
    async fn serve<D: round_based::Delivery<Msg>>(
        &self,
        link: &mut Link<D>,
    ) -> Result<(), ParticipantError> {
        loop {
            let Some(incoming) = link.recv(None).await? else {
                continue;
            };
            match incoming.msg {
                Msg::Start(start) if incoming.sender == self.tree.root() => {
                    if start.subtree.leader() != self.i
                        || !start.subtree.is_well_formed(self.tree.len())
                    {
                        warn!(round = %start.round, "ignore malformed start request");
                        continue;
                    }
                    return self.lead(link, start).await;
                }
                Msg::Announce(announce) => {
                    if announce.subtree.parent(self.i) != Some(incoming.sender)
                        || !announce.subtree.is_well_formed(self.tree.len())
                    {
                        warn!(
                            round = %announce.round,
                            sender = incoming.sender,
                            "ignore announcement that doesn't come from the parent"
                        );
                        continue;
                    }
                    return self.relay(link, incoming.sender, announce).await;
                }
                msg => debug!(
                    round = %msg.round(),
                    sender = incoming.sender,
                    "ignore message: not taking part in any round"
                ),
            }
        }
    }

    /// Signs `msg` if the participant accepts it
    fn sign(&self, msg: &[u8]) -> Option<Vec<u8>> {
        if self.verification.verify(self.i, msg) {
            Some(S::sign(self.secret_key, msg))
        } else {
            debug!("refuse to sign the proposal");
            None
        }
    }

    /// Takes part in the subtree round as a member under `parent`
    async fn relay<D: round_based::Delivery<Msg>>(
        &self,
        link: &mut Link<D>,
        parent: ParticipantIndex,
        announce: Announce,
    ) -> Result<(), ParticipantError> {
        let Announce {
            round,
            msg,
            subtree,
            phase_timeout,
        } = announce;
        let branch = Branch {
            i: self.i,
            round,
            subtree: &subtree,
        };
        let wait = branch.wait(phase_timeout);

        // Announcement
        branch.announce(link, &msg, phase_timeout).await?;
        let share = self.sign(&msg);

        // Commitment
        let mut commitments = Commitments::default();
        commitments.add_own::<S>(round, self.i, share.as_deref());
        branch
            .collect_commitments(link, &mut commitments, Instant::now() + wait)
            .await?;
        link.send(parent, Msg::Commit(commitments.to_msg(round)))
            .await?;

        // Challenge
        let deadline = Instant::now() + phase_timeout * 2;
        let include = loop {
            let Some(incoming) = link.recv_round(round, Some(deadline)).await? else {
                debug!(%round, "no share request received, excluded from the round");
                return Ok(());
            };
            match incoming.msg {
                Msg::Challenge(challenge) if incoming.sender == parent => {
                    break challenge.include.into_iter().collect::<BTreeSet<_>>()
                }
                _ => debug!(%round, sender = incoming.sender, "ignore unexpected message"),
            }
        };

        // Response
        let mut shares = BTreeMap::new();
        if let (Some(share), true) = (share, include.contains(&self.i)) {
            shares.insert(self.i, share);
        }
        branch
            .collect_shares(link, &include, &mut shares, Instant::now() + wait)
            .await?;
        link.send(
            parent,
            Msg::Respond(Respond {
                round,
                shares: shares.into_iter().collect(),
            }),
        )
        .await?;

        debug!(%round, "done");
        Ok(())
    }

    /// Leads the subtree round
    async fn lead<D: round_based::Delivery<Msg>>(
        &self,
        link: &mut Link<D>,
        start: Start,
    ) -> Result<(), ParticipantError> {
        let round = start.round;
        let subtree_id = start.subtree.id();
        let outcome = SubRound {
            participant: self,
            start: &start,
            phase: Phase::Announced,
        }
        .run(link)
        .instrument(tracing::debug_span!("subtree", id = subtree_id))
        .await?;

        link.send(
            self.tree.root(),
            Msg::Outcome(Outcome { round, outcome }),
        )
        .await?;
        Ok(())
    }
}

/// Phase of the subtree round, as seen by its leader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Announced,
    Committed,
    Responded,
    Done,
}

struct SubRound<'p, 'a, S: Scheme, V> {
    participant: &'p Participant<'a, S, V>,
    start: &'p Start,
    phase: Phase,
}

impl<'p, 'a, S: Scheme, V: Verification> SubRound<'p, 'a, S, V> {
    fn advance(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "subtree round transition");
        self.phase = next;
    }

    async fn run<D: round_based::Delivery<Msg>>(
        mut self,
        link: &mut Link<D>,
    ) -> Result<SubtreeOutcome, IoError> {
        let start = self.start;
        let Start {
            round,
            msg,
            subtree,
            phase_timeout,
            policy: _,
        } = start;
        let (round, phase_timeout) = (*round, *phase_timeout);
        let leader = self.participant.i;
        let branch = Branch {
            i: leader,
            round,
            subtree,
        };

        // Announced
        branch.announce(link, msg, phase_timeout).await?;
        let own_share = self.participant.sign(msg);
        let mut commitments = Commitments::default();
        commitments.add_own::<S>(round, leader, own_share.as_deref());
        branch
            .collect_commitments(link, &mut commitments, Instant::now() + phase_timeout)
            .await?;
        self.advance(Phase::Committed);

        // Committed: request shares of everyone who committed
        let include = commitments
            .committed
            .keys()
            .copied()
            .filter(|j| *j != leader)
            .collect::<BTreeSet<_>>();
        let mut shares = BTreeMap::new();
        if !include.is_empty() {
            branch
                .collect_shares(link, &include, &mut shares, Instant::now() + phase_timeout)
                .await?;
        }
        self.advance(Phase::Responded);

        // Responded: verify every share individually
        let mut accepted = vec![];
        if let Some(share) = own_share {
            shares.insert(leader, share);
        }
        for (j, share) in shares {
            match self.check_share(&commitments, j, &share) {
                Ok(()) => accepted.push((j, share)),
                Err(reason) => warn!(member = j, %reason, "share rejected"),
            }
        }

        let outcome = self.conclude(accepted);
        self.advance(Phase::Done);
        Ok(outcome)
    }

    fn check_share(
        &self,
        commitments: &Commitments,
        j: ParticipantIndex,
        share: &[u8],
    ) -> Result<(), &'static str> {
        let commitment = commitments
            .committed
            .get(&j)
            .ok_or("member didn't commit")?;
        if !commitment.opens_to::<S>(self.start.round, j, share) {
            return Err("share doesn't match the commitment");
        }
        let public_key = self
            .participant
            .tree
            .public_key(j)
            .ok_or("unknown member")?;
        S::verify_share(public_key, &self.start.msg, share).map_err(|_| "invalid share")
    }

    fn conclude(&self, accepted: Vec<(ParticipantIndex, Vec<u8>)>) -> SubtreeOutcome {
        let subtree = &self.start.subtree;
        let leader = self.participant.i;
        let total = self.participant.tree.len();
        let excluded = subtree.len() - accepted.len() as u16;
        let failure = SubtreeFailure {
            subtree: subtree.id(),
            excluded,
        };

        let others_signed = accepted.iter().any(|(j, _)| *j != leader);
        let feasible = self.start.policy.check(total, total - excluded);
        if accepted.is_empty() || (!others_signed && !feasible) {
            warn!(excluded, "subtree failed");
            return SubtreeOutcome::Failed(failure);
        }

        let mut mask = Mask::new(total);
        for (j, _) in &accepted {
            if mask.set(*j).is_err() {
                warn!(member = j, "member is out of range");
                return SubtreeOutcome::Failed(failure);
            }
        }
        let parts = accepted
            .iter()
            .map(|(_, share)| share.as_slice())
            .collect::<Vec<_>>();
        let signature = match S::combine(&parts) {
            Ok(signature) => signature,
            Err(err) => {
                warn!(%err, "couldn't combine verified shares");
                return SubtreeOutcome::Failed(failure);
            }
        };

        let partial = PartialAggregate {
            subtree: subtree.id(),
            signature,
            mask,
        };
        if excluded == 0 {
            debug!("every member signed");
            SubtreeOutcome::Done(partial)
        } else {
            debug!(excluded, "some members were excluded");
            SubtreeOutcome::Partial(partial)
        }
    }
}

/// Position of a participant within the subtree round
struct Branch<'s> {
    i: ParticipantIndex,
    round: RoundId,
    subtree: &'s Subtree,
}

impl<'s> Branch<'s> {
    fn children(&self) -> Vec<ParticipantIndex> {
        self.subtree.children(self.i)
    }

    /// How long the member waits for reports of its children in each phase
    fn wait(&self, phase_timeout: Duration) -> Duration {
        let height = self.subtree.height(self.i).unwrap_or(0);
        let total = self.subtree.height(self.subtree.leader()).unwrap_or(0);
        if total == 0 {
            return Duration::ZERO;
        }
        phase_timeout.mul_f64(f64::from(height) / f64::from(total))
    }

    async fn announce<D: round_based::Delivery<Msg>>(
        &self,
        link: &mut Link<D>,
        msg: &[u8],
        phase_timeout: Duration,
    ) -> Result<(), IoError> {
        for child in self.children() {
            link.send(
                child,
                Msg::Announce(Announce {
                    round: self.round,
                    msg: msg.to_vec(),
                    subtree: self.subtree.clone(),
                    phase_timeout,
                }),
            )
            .await?;
        }
        Ok(())
    }

    /// Collects commitments of the children until all of them reported or `deadline` is reached
    async fn collect_commitments<D: round_based::Delivery<Msg>>(
        &self,
        link: &mut Link<D>,
        commitments: &mut Commitments,
        deadline: Instant,
    ) -> Result<(), IoError> {
        let mut pending = self.children();
        while !pending.is_empty() {
            let Some(incoming) = link.recv_round(self.round, Some(deadline)).await? else {
                warn!(missing = ?pending, "children didn't commit in time");
                break;
            };
            match incoming.msg {
                Msg::Commit(commit) if pending.contains(&incoming.sender) => {
                    pending.retain(|c| *c != incoming.sender);
                    commitments.absorb(commit, &self.subtree.branch(incoming.sender));
                }
                _ => debug!(sender = incoming.sender, "ignore unexpected message"),
            }
        }
        Ok(())
    }

    /// Requests shares of `include` members and collects them until all requested children
    /// responded or `deadline` is reached
    async fn collect_shares<D: round_based::Delivery<Msg>>(
        &self,
        link: &mut Link<D>,
        include: &BTreeSet<ParticipantIndex>,
        shares: &mut BTreeMap<ParticipantIndex, Vec<u8>>,
        deadline: Instant,
    ) -> Result<(), IoError> {
        let mut pending = vec![];
        for child in self.children() {
            if !self
                .subtree
                .branch(child)
                .iter()
                .any(|j| include.contains(j))
            {
                continue;
            }
            link.send(
                child,
                Msg::Challenge(Challenge {
                    round: self.round,
                    include: include.iter().copied().collect(),
                }),
            )
            .await?;
            pending.push(child);
        }

        while !pending.is_empty() {
            let Some(incoming) = link.recv_round(self.round, Some(deadline)).await? else {
                warn!(missing = ?pending, "children didn't respond in time");
                break;
            };
            match incoming.msg {
                Msg::Respond(respond) if pending.contains(&incoming.sender) => {
                    pending.retain(|c| *c != incoming.sender);
                    let branch = self.subtree.branch(incoming.sender);
                    for (j, share) in respond.shares {
                        if branch.contains(&j) && include.contains(&j) {
                            shares.entry(j).or_insert(share);
                        }
                    }
                }
                _ => debug!(sender = incoming.sender, "ignore unexpected message"),
            }
        }
        Ok(())
    }
}

/// Commitments and refusals reported by a branch of the subtree
#[derive(Default)]
struct Commitments {
    committed: BTreeMap<ParticipantIndex, Commitment>,
    refused: BTreeSet<ParticipantIndex>,
}

impl Commitments {
    fn add_own<S: Scheme>(&mut self, round: RoundId, i: ParticipantIndex, share: Option<&[u8]>) {
        match share {
            Some(share) => {
                self.committed
                    .insert(i, Commitment::new::<S>(round, i, share));
            }
            None => {
                self.refused.insert(i);
            }
        }
    }

    /// Merges a report of a child, keeping only members of the child's `branch`
    fn absorb(&mut self, commit: Commit, branch: &[ParticipantIndex]) {
        for (j, commitment) in commit.committed {
            if branch.contains(&j) && !self.refused.contains(&j) {
                self.committed.entry(j).or_insert(commitment);
            }
        }
        for j in commit.refused {
            if branch.contains(&j) && !self.committed.contains_key(&j) {
                self.refused.insert(j);
            }
        }
    }

    fn to_msg(&self, round: RoundId) -> Commit {
        Commit {
            round,
            committed: self.committed.iter().map(|(j, c)| (*j, *c)).collect(),
            refused: self.refused.iter().copied().collect(),
        }
    }
}

/// Subtree didn't produce any usable signature
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("subtree {subtree} produced no usable signature, {excluded} members excluded")]
pub struct SubtreeFailure {
    /// Subtree that failed
    pub subtree: SubtreeId,
    /// Number of members excluded from the subtree
    pub excluded: u16,
}

/// Participant couldn't take part in the round
#[derive(Debug, thiserror::Error)]
pub enum ParticipantError {
    /// Tree root must run the orchestrator instead
    #[error("root can not serve as a participant, it must start the round")]
    IsRoot,
    /// Participant index is out of the tree
    #[error("participant {0} is not in the tree")]
    NotInTree(ParticipantIndex),
    /// Transport error
    #[error(transparent)]
    Io(#[from] IoError),
}
