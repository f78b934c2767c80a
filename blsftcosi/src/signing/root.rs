//! Root Orchestrator
//!
//! Root validates the round configuration, [partitions](crate::partition) the tree, and asks the
//! leader of every subtree to run a [subtree round](super::subtree). Then it collects subtree
//! outcomes until all of them arrive or the round timeout expires:
//!
//! * Partial outcomes are accepted as they are, excluded members are charged to the
//!   [fault budget](FaultBudget).
//! * Failed, malformed, or missing outcomes charge all members of the subtree.
//! * Once the budget is exceeded, the round fails right away with
//!   [`RoundError::InsufficientParticipation`].
//!
//! Partial aggregates are combined with the root's own share, the result is verified against
//! the public keys of participants in the mask, and finally the [policy](crate::Policy) is
//! evaluated, exactly once per round.

use std::{collections::BTreeMap, sync::Arc};

use core::time::Duration;

use rand_core::{CryptoRng, RngCore};
use round_based::Delivery;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, info, warn, Instrument};

use crate::{
    partition::{self, Subtree, SubtreeId},
    scheme::InvalidSignature,
    signing::{
        aggregate::{self, AggregateError, FinalAggregate, PartialAggregate},
        link::Link,
        IoError, Msg, RoundId, Start, SubtreeOutcome,
    },
    Mask, Policy, Scheme, Tree,
};

/// Configuration of a signing round
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoundConfig {
    /// Number of subtrees the tree is partitioned into
    pub subtrees: u16,
    /// Overall timeout of the round
    pub timeout: Duration,
    /// Timeout of each phase of a subtree round
    ///
    /// Defaults to a quarter of the overall timeout. Must be less than half of the overall
    /// timeout, so both phases of the subtree round complete before the root gives up.
    pub subtree_timeout: Option<Duration>,
    /// Maximum number of participants that can be excluded from the round
    pub fault_threshold: u16,
    /// Acceptance policy of the final aggregate
    pub policy: Policy,
}

impl RoundConfig {
    /// Timeout of each phase of a subtree round
    pub fn subtree_timeout(&self) -> Duration {
        self.subtree_timeout.unwrap_or(self.timeout / 4)
    }
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            subtrees: 1,
            timeout: Duration::from_secs(5),
            subtree_timeout: None,
            fault_threshold: 0,
            policy: Policy::Complete,
        }
    }
}

/// Builder of a signing round, run by the tree root
pub struct SigningBuilder<S: Scheme> {
    tree: Arc<Tree<S>>,
    secret_key: S::SecretKey,
    msg: Vec<u8>,
    config: RoundConfig,
}

impl<S: Scheme> SigningBuilder<S> {
    /// Constructs a signing builder
    ///
    /// It could be easier to use [signing](crate::signing()) function located in the crate root.
    pub fn new(tree: Arc<Tree<S>>, secret_key: S::SecretKey, msg: Vec<u8>) -> Self {
        Self {
            tree,
            secret_key,
            msg,
            config: RoundConfig::default(),
        }
    }

    /// Specifies number of subtrees signing in parallel
    pub fn set_subtrees(mut self, subtrees: u16) -> Self {
        self.config.subtrees = subtrees;
        self
    }

    /// Specifies overall timeout of the round
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Specifies timeout of each phase of a subtree round
    ///
    /// Must be less than half of the overall timeout, otherwise [`start`](Self::start) returns
    /// [`ConfigError::SubtreeTimeout`]
    pub fn set_subtree_timeout(mut self, timeout: Duration) -> Self {
        self.config.subtree_timeout = Some(timeout);
        self
    }

    /// Specifies how many participants can be excluded before the round fails
    pub fn set_fault_threshold(mut self, fault_threshold: u16) -> Self {
        self.config.fault_threshold = fault_threshold;
        self
    }

    /// Specifies acceptance policy of the final aggregate
    pub fn set_policy(mut self, policy: Policy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Overwrites the whole round configuration
    pub fn set_config(mut self, config: RoundConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts the round
    ///
    /// Validates the configuration and partitions the tree synchronously, then spawns the round
    /// onto the tokio runtime and returns immediately. Use [`RoundHandle::wait`] to obtain the
    /// result.
    ///
    /// Must be called within the context of a tokio runtime.
    pub fn start<M, R>(self, rng: &mut R, party: M) -> Result<RoundHandle, ConfigError>
    where
        M: round_based::Mpc<ProtocolMessage = Msg>,
        M::Delivery: Send + 'static,
        <M::Delivery as Delivery<Msg>>::Receive: Send + 'static,
        <M::Delivery as Delivery<Msg>>::Send: Send + 'static,
        R: RngCore + CryptoRng,
    {
        if self.msg.is_empty() {
            return Err(ConfigError::EmptyMessage);
        }
        let (timeout, subtree_timeout) = (self.config.timeout, self.config.subtree_timeout());
        if timeout.is_zero() || subtree_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if !matches!(subtree_timeout.checked_mul(2), Some(both_phases) if both_phases < timeout) {
            return Err(ConfigError::SubtreeTimeout {
                subtree_timeout,
                timeout,
            });
        }
        if self.tree.public_key(self.tree.root()) != Some(&S::public_key(&self.secret_key)) {
            return Err(ConfigError::KeyMismatch);
        }
        let subtrees = partition::partition(&self.tree, self.config.subtrees)?;

        let round = RoundId::random(rng);
        let round_based::MpcParty { delivery, .. } = party.into_party();
        let link = Link::new(delivery);

        let (tx, rx) = oneshot::channel();
        let orchestrator = Orchestrator {
            round,
            tree: self.tree,
            secret_key: self.secret_key,
            msg: self.msg,
            config: self.config,
            subtrees,
        };
        tokio::spawn(
            async move {
                let result = orchestrator.run(link).await;
                if let Err(err) = &result {
                    warn!(%err, "round failed");
                }
                // Receiver might be gone if the caller isn't interested in the result anymore
                let _ = tx.send(result);
            }
            .instrument(tracing::info_span!("round", id = %round)),
        );

        Ok(RoundHandle { round, result: rx })
    }

    /// Carries out the round and waits for its result
    pub async fn sign<M, R>(self, rng: &mut R, party: M) -> Result<FinalAggregate, RoundError>
    where
        M: round_based::Mpc<ProtocolMessage = Msg>,
        M::Delivery: Send + 'static,
        <M::Delivery as Delivery<Msg>>::Receive: Send + 'static,
        <M::Delivery as Delivery<Msg>>::Send: Send + 'static,
        R: RngCore + CryptoRng,
    {
        self.start(rng, party)?.wait().await
    }
}

/// Handle of a started round
///
/// Round keeps going even if the handle is dropped.
#[derive(Debug)]
pub struct RoundHandle {
    round: RoundId,
    result: oneshot::Receiver<Result<FinalAggregate, RoundError>>,
}

impl RoundHandle {
    /// Identifier of the round
    pub fn round(&self) -> RoundId {
        self.round
    }

    /// Waits for the round result
    pub async fn wait(self) -> Result<FinalAggregate, RoundError> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(RoundError::Aborted),
        }
    }
}

/// Number of participants that may still be excluded from the round
///
/// Every exclusion is charged, whatever the reason: refusal, silence, an invalid share, or
/// failure of the whole subtree.
#[derive(Debug, Clone, Copy)]
pub struct FaultBudget {
    threshold: u16,
    excluded: u16,
}

impl FaultBudget {
    /// Budget that tolerates up to `threshold` excluded participants
    pub fn new(threshold: u16) -> Self {
        Self {
            threshold,
            excluded: 0,
        }
    }

    /// Charges `n` excluded participants
    ///
    /// Returns error once more than `threshold` participants are excluded in total
    pub fn charge(&mut self, n: u16) -> Result<(), BudgetExceeded> {
        self.excluded = self.excluded.saturating_add(n);
        if self.excluded > self.threshold {
            Err(BudgetExceeded {
                excluded: self.excluded,
                threshold: self.threshold,
            })
        } else {
            Ok(())
        }
    }

    /// Number of participants excluded so far
    pub fn excluded(&self) -> u16 {
        self.excluded
    }

    /// Number of participants that can still be excluded
    pub fn remaining(&self) -> u16 {
        self.threshold.saturating_sub(self.excluded)
    }
}

/// Too many participants were excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{excluded} participants excluded, but at most {threshold} are tolerated")]
pub struct BudgetExceeded {
    /// Number of excluded participants
    pub excluded: u16,
    /// Fault threshold
    pub threshold: u16,
}

struct Orchestrator<S: Scheme> {
    round: RoundId,
    tree: Arc<Tree<S>>,
    secret_key: S::SecretKey,
    msg: Vec<u8>,
    config: RoundConfig,
    subtrees: Vec<Subtree>,
}

impl<S: Scheme> Orchestrator<S> {
    async fn run<D: Delivery<Msg>>(self, mut link: Link<D>) -> Result<FinalAggregate, RoundError> {
        let total = self.tree.len();
        let root = self.tree.root();
        info!(
            participants = total,
            subtrees = self.subtrees.len(),
            policy = %self.config.policy,
            "round started"
        );
        let deadline = Instant::now() + self.config.timeout;

        let own_share = S::sign(&self.secret_key, &self.msg);
        let root_key = self.tree.public_key(root).ok_or(Bug::MissingRootKey)?;
        S::verify_share(root_key, &self.msg, &own_share).map_err(Bug::OwnShare)?;

        for subtree in &self.subtrees {
            link.send(
                subtree.leader(),
                Msg::Start(Start {
                    round: self.round,
                    msg: self.msg.clone(),
                    subtree: subtree.clone(),
                    phase_timeout: self.config.subtree_timeout(),
                    policy: self.config.policy,
                }),
            )
            .await?;
        }

        let partials = self.collect(&mut link, deadline).await?;

        let own_mask = aggregate::singleton(total, root)?;
        let parts = core::iter::once((own_share.as_slice(), &own_mask))
            .chain(partials.iter().map(|p| (p.signature.as_slice(), &p.mask)))
            .collect::<Vec<_>>();
        let aggregate = aggregate::combine::<S>(total, &parts)?;
        S::verify_aggregate(
            &self.tree.public_keys(),
            &self.msg,
            aggregate.signature(),
            aggregate.mask(),
        )
        .map_err(RoundError::Aggregation)?;

        let participating = aggregate.participants();
        if !self.config.policy.check(total, participating) {
            return Err(RoundError::PolicyNotSatisfied {
                participating,
                total,
                policy: self.config.policy,
            });
        }

        info!(participating, "round completed");
        Ok(aggregate)
    }

    /// Collects outcomes of the subtrees until all of them reported or `deadline` is reached
    async fn collect<D: Delivery<Msg>>(
        &self,
        link: &mut Link<D>,
        deadline: Instant,
    ) -> Result<Vec<PartialAggregate>, RoundError> {
        let mut budget = FaultBudget::new(self.config.fault_threshold);
        let mut pending = self
            .subtrees
            .iter()
            .map(|s| (s.id(), s))
            .collect::<BTreeMap<SubtreeId, &Subtree>>();
        let mut partials = vec![];

        while !pending.is_empty() {
            let Some(incoming) = link.recv_round(self.round, Some(deadline)).await? else {
                for subtree in pending.values() {
                    warn!(subtree = subtree.id(), "subtree didn't report in time");
                    budget.charge(subtree.len()).map_err(RoundError::from)?;
                }
                break;
            };
            let Msg::Outcome(outcome) = incoming.msg else {
                debug!(sender = incoming.sender, "ignore unexpected message");
                continue;
            };
            let id = outcome.outcome.subtree();
            let Some(subtree) = pending.get(&id).copied() else {
                debug!(subtree = id, "ignore outcome of unknown or already reported subtree");
                continue;
            };
            if incoming.sender != subtree.leader() {
                warn!(subtree = id, sender = incoming.sender, "outcome doesn't come from the leader");
                continue;
            }
            pending.remove(&id);

            let excluded = match outcome.outcome {
                SubtreeOutcome::Done(partial) | SubtreeOutcome::Partial(partial) => {
                    match self.check_partial(subtree, &partial) {
                        Some(signed) => {
                            partials.push(partial);
                            subtree.len() - signed
                        }
                        None => {
                            warn!(subtree = id, "malformed partial aggregate");
                            subtree.len()
                        }
                    }
                }
                SubtreeOutcome::Failed(failure) => {
                    warn!(subtree = id, %failure, "subtree failed");
                    subtree.len()
                }
            };
            debug!(subtree = id, excluded, "subtree reported");
            budget.charge(excluded).map_err(RoundError::from)?;
        }

        debug!(excluded = budget.excluded(), remaining = budget.remaining(), "outcomes collected");
        Ok(partials)
    }

    /// Checks that the partial aggregate only lists members of the `subtree`
    ///
    /// Returns number of members who signed
    fn check_partial(&self, subtree: &Subtree, partial: &PartialAggregate) -> Option<u16> {
        let mask: &Mask = &partial.mask;
        if mask.len() != self.tree.len() || partial.signature.len() != S::SIGNATURE_SIZE {
            return None;
        }
        let signed = mask.count();
        if signed == 0 || mask.iter().any(|i| !subtree.contains(i)) {
            return None;
        }
        Some(signed)
    }
}

/// Round configuration is invalid
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Message to be signed is empty
    #[error("message to be signed is empty")]
    EmptyMessage,
    /// Number of subtrees is out of range
    #[error("can not partition the tree into {requested} subtrees: must be in range [1; {available}]")]
    SubtreesCount {
        /// Requested number of subtrees
        requested: u16,
        /// Number of participants other than the root
        available: u16,
    },
    /// Timeout is zero
    #[error("timeout must be positive")]
    ZeroTimeout,
    /// Two phases of a subtree round don't fit into the round timeout
    #[error("subtree timeout {subtree_timeout:?} must be less than half of the round timeout {timeout:?}")]
    SubtreeTimeout {
        /// Timeout of each phase of a subtree round
        subtree_timeout: Duration,
        /// Overall timeout of the round
        timeout: Duration,
    },
    /// Secret key doesn't correspond to the public key of the tree root
    #[error("secret key doesn't match the public key of the tree root")]
    KeyMismatch,
}

/// Signing round failed
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    /// Round configuration is invalid
    #[error("invalid round configuration")]
    Config(#[from] ConfigError),
    /// More participants were excluded than the fault threshold allows
    #[error("insufficient participation: {excluded} participants excluded, at most {threshold} tolerated")]
    InsufficientParticipation {
        /// Number of participants excluded by the time the round was aborted
        excluded: u16,
        /// Fault threshold of the round
        threshold: u16,
    },
    /// Final aggregate is not valid
    #[error("final aggregate is not valid")]
    Aggregation(#[source] InvalidSignature),
    /// Final aggregate is valid, but participation doesn't satisfy the policy
    #[error("{participating} out of {total} participants signed, policy {policy} is not satisfied")]
    PolicyNotSatisfied {
        /// Number of participants who signed
        participating: u16,
        /// Number of participants in the tree
        total: u16,
        /// Policy of the round
        policy: Policy,
    },
    /// Transport error
    #[error(transparent)]
    Io(#[from] IoError),
    /// Round task terminated without a result
    #[error("round was aborted")]
    Aborted,
    /// Bug occurred
    #[error("bug occurred")]
    Bug(#[source] Bug),
}

impl From<BudgetExceeded> for RoundError {
    fn from(err: BudgetExceeded) -> Self {
        RoundError::InsufficientParticipation {
            excluded: err.excluded,
            threshold: err.threshold,
        }
    }
}

impl From<Bug> for RoundError {
    fn from(err: Bug) -> Self {
        RoundError::Bug(err)
    }
}

impl From<AggregateError> for RoundError {
    fn from(err: AggregateError) -> Self {
        RoundError::Bug(Bug::Combine(err))
    }
}

/// Error indicating that internal invariant was violated
#[derive(Debug, thiserror::Error)]
pub enum Bug {
    /// Tree has no root
    #[error("public key of the root is missing")]
    MissingRootKey,
    /// Root's own share is invalid, even though the key was checked at start
    #[error("own signature share is invalid")]
    OwnShare(#[source] InvalidSignature),
    /// Partial aggregates couldn't be combined
    #[error("combine partial aggregates")]
    Combine(#[source] AggregateError),
}
