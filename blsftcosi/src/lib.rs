//! Fault-tolerant collective signing over a communication tree
//!
//! A set of participants arranged in a tree jointly produce a single aggregate (BLS) signature
//! over a message proposed by the tree root, tolerating a bounded number of unresponsive or
//! refusing participants.
//!
//! The protocol is two-level:
//! 1. The root [partitions](partition) the tree into subtrees, each led by a subtree leader.
//! 2. Every subtree runs its own commit-then-respond [subtree round](signing::subtree)
//!    concurrently with its siblings. Members that refuse, stay silent, or send an invalid
//!    share are excluded from the subtree's participation [mask](Mask).
//! 3. The [root orchestrator](signing::root) collects the partial aggregates, charges every
//!    exclusion to the configured fault budget, combines the partials with its own share,
//!    verifies the result, and finally evaluates the acceptance [Policy].
//!
//! Signature primitives are abstracted by the [`Scheme`] trait. Out of the box, we provide
//! BLS12-381 schemes built on top of [`blst`](https://docs.rs/blst):
//! * [`Bls12381MinPk`](scheme::Bls12381MinPk), requires `scheme-bls12381-min-pk` feature
//! * [`Bls12381MinSig`](scheme::Bls12381MinSig), requires `scheme-bls12381-min-sig` feature
//!
//! Messages between participants are delivered by any [`round_based::Delivery`]
//! implementation. Each participant is an independent party: the root runs [`signing()`],
//! every other participant runs [`participant()`].
//!
//! ## Example
//! ```rust,no_run
//! # use std::{sync::Arc, time::Duration};
//! use blsftcosi::{round_based, scheme::Bls12381MinPk, Policy, Tree};
//! #
//! # fn retrieve_tree() -> Arc<Tree<Bls12381MinPk>> { unimplemented!() }
//! # fn retrieve_secret_key() -> <Bls12381MinPk as blsftcosi::Scheme>::SecretKey { unimplemented!() }
//! # fn join_network<M: Send + 'static>() -> (
//! #     futures::stream::Pending<Result<round_based::Incoming<M>, std::convert::Infallible>>,
//! #     futures::sink::Drain<round_based::Outgoing<M>>,
//! # ) {
//! #     (futures::stream::pending(), futures::sink::drain())
//! # }
//! # async fn __doc() -> Result<(), blsftcosi::RoundError> {
//!
//! let tree = retrieve_tree();
//! let secret_key = retrieve_secret_key();
//! let party = round_based::MpcParty::connected(join_network());
//!
//! let aggregate = blsftcosi::signing::<Bls12381MinPk>(tree, secret_key, b"dedis".to_vec())
//!     .set_subtrees(4)
//!     .set_timeout(Duration::from_secs(5))
//!     .set_fault_threshold(2)
//!     .set_policy(Policy::Threshold(20))
//!     .sign(&mut rand_core::OsRng, party)
//!     .await?;
//! let signature_bytes = aggregate.to_bytes();
//! # Ok(()) }
//! ```

#![forbid(unsafe_code, unused_crate_dependencies)]
#![deny(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use round_based;

pub mod mask;
pub mod partition;
pub mod policy;
pub mod scheme;
pub mod signing;
pub mod tree;

pub use self::{
    mask::Mask,
    partition::Subtree,
    policy::Policy,
    scheme::Scheme,
    signing::{
        aggregate::{verify, FinalAggregate, PartialAggregate},
        root::{ConfigError, RoundConfig, RoundError, RoundHandle},
        subtree::{AcceptAll, Verification},
    },
    tree::Tree,
};

/// Participant index
///
/// Identifies a participant by its position in the [`Tree`]. The tree root always has index `0`.
/// It's also the party index used to address the participant in the underlying delivery.
pub type ParticipantIndex = u16;

/// Starts building a collective signing round, run by the tree root
///
/// ## Inputs
/// * `tree` of participants along with their public keys; the caller must be its root
/// * `secret_key` of the root
/// * `msg` to be signed
///
/// Use builder methods to tune the [round configuration](RoundConfig), then either
/// [start](signing::root::SigningBuilder::start) the round and obtain a [`RoundHandle`], or
/// [sign](signing::root::SigningBuilder::sign) to await the result right away.
pub fn signing<S: Scheme>(
    tree: std::sync::Arc<Tree<S>>,
    secret_key: S::SecretKey,
    msg: Vec<u8>,
) -> signing::root::SigningBuilder<S> {
    signing::root::SigningBuilder::new(tree, secret_key, msg)
}

/// Starts building a participant that takes part in signing rounds proposed by the tree root
///
/// ## Inputs
/// * `i`: index of this participant in the `tree`
/// * `tree` of participants along with their public keys
/// * `secret_key` of this participant
///
/// By default, the participant signs every message it's asked to. Use
/// [`set_verification`](signing::subtree::ParticipantBuilder::set_verification) to decide
/// which proposals are acceptable.
pub fn participant<S: Scheme>(
    i: ParticipantIndex,
    tree: std::sync::Arc<Tree<S>>,
    secret_key: S::SecretKey,
) -> signing::subtree::ParticipantBuilder<S> {
    signing::subtree::ParticipantBuilder::new(i, tree, secret_key)
}
