//! Aggregate signature scheme
//!
//! Scheme specifies the signature primitives used in the protocol: individual signing, share
//! verification, combination of shares into an aggregate, and verification of the aggregate
//! against the participation [mask](crate::Mask).
//!
//! Out of the box, we provide BLS12-381 schemes:
//! * [Bls12381MinPk], requires `scheme-bls12381-min-pk` feature
//! * [Bls12381MinSig], requires `scheme-bls12381-min-sig` feature

use core::fmt;

use rand_core::{CryptoRng, RngCore};

use crate::Mask;

#[cfg(any(
    feature = "scheme-bls12381-min-pk",
    feature = "scheme-bls12381-min-sig"
))]
mod bls12381;

#[cfg(feature = "scheme-bls12381-min-pk")]
pub use bls12381::Bls12381MinPk;
#[cfg(feature = "scheme-bls12381-min-sig")]
pub use bls12381::Bls12381MinSig;

/// Aggregate signature scheme
///
/// Signature shares and aggregates travel between participants as bytes, so the scheme is
/// responsible for their (de)serialization. Malformed bytes must never be accepted by the
/// verification functions.
pub trait Scheme: Sized + Clone + Copy + fmt::Debug + Send + Sync + 'static {
    /// Name of the scheme, used for domain separation
    const NAME: &'static str;

    /// Secret signing key of a participant
    type SecretKey: Clone + Send + Sync + 'static;
    /// Public verification key of a participant
    type PublicKey: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Generates a fresh secret key
    fn generate_secret_key(rng: &mut (impl RngCore + CryptoRng))
        -> Result<Self::SecretKey, InvalidKey>;
    /// Derives a public key corresponding to the secret key
    fn public_key(secret_key: &Self::SecretKey) -> Self::PublicKey;

    /// Signs `msg` on behalf of a single participant, outputs a signature share
    fn sign(secret_key: &Self::SecretKey, msg: &[u8]) -> Vec<u8>;
    /// Verifies a signature share issued by a single participant
    fn verify_share(
        public_key: &Self::PublicKey,
        msg: &[u8],
        share: &[u8],
    ) -> Result<(), InvalidSignature>;

    /// Combines signature shares or aggregates into a single aggregate
    ///
    /// Combination must be associative and commutative: the order of `parts` never affects
    /// the result. Returns error if `parts` is empty or any part is malformed.
    fn combine(parts: &[&[u8]]) -> Result<Vec<u8>, InvalidSignature>;
    /// Verifies an aggregate signature
    ///
    /// `public_keys` lists keys of all the participants, the `mask` must be defined over the same
    /// number of participants and indicates whose shares were combined into `aggregate`.
    fn verify_aggregate(
        public_keys: &[Self::PublicKey],
        msg: &[u8],
        aggregate: &[u8],
        mask: &Mask,
    ) -> Result<(), InvalidSignature>;

    /// Size of serialized aggregate signature in bytes
    const SIGNATURE_SIZE: usize;

    /// Serializes public key
    fn serialize_public_key(public_key: &Self::PublicKey) -> Vec<u8>;
    /// Deserializes public key
    fn deserialize_public_key(bytes: &[u8]) -> Result<Self::PublicKey, InvalidKey>;
}

/// Signature verification failed
#[derive(Debug, thiserror::Error)]
#[error("invalid signature")]
pub struct InvalidSignature;

/// Key is malformed or couldn't be generated
#[derive(Debug, thiserror::Error)]
#[error("invalid key")]
pub struct InvalidKey;
