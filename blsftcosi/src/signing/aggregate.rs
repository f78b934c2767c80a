//! Signature aggregation
//!
//! Subtree leaders fold verified shares into [partial aggregates](PartialAggregate), the root
//! combines them with its own share into the [final aggregate](FinalAggregate).
//!
//! Final aggregate is published as `signature || mask`, where the signature takes
//! [`Scheme::SIGNATURE_SIZE`] bytes and the mask takes `ceil(n / 8)` bytes for a tree of `n`
//! participants. Anyone holding the public keys can [verify] it.

use crate::{
    mask::InvalidMask, partition::SubtreeId, scheme::InvalidSignature, Mask, ParticipantIndex,
    Policy, Scheme,
};

/// Aggregate of signature shares produced by a single subtree
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartialAggregate {
    /// Subtree which produced the aggregate
    pub subtree: SubtreeId,
    /// Combined signature of the subtree members listed in the mask
    pub signature: Vec<u8>,
    /// Members whose shares were combined, defined over the whole tree
    pub mask: Mask,
}

/// Collective signature produced by the round
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FinalAggregate {
    signature: Vec<u8>,
    mask: Mask,
}

impl FinalAggregate {
    /// Aggregated signature
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Participants whose shares were combined into the signature
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Number of participants who signed
    pub fn participants(&self) -> u16 {
        self.mask.count()
    }

    /// Encodes the aggregate as `signature || mask`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.signature.len() + self.mask.as_bytes().len());
        bytes.extend_from_slice(&self.signature);
        bytes.extend_from_slice(self.mask.as_bytes());
        bytes
    }

    /// Decodes the aggregate produced over a tree of `n` participants
    ///
    /// Only checks the encoding, use [`FinalAggregate::verify`] to check the signature.
    pub fn from_bytes<S: Scheme>(n: u16, bytes: &[u8]) -> Result<Self, InvalidAggregate> {
        if bytes.len() != S::SIGNATURE_SIZE + Mask::byte_len(n) {
            return Err(InvalidAggregate::Length {
                expected: S::SIGNATURE_SIZE + Mask::byte_len(n),
                actual: bytes.len(),
            });
        }
        let (signature, mask) = bytes.split_at(S::SIGNATURE_SIZE);
        Ok(Self {
            signature: signature.to_vec(),
            mask: Mask::from_bytes(n, mask)?,
        })
    }

    /// Verifies the aggregate and checks that participation satisfies the `policy`
    ///
    /// `public_keys` must list public keys of all the tree participants, ordered by their indexes.
    pub fn verify<S: Scheme>(
        &self,
        public_keys: &[S::PublicKey],
        msg: &[u8],
        policy: Policy,
    ) -> Result<(), VerifyError> {
        let total = u16::try_from(public_keys.len()).map_err(|_| VerifyError::MaskLength)?;
        if self.mask.len() != total {
            return Err(VerifyError::MaskLength);
        }
        S::verify_aggregate(public_keys, msg, &self.signature, &self.mask)
            .map_err(VerifyError::InvalidSignature)?;
        let participating = self.participants();
        if !policy.check(total, participating) {
            return Err(VerifyError::PolicyNotSatisfied {
                participating,
                total,
                policy,
            });
        }
        Ok(())
    }
}

/// Verifies the encoded [final aggregate](FinalAggregate) over the `msg`
///
/// `public_keys` must list public keys of all the tree participants, ordered by their indexes.
/// Succeeds only if the signature is valid for the participants in the mask, and their number
/// satisfies the `policy`.
pub fn verify<S: Scheme>(
    public_keys: &[S::PublicKey],
    msg: &[u8],
    signature: &[u8],
    policy: Policy,
) -> Result<(), VerifyError> {
    let n = u16::try_from(public_keys.len()).map_err(|_| VerifyError::MaskLength)?;
    FinalAggregate::from_bytes::<S>(n, signature)?.verify::<S>(public_keys, msg, policy)
}

/// Combines signatures with disjoint masks into the final aggregate over `total` participants
///
/// Doesn't verify the result.
pub(crate) fn combine<S: Scheme>(
    total: u16,
    parts: &[(&[u8], &Mask)],
) -> Result<FinalAggregate, AggregateError> {
    if parts.is_empty() {
        return Err(Reason::NoSignatures.into());
    }
    let mut mask = Mask::new(total);
    for (_, part_mask) in parts {
        if !mask.is_disjoint(part_mask) {
            return Err(Reason::Overlap.into());
        }
        mask.merge(part_mask).map_err(Reason::MaskLength)?;
    }
    let signatures = parts.iter().map(|(sig, _)| *sig).collect::<Vec<_>>();
    let signature = S::combine(&signatures).map_err(Reason::Combine)?;
    Ok(FinalAggregate { signature, mask })
}

/// Mask containing a single participant
pub(crate) fn singleton(total: u16, i: ParticipantIndex) -> Result<Mask, AggregateError> {
    let mut mask = Mask::new(total);
    mask.set(i).map_err(Reason::MaskLength)?;
    Ok(mask)
}

/// Signatures couldn't be aggregated
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct AggregateError(#[from] Reason);

#[derive(Debug, thiserror::Error)]
enum Reason {
    #[error("nothing to aggregate")]
    NoSignatures,
    #[error("the same participant is listed in more than one mask")]
    Overlap,
    #[error("mask is defined over a different number of participants")]
    MaskLength(#[source] InvalidMask),
    #[error("combine signatures")]
    Combine(#[source] InvalidSignature),
}

/// Encoded aggregate is malformed
#[derive(Debug, thiserror::Error)]
pub enum InvalidAggregate {
    /// Encoding has unexpected length
    #[error("expected {expected} bytes, got {actual}")]
    Length {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
    /// Mask is malformed
    #[error("malformed mask")]
    Mask(#[from] InvalidMask),
}

/// Aggregate signature is not acceptable
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Encoded aggregate is malformed
    #[error("malformed aggregate")]
    Malformed(#[from] InvalidAggregate),
    /// Mask doesn't match the number of public keys
    #[error("mask doesn't match the number of public keys")]
    MaskLength,
    /// Signature is not valid for the participants in the mask
    #[error("invalid aggregate signature")]
    InvalidSignature(#[source] InvalidSignature),
    /// Signature is valid, but not enough participants signed
    #[error("{participating} out of {total} participants signed, policy {policy} is not satisfied")]
    PolicyNotSatisfied {
        /// Number of participants who signed
        participating: u16,
        /// Number of participants in the tree
        total: u16,
        /// Policy that was evaluated
        policy: Policy,
    },
}
