//! Participation bitmask
//!
//! Records exactly which participants' shares were folded into an aggregate signature. Bit `i`
//! corresponds to the participant with [index](crate::ParticipantIndex) `i` in the tree.
//! Bits are packed little-endian within each byte, so the mask of `n` participants always
//! takes `ceil(n / 8)` bytes on the wire.

use core::fmt;

use crate::ParticipantIndex;

/// Participation bitmask over the tree participants
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mask {
    len: u16,
    bits: Vec<u8>,
}

impl Mask {
    /// Constructs an empty mask over `len` participants
    pub fn new(len: u16) -> Self {
        Self {
            len,
            bits: vec![0; Self::byte_len(len)],
        }
    }

    /// Number of bytes needed to encode a mask over `len` participants
    pub fn byte_len(len: u16) -> usize {
        usize::from(len).div_ceil(8)
    }

    /// Parses a mask over `len` participants
    ///
    /// Returns error if `bytes` are of wrong size or if any bit beyond `len` is set.
    pub fn from_bytes(len: u16, bytes: &[u8]) -> Result<Self, InvalidMask> {
        if bytes.len() != Self::byte_len(len) {
            return Err(InvalidMask);
        }
        let mask = Self {
            len,
            bits: bytes.to_vec(),
        };
        let trailing = usize::from(len) % 8;
        if let (Some(last), true) = (mask.bits.last(), trailing != 0) {
            if last >> trailing != 0 {
                return Err(InvalidMask);
            }
        }
        Ok(mask)
    }

    /// Bytes representation of the mask
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Number of participants the mask is defined over
    pub fn len(&self) -> u16 {
        self.len
    }

    /// Indicates whether the mask is defined over zero participants
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Marks participant `i` as participating
    ///
    /// Returns error if `i` is out of range
    pub fn set(&mut self, i: ParticipantIndex) -> Result<(), InvalidMask> {
        if i >= self.len {
            return Err(InvalidMask);
        }
        let i = usize::from(i);
        self.bits[i / 8] |= 1 << (i % 8);
        Ok(())
    }

    /// Checks whether participant `i` participates
    pub fn contains(&self, i: ParticipantIndex) -> bool {
        let i = usize::from(i);
        self.bits
            .get(i / 8)
            .map(|byte| byte & (1 << (i % 8)) != 0)
            .unwrap_or(false)
    }

    /// Number of participating participants (popcount)
    pub fn count(&self) -> u16 {
        // popcount never exceeds `len`
        self.bits.iter().map(|b| b.count_ones() as u16).sum()
    }

    /// Iterates over indexes of participating participants in ascending order
    pub fn iter(&self) -> impl Iterator<Item = ParticipantIndex> + '_ {
        (0..self.len).filter(|i| self.contains(*i))
    }

    /// Adds every participant of `other` to `self`
    ///
    /// Returns error if masks are defined over different number of participants
    pub fn merge(&mut self, other: &Mask) -> Result<(), InvalidMask> {
        if self.len != other.len {
            return Err(InvalidMask);
        }
        self.bits
            .iter_mut()
            .zip(&other.bits)
            .for_each(|(a, b)| *a |= b);
        Ok(())
    }

    /// Checks whether `self` and `other` have no participant in common
    pub fn is_disjoint(&self, other: &Mask) -> bool {
        self.bits.iter().zip(&other.bits).all(|(a, b)| a & b == 0)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Mask(")?;
        for i in 0..self.len {
            f.write_str(if self.contains(i) { "1" } else { "0" })?;
        }
        f.write_str(")")
    }
}

/// Mask is malformed or doesn't fit the participants set
#[derive(Debug, thiserror::Error)]
#[error("invalid participation mask")]
pub struct InvalidMask;
