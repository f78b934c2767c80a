//! Acceptance policy
//!
//! Policy decides whether an aggregate signature carries enough participation to be accepted.
//! It's a pure function over the number of participants and the number of those who actually
//! signed, and is evaluated once per round, after aggregation.

use core::fmt;

/// Acceptance policy of the final aggregate signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Policy {
    /// Every participant must have signed
    #[default]
    Complete,
    /// At least `t` participants must have signed
    Threshold(u16),
}

impl Policy {
    /// Decides whether `participating` signers out of `total` participants satisfy the policy
    pub fn check(&self, total: u16, participating: u16) -> bool {
        if participating > total {
            return false;
        }
        match *self {
            Policy::Complete => participating == total,
            Policy::Threshold(t) => participating >= t,
        }
    }

    /// Minimal number of signers out of `total` participants required by the policy
    pub fn required(&self, total: u16) -> u16 {
        match *self {
            Policy::Complete => total,
            Policy::Threshold(t) => t,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Complete => f.write_str("complete"),
            Policy::Threshold(t) => write!(f, "threshold({t})"),
        }
    }
}
