//! Group membership lifetimes.
//!
//! A membership is either permanent or lasts until an instant. The boundary
//! is the same everywhere: a membership is live while its expiration is
//! strictly after `now`. At or past the expiration it is expired and gets
//! pruned by the first read that notices.

use serde::{Deserialize, Serialize};

use crate::types::Millis;

/// How long a user belongs to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Membership {
    /// Never expires.
    Permanent,
    /// Expires at the given epoch milliseconds.
    Until(Millis),
}

/// Observed state of a membership at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Active,
    Expired,
}

impl Membership {
    /// Membership ending at `expires_at`, or permanent when absent.
    pub fn from_expiration(expires_at: Option<Millis>) -> Self {
        match expires_at {
            Some(at) => Membership::Until(at),
            None => Membership::Permanent,
        }
    }

    /// The expiration instant, if any.
    pub fn expiration(&self) -> Option<Millis> {
        match self {
            Membership::Permanent => None,
            Membership::Until(at) => Some(*at),
        }
    }

    /// Whether the membership still applies at `now`.
    pub fn is_live(&self, now: Millis) -> bool {
        match self {
            Membership::Permanent => true,
            Membership::Until(at) => *at > now,
        }
    }

    /// State of the membership at `now`.
    pub fn state(&self, now: Millis) -> MembershipState {
        if self.is_live(now) {
            MembershipState::Active
        } else {
            MembershipState::Expired
        }
    }

    /// Milliseconds left on a timed, live membership.
    pub fn remaining(&self, now: Millis) -> Option<Millis> {
        match self {
            Membership::Until(at) if *at > now => Some(*at - now),
            _ => None,
        }
    }
}

impl From<Option<Millis>> for Membership {
    fn from(expires_at: Option<Millis>) -> Self {
        Self::from_expiration(expires_at)
    }
}

impl From<Membership> for Option<Millis> {
    fn from(membership: Membership) -> Self {
        membership.expiration()
    }
}
