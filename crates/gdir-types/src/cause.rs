use std::collections::BTreeSet;

use crate::{DirectoryEntry, MembershipVersion, SiloAddress};

/// Why an activation is being removed from the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum UnregistrationCause {
    /// Unconditional. Used for dead-silo cleanup and race-loser withdrawal.
    Force,
    /// Drops a pointer to another cluster's owner. Never removes a row owned
    /// by one of the caller's own silos.
    CacheInvalidation,
    /// A message found no activation behind the address. Only rows older
    /// than the freshness window may be removed, so a late signal cannot
    /// erase a registration that is still being set up.
    NonexistentActivation,
}

/// Condition a backend evaluates atomically together with a conditional
/// delete, on top of the activation-id match.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeletePrecondition {
    Always,
    /// The stored silo is none of these.
    SiloOutside(BTreeSet<SiloAddress>),
    /// The stored membership version is at or below this one.
    RegisteredAtOrBefore(MembershipVersion),
    /// Nothing qualifies.
    Never,
}

impl DeletePrecondition {
    pub fn admits(&self, entry: &DirectoryEntry) -> bool {
        match self {
            DeletePrecondition::Always => true,
            DeletePrecondition::SiloOutside(silos) => !silos.contains(&entry.address.silo),
            DeletePrecondition::RegisteredAtOrBefore(v) => entry.address.membership_version <= *v,
            DeletePrecondition::Never => false,
        }
    }
}

/// Compiles an [`UnregistrationCause`] into the precondition the store checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausePolicy {
    /// Number of membership versions during which a registration is
    /// considered fresh.
    pub freshness_window: u64,
}

impl CausePolicy {
    pub fn new(freshness_window: u64) -> Self {
        CausePolicy { freshness_window }
    }

    pub fn precondition<'a>(
        &self,
        cause: UnregistrationCause,
        current: MembershipVersion,
        local_silos: impl IntoIterator<Item = &'a SiloAddress>,
    ) -> DeletePrecondition {
        match cause {
            UnregistrationCause::Force => DeletePrecondition::Always,
            UnregistrationCause::CacheInvalidation => {
                DeletePrecondition::SiloOutside(local_silos.into_iter().copied().collect())
            }
            UnregistrationCause::NonexistentActivation => {
                match current.0.checked_sub(self.freshness_window) {
                    Some(v) => DeletePrecondition::RegisteredAtOrBefore(MembershipVersion(v)),
                    None => DeletePrecondition::Never,
                }
            }
        }
    }
}

impl Default for CausePolicy {
    fn default() -> Self {
        CausePolicy { freshness_window: 1 }
    }
}
