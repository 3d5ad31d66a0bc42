use std::future::Future;

use gdir_types::{
    ActivationId, ClusterId, ConcurrencyToken, DeletePrecondition, DirectoryError,
    DirectoryEntry, DirectoryKey, GrainAddress, ProviderId, SiloAddress,
};

use crate::types::{InsertOutcome, ReplaceOutcome};

/// Storage contract behind the grain directory.
///
/// Methods use RPITIT (`-> impl Future + Send`) so generic callers can
/// `.await` across threads without an `async-trait` dependency.
///
/// Every backend must give each call all-or-nothing semantics: a conflicting
/// write is reported through the outcome value, never as an error, and a
/// write that has started commits even if the calling future is dropped.
pub trait DirectoryStore: Send + Sync + 'static {
    /// Insert `address` under `key` iff no row exists. On conflict the
    /// existing row is returned untouched.
    fn try_insert(&self, key: &DirectoryKey, address: GrainAddress)
        -> impl Future<Output = Result<InsertOutcome, DirectoryError>> + Send;

    /// Replace the row under `key` iff its token equals `expected`.
    ///
    /// `expected == ConcurrencyToken::UNSET` is rejected with
    /// `InvalidArgument`: a token can only come from a prior read.
    fn try_replace(&self, key: &DirectoryKey, address: GrainAddress, expected: ConcurrencyToken)
        -> impl Future<Output = Result<ReplaceOutcome, DirectoryError>> + Send;

    /// Delete the row under `key` iff it belongs to `activation` and
    /// `precondition` admits it. Returns whether a row was removed.
    fn try_delete(
        &self,
        key: &DirectoryKey,
        activation: ActivationId,
        precondition: &DeletePrecondition,
    ) -> impl Future<Output = Result<bool, DirectoryError>> + Send;

    /// Delete every row of the scope whose silo is in `silos`.
    fn bulk_delete_by_owners(&self, cluster_id: &ClusterId, provider_id: &ProviderId, silos: &[SiloAddress])
        -> impl Future<Output = Result<u64, DirectoryError>> + Send;

    fn find(&self, key: &DirectoryKey)
        -> impl Future<Output = Result<Option<DirectoryEntry>, DirectoryError>> + Send;
}

pub(crate) fn check_expected_token(expected: ConcurrencyToken) -> Result<(), DirectoryError> {
    if expected == ConcurrencyToken::UNSET {
        return Err(DirectoryError::InvalidArgument(
            "replace requires the token of a previous read".into(),
        ));
    }
    Ok(())
}
