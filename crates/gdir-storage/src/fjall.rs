use std::path::Path;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use gdir_types::{
    ActivationId, ClusterId, ConcurrencyToken, DeletePrecondition, DirectoryEntry,
    DirectoryError, DirectoryKey, GrainAddress, ProviderId, SiloAddress,
};

use crate::keys::{entry_key, meta_key, owner_key, owner_prefix, scope_prefix};
use crate::traits::{check_expected_token, DirectoryStore};
use crate::types::{InsertOutcome, ReplaceOutcome};

const NEXT_TOKEN: &str = "next_token";

fn encode<T: serde::Serialize>(val: &T) -> Result<Vec<u8>, DirectoryError> {
    bincode::serde::encode_to_vec(val, bincode::config::standard())
        .map_err(|e| DirectoryError::Storage(e.to_string()))
}

fn decode<T: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> Result<T, DirectoryError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .map_err(|e| DirectoryError::Storage(e.to_string()))
}

fn fjall_err(e: fjall::Error) -> DirectoryError {
    DirectoryError::Storage(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> DirectoryError {
    DirectoryError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// FjallStore: entries, owner index and token meta in one database
// ---------------------------------------------------------------------------

/// Shared storage handle.
///
/// All keyspaces live in a single fjall `Database` so that a row, its owner
/// index entry and the token counter change in one atomic batch.
pub struct FjallStore {
    pub db: fjall::Database,
    /// Directory rows: `scope ++ grain` → bincode(DirectoryEntry)
    pub entries: fjall::Keyspace,
    /// Owner index: `scope ++ silo ++ grain` → b""
    pub owners: fjall::Keyspace,
    /// Counters: `label_utf8` → bincode(value)
    pub meta: fjall::Keyspace,
}

impl FjallStore {
    /// Open (or create) a `FjallStore` at `path`.
    pub fn open(path: &Path) -> Result<Arc<Self>, DirectoryError> {
        let db = fjall::Database::builder(path).open().map_err(fjall_err)?;
        let entries =
            db.keyspace("entries", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        let owners =
            db.keyspace("owners", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        let meta =
            db.keyspace("meta", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        Ok(Arc::new(FjallStore { db, entries, owners, meta }))
    }

    fn read_entry(&self, raw_key: &[u8]) -> Result<Option<DirectoryEntry>, DirectoryError> {
        self.entries
            .get(raw_key)
            .map_err(fjall_err)?
            .map(|b| decode::<DirectoryEntry>(&b))
            .transpose()
    }

    fn peek_token(&self) -> Result<u64, DirectoryError> {
        match self.meta.get(meta_key(NEXT_TOKEN)).map_err(fjall_err)? {
            Some(b) => decode::<u64>(&b),
            None => Ok(1),
        }
    }

    /// Write `entry` (and its owner index key), dropping the owner key of
    /// `previous` when the owning silo changed.
    fn write_entry(
        &self,
        key: &DirectoryKey,
        entry: &DirectoryEntry,
        previous: Option<&DirectoryEntry>,
    ) -> Result<(), DirectoryError> {
        let mut batch = self.db.batch();
        batch.insert(&self.entries, entry_key(key), encode(entry)?);
        if let Some(prev) = previous {
            if prev.address.silo != entry.address.silo {
                batch.remove(&self.owners, owner_key(key, &prev.address.silo));
            }
        }
        batch.insert(&self.owners, owner_key(key, &entry.address.silo), Vec::new());
        batch.insert(&self.meta, meta_key(NEXT_TOKEN), encode(&(entry.token.0 + 1))?);
        batch.commit().map_err(fjall_err)
    }

    fn remove_entry(&self, key: &DirectoryKey, entry: &DirectoryEntry) -> Result<(), DirectoryError> {
        let mut batch = self.db.batch();
        batch.remove(&self.entries, entry_key(key));
        batch.remove(&self.owners, owner_key(key, &entry.address.silo));
        batch.commit().map_err(fjall_err)
    }
}

// ---------------------------------------------------------------------------
// FjallDirectoryStore
// ---------------------------------------------------------------------------

/// `DirectoryStore` backed by fjall.
///
/// Conditional writes are read-check-write sequences serialized by a single
/// writer mutex. The owned guard travels into the blocking task, so a caller
/// that is cancelled mid-await cannot release the lock before the batch
/// commits. Reads take no lock. All blocking I/O is wrapped in
/// `tokio::task::spawn_blocking`.
pub struct FjallDirectoryStore {
    pub store: Arc<FjallStore>,
    writer: Arc<Mutex<()>>,
}

impl FjallDirectoryStore {
    pub fn new(store: Arc<FjallStore>) -> Self {
        FjallDirectoryStore { store, writer: Arc::new(Mutex::new(())) }
    }

    pub fn open(path: &Path) -> Result<Self, DirectoryError> {
        Ok(Self::new(FjallStore::open(path)?))
    }

    async fn write_guard(&self) -> OwnedMutexGuard<()> {
        self.writer.clone().lock_owned().await
    }
}

impl DirectoryStore for FjallDirectoryStore {
    async fn try_insert(
        &self,
        key: &DirectoryKey,
        address: GrainAddress,
    ) -> Result<InsertOutcome, DirectoryError> {
        let store = self.store.clone();
        let key = key.clone();
        let guard = self.write_guard().await;
        tokio::task::spawn_blocking(move || -> Result<InsertOutcome, DirectoryError> {
            let _guard = guard;
            if let Some(existing) = store.read_entry(&entry_key(&key))? {
                return Ok(InsertOutcome::Conflict(existing));
            }
            let entry = DirectoryEntry {
                cluster_id: key.cluster_id.clone(),
                provider_id: key.provider_id.clone(),
                address,
                token: ConcurrencyToken(store.peek_token()?),
            };
            store.write_entry(&key, &entry, None)?;
            Ok(InsertOutcome::Inserted(entry))
        })
        .await
        .map_err(join_err)?
    }

    async fn try_replace(
        &self,
        key: &DirectoryKey,
        address: GrainAddress,
        expected: ConcurrencyToken,
    ) -> Result<ReplaceOutcome, DirectoryError> {
        check_expected_token(expected)?;
        let store = self.store.clone();
        let key = key.clone();
        let guard = self.write_guard().await;
        tokio::task::spawn_blocking(move || -> Result<ReplaceOutcome, DirectoryError> {
            let _guard = guard;
            let current = match store.read_entry(&entry_key(&key))? {
                None => return Ok(ReplaceOutcome::Conflict(None)),
                Some(cur) if cur.token != expected => {
                    return Ok(ReplaceOutcome::Conflict(Some(cur)));
                }
                Some(cur) => cur,
            };
            let entry = DirectoryEntry {
                cluster_id: key.cluster_id.clone(),
                provider_id: key.provider_id.clone(),
                address,
                token: ConcurrencyToken(store.peek_token()?),
            };
            store.write_entry(&key, &entry, Some(&current))?;
            Ok(ReplaceOutcome::Replaced(entry))
        })
        .await
        .map_err(join_err)?
    }

    async fn try_delete(
        &self,
        key: &DirectoryKey,
        activation: ActivationId,
        precondition: &DeletePrecondition,
    ) -> Result<bool, DirectoryError> {
        let store = self.store.clone();
        let key = key.clone();
        let precondition = precondition.clone();
        let guard = self.write_guard().await;
        tokio::task::spawn_blocking(move || -> Result<bool, DirectoryError> {
            let _guard = guard;
            let current = match store.read_entry(&entry_key(&key))? {
                Some(cur) if cur.address.activation == activation && precondition.admits(&cur) => cur,
                _ => return Ok(false),
            };
            store.remove_entry(&key, &current)?;
            Ok(true)
        })
        .await
        .map_err(join_err)?
    }

    async fn bulk_delete_by_owners(
        &self,
        cluster_id: &ClusterId,
        provider_id: &ProviderId,
        silos: &[SiloAddress],
    ) -> Result<u64, DirectoryError> {
        let store = self.store.clone();
        let cluster_id = cluster_id.clone();
        let provider_id = provider_id.clone();
        let silos = silos.to_vec();
        let guard = self.write_guard().await;
        tokio::task::spawn_blocking(move || -> Result<u64, DirectoryError> {
            let _guard = guard;
            let scope = scope_prefix(&cluster_id, &provider_id);
            let mut removed = 0u64;
            for silo in &silos {
                let prefix = owner_prefix(&cluster_id, &provider_id, silo);
                let owner_keys: Vec<Vec<u8>> = store
                    .owners
                    .prefix(prefix.clone())
                    .map(|g| g.into_inner().map(|(k, _)| k.to_vec()).map_err(fjall_err))
                    .collect::<Result<_, _>>()?;
                if owner_keys.is_empty() {
                    continue;
                }

                let mut batch = store.db.batch();
                for owner in owner_keys {
                    let mut raw_entry = scope.clone();
                    raw_entry.extend_from_slice(&owner[prefix.len()..]);
                    // The index is written in the same batch as the row, but
                    // re-check the owner so a stale index key can never
                    // delete another silo's registration.
                    if let Some(entry) = store.read_entry(&raw_entry)? {
                        if entry.address.silo == *silo {
                            batch.remove(&store.entries, raw_entry);
                            removed += 1;
                        }
                    }
                    batch.remove(&store.owners, owner);
                }
                batch.commit().map_err(fjall_err)?;
            }
            Ok(removed)
        })
        .await
        .map_err(join_err)?
    }

    async fn find(&self, key: &DirectoryKey) -> Result<Option<DirectoryEntry>, DirectoryError> {
        let store = self.store.clone();
        let raw = entry_key(key);
        tokio::task::spawn_blocking(move || store.read_entry(&raw))
            .await
            .map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use gdir_types::{GrainId, MembershipVersion};

    use super::*;

    fn open(dir: &Path) -> FjallDirectoryStore {
        FjallDirectoryStore::open(dir).expect("open store")
    }

    fn key(grain: &str) -> DirectoryKey {
        DirectoryKey {
            cluster_id: ClusterId::new("c1"),
            provider_id: ProviderId::new("default"),
            grain_id: GrainId::new("user", grain),
        }
    }

    fn silo(port: u16) -> SiloAddress {
        SiloAddress::new(SocketAddr::from(([127, 0, 0, 1], port)), 1)
    }

    fn addr(grain: &str, port: u16, act: u128, version: u64) -> GrainAddress {
        GrainAddress::new(
            GrainId::new("user", grain),
            silo(port),
            ActivationId::from_u128(act),
            MembershipVersion(version),
        )
    }

    #[tokio::test]
    async fn insert_conflict_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let k = key("a");

        let InsertOutcome::Inserted(entry) = store.try_insert(&k, addr("a", 1, 1, 1)).await.unwrap()
        else {
            panic!("expected insert")
        };
        let second = store.try_insert(&k, addr("a", 2, 2, 1)).await.unwrap();
        assert_eq!(second, InsertOutcome::Conflict(entry.clone()));
        assert_eq!(store.find(&k).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn replace_moves_owner_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let k = key("a");
        let first = store.try_insert(&k, addr("a", 1, 1, 1)).await.unwrap().into_entry();

        let resp = store.try_replace(&k, addr("a", 2, 2, 2), first.token).await.unwrap();
        assert!(matches!(resp, ReplaceOutcome::Replaced(_)));

        // The old silo no longer owns anything; the new one does.
        let removed_old = store
            .bulk_delete_by_owners(&k.cluster_id, &k.provider_id, &[silo(1)])
            .await
            .unwrap();
        assert_eq!(removed_old, 0);
        let removed_new = store
            .bulk_delete_by_owners(&k.cluster_id, &k.provider_id, &[silo(2)])
            .await
            .unwrap();
        assert_eq!(removed_new, 1);
        assert!(store.find(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let k = key("a");
        let first = store.try_insert(&k, addr("a", 1, 1, 1)).await.unwrap().into_entry();
        store.try_replace(&k, addr("a", 1, 1, 2), first.token).await.unwrap();

        let resp = store.try_replace(&k, addr("a", 1, 1, 3), first.token).await.unwrap();
        let ReplaceOutcome::Conflict(Some(current)) = resp else { panic!("expected conflict") };
        assert_eq!(current.address.membership_version, MembershipVersion(2));
    }

    #[tokio::test]
    async fn conditional_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let k = key("a");
        store.try_insert(&k, addr("a", 1, 1, 4)).await.unwrap();

        let too_fresh = DeletePrecondition::RegisteredAtOrBefore(MembershipVersion(3));
        assert!(!store.try_delete(&k, ActivationId::from_u128(1), &too_fresh).await.unwrap());
        assert!(!store
            .try_delete(&k, ActivationId::from_u128(9), &DeletePrecondition::Always)
            .await
            .unwrap());

        let old_enough = DeletePrecondition::RegisteredAtOrBefore(MembershipVersion(4));
        assert!(store.try_delete(&k, ActivationId::from_u128(1), &old_enough).await.unwrap());
        assert!(!store.try_delete(&k, ActivationId::from_u128(1), &old_enough).await.unwrap());
    }

    #[tokio::test]
    async fn bulk_delete_spares_other_silos() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        for (i, port) in [(1u128, 1u16), (2, 1), (3, 2), (4, 3)] {
            let grain = format!("g{i}");
            store.try_insert(&key(&grain), addr(&grain, port, i, 1)).await.unwrap();
        }

        let removed = store
            .bulk_delete_by_owners(
                &ClusterId::new("c1"),
                &ProviderId::new("default"),
                &[silo(1), silo(3)],
            )
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert!(store.find(&key("g1")).await.unwrap().is_none());
        assert!(store.find(&key("g3")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn durability_and_token_counter() {
        let dir = tempfile::tempdir().unwrap();
        let first_token = {
            let store = open(dir.path());
            store.try_insert(&key("a"), addr("a", 1, 1, 1)).await.unwrap().into_entry().token
        };

        let store = open(dir.path());
        let found = store.find(&key("a")).await.unwrap().unwrap();
        assert_eq!(found.token, first_token);

        // Tokens keep increasing across a reopen.
        let next = store.try_insert(&key("b"), addr("b", 1, 2, 1)).await.unwrap().into_entry();
        assert!(next.token > first_token);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_inserts_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open(dir.path()));
        let k = key("hot");

        let mut handles = Vec::new();
        for n in 1..=50u128 {
            let store = store.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                store.try_insert(&k, addr("hot", 1, n, 1)).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if matches!(h.await.unwrap(), InsertOutcome::Inserted(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
