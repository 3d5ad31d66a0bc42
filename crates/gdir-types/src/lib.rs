use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

pub mod cause;

pub use cause::{CausePolicy, DeletePrecondition, UnregistrationCause};

/// Logical kind of a grain; the unit registration strategies are chosen by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct GrainType(pub String);

impl GrainType {
    pub fn new(name: impl Into<String>) -> Self {
        GrainType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique logical identity of an actor: type plus key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct GrainId {
    pub grain_type: GrainType,
    pub key: String,
}

impl GrainId {
    pub fn new(grain_type: impl Into<String>, key: impl Into<String>) -> Self {
        GrainId { grain_type: GrainType::new(grain_type), key: key.into() }
    }

    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.grain_type.0.is_empty() {
            return Err(DirectoryError::InvalidArgument("grain type must not be empty".into()));
        }
        if self.key.is_empty() {
            return Err(DirectoryError::InvalidArgument("grain key must not be empty".into()));
        }
        Ok(())
    }
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.grain_type, self.key)
    }
}

/// Parses the `type/key` form produced by `Display`. The key may itself
/// contain `/`; only the first separator splits.
impl FromStr for GrainId {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (grain_type, key) = s
            .split_once('/')
            .ok_or_else(|| DirectoryError::InvalidArgument(format!("malformed grain id '{s}'")))?;
        let id = GrainId::new(grain_type, key);
        id.validate()?;
        Ok(id)
    }
}

/// A runtime process: network endpoint plus the generation that tells
/// restarts on the same endpoint apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SiloAddress {
    pub endpoint: SocketAddr,
    pub generation: i64,
}

impl SiloAddress {
    pub fn new(endpoint: SocketAddr, generation: i64) -> Self {
        SiloAddress { endpoint, generation }
    }
}

impl fmt::Display for SiloAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.endpoint, self.generation)
    }
}

/// One instantiation of a grain on one silo. Freshly minted ids are random
/// v4 UUIDs and are never reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ActivationId(pub uuid::Uuid);

impl ActivationId {
    pub fn new() -> Self {
        ActivationId(uuid::Uuid::new_v4())
    }

    pub fn from_u128(v: u128) -> Self {
        ActivationId(uuid::Uuid::from_u128(v))
    }
}

impl Default for ActivationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Counter published by cluster membership. Used as a coarse recency
/// marker, not a Lamport clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MembershipVersion(pub u64);

impl fmt::Display for MembershipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        ClusterId(id.into())
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        ProviderId(id.into())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The directory's value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GrainAddress {
    pub grain_id: GrainId,
    pub silo: SiloAddress,
    pub activation: ActivationId,
    pub membership_version: MembershipVersion,
}

impl GrainAddress {
    pub fn new(
        grain_id: GrainId,
        silo: SiloAddress,
        activation: ActivationId,
        membership_version: MembershipVersion,
    ) -> Self {
        GrainAddress { grain_id, silo, activation, membership_version }
    }

    /// Two addresses name the same activation iff grain, silo and activation
    /// match; the membership version is ignored.
    pub fn same_activation(&self, other: &GrainAddress) -> bool {
        self.grain_id == other.grain_id
            && self.silo == other.silo
            && self.activation == other.activation
    }

    pub fn validate(&self) -> Result<(), DirectoryError> {
        self.grain_id.validate()
    }
}

impl fmt::Display for GrainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} #{} (v{})",
            self.grain_id, self.silo, self.activation, self.membership_version
        )
    }
}

/// Opaque compare-and-swap marker assigned by the backend on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ConcurrencyToken(pub u64);

impl ConcurrencyToken {
    /// Never issued by a backend; supplying it means no read happened first.
    pub const UNSET: ConcurrencyToken = ConcurrencyToken(0);
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Primary key of a directory row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct DirectoryKey {
    pub cluster_id: ClusterId,
    pub provider_id: ProviderId,
    pub grain_id: GrainId,
}

/// Persisted row. At most one exists per `DirectoryKey`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DirectoryEntry {
    pub cluster_id: ClusterId,
    pub provider_id: ProviderId,
    pub address: GrainAddress,
    pub token: ConcurrencyToken,
}

impl DirectoryEntry {
    pub fn key(&self) -> DirectoryKey {
        DirectoryKey {
            cluster_id: self.cluster_id.clone(),
            provider_id: self.provider_id.clone(),
            grain_id: self.address.grain_id.clone(),
        }
    }
}

/// Cross-cluster ownership state of a single-instance registration.
/// Kept in memory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MultiClusterStatus {
    Owned,
    Doubtful,
    RequestedOwnership,
    Cached,
    RaceLoser,
}

impl fmt::Display for MultiClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MultiClusterStatus::Owned => "owned",
            MultiClusterStatus::Doubtful => "doubtful",
            MultiClusterStatus::RequestedOwnership => "requested_ownership",
            MultiClusterStatus::Cached => "cached",
            MultiClusterStatus::RaceLoser => "race_loser",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("concurrent update conflict on grain {grain_id}")]
    Conflict { grain_id: String },
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("operation timed out")]
    Timeout,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("remote cluster error: {0}")]
    Remote(String),
}

impl DirectoryError {
    /// Failures worth another attempt against the backing store.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::Storage(_) | DirectoryError::Timeout | DirectoryError::Unavailable(_)
        )
    }
}
