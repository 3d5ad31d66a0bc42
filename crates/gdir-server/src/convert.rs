use std::net::SocketAddr;

use gdir_directory::RemoteEntry;
use gdir_proto::v1 as pb;
use gdir_types::{
    ActivationId, ClusterId, DirectoryError, GrainAddress, GrainId, MembershipVersion,
    MultiClusterStatus, SiloAddress, UnregistrationCause,
};
use tonic::Status;

pub fn grain_id_to_proto(id: &GrainId) -> pb::GrainId {
    pb::GrainId { grain_type: id.grain_type.0.clone(), key: id.key.clone() }
}

pub fn grain_id_from_proto(id: Option<pb::GrainId>) -> Result<GrainId, DirectoryError> {
    let id = id.ok_or_else(|| DirectoryError::InvalidArgument("grain id is required".into()))?;
    let id = GrainId::new(id.grain_type, id.key);
    id.validate()?;
    Ok(id)
}

pub fn silo_to_proto(silo: &SiloAddress) -> pb::SiloAddress {
    pb::SiloAddress { endpoint: silo.endpoint.to_string(), generation: silo.generation }
}

pub fn silo_from_proto(silo: pb::SiloAddress) -> Result<SiloAddress, DirectoryError> {
    let endpoint: SocketAddr = silo.endpoint.parse().map_err(|_| {
        DirectoryError::InvalidArgument(format!("invalid silo endpoint '{}'", silo.endpoint))
    })?;
    Ok(SiloAddress::new(endpoint, silo.generation))
}

pub fn address_to_proto(address: &GrainAddress) -> pb::GrainAddress {
    pb::GrainAddress {
        grain_id: Some(grain_id_to_proto(&address.grain_id)),
        silo: Some(silo_to_proto(&address.silo)),
        activation_id: address.activation.0.hyphenated().to_string(),
        membership_version: address.membership_version.0,
    }
}

pub fn address_from_proto(address: Option<pb::GrainAddress>) -> Result<GrainAddress, DirectoryError> {
    let address =
        address.ok_or_else(|| DirectoryError::InvalidArgument("grain address is required".into()))?;
    let grain_id = grain_id_from_proto(address.grain_id)?;
    let silo = address
        .silo
        .ok_or_else(|| DirectoryError::InvalidArgument("grain address is missing its silo".into()))
        .and_then(silo_from_proto)?;
    let activation = uuid::Uuid::parse_str(&address.activation_id)
        .map(ActivationId)
        .map_err(|_| {
            DirectoryError::InvalidArgument(format!("invalid activation id '{}'", address.activation_id))
        })?;
    Ok(GrainAddress::new(grain_id, silo, activation, MembershipVersion(address.membership_version)))
}

pub fn cause_from_proto(raw: i32) -> Result<UnregistrationCause, DirectoryError> {
    match pb::UnregistrationCause::try_from(raw) {
        Ok(pb::UnregistrationCause::Force) => Ok(UnregistrationCause::Force),
        Ok(pb::UnregistrationCause::CacheInvalidation) => Ok(UnregistrationCause::CacheInvalidation),
        Ok(pb::UnregistrationCause::NonexistentActivation) => {
            Ok(UnregistrationCause::NonexistentActivation)
        }
        Ok(pb::UnregistrationCause::Unspecified) | Err(_) => Err(DirectoryError::InvalidArgument(
            format!("unregistration cause {raw} is not supported"),
        )),
    }
}

pub fn status_to_proto(status: Option<MultiClusterStatus>) -> i32 {
    let status = match status {
        None => pb::MultiClusterStatus::Unspecified,
        Some(MultiClusterStatus::Owned) => pb::MultiClusterStatus::Owned,
        Some(MultiClusterStatus::Doubtful) => pb::MultiClusterStatus::Doubtful,
        Some(MultiClusterStatus::RequestedOwnership) => pb::MultiClusterStatus::RequestedOwnership,
        Some(MultiClusterStatus::Cached) => pb::MultiClusterStatus::Cached,
        Some(MultiClusterStatus::RaceLoser) => pb::MultiClusterStatus::RaceLoser,
    };
    status as i32
}

pub fn status_from_proto(raw: i32) -> Option<MultiClusterStatus> {
    match pb::MultiClusterStatus::try_from(raw).ok()? {
        pb::MultiClusterStatus::Unspecified => None,
        pb::MultiClusterStatus::Owned => Some(MultiClusterStatus::Owned),
        pb::MultiClusterStatus::Doubtful => Some(MultiClusterStatus::Doubtful),
        pb::MultiClusterStatus::RequestedOwnership => Some(MultiClusterStatus::RequestedOwnership),
        pb::MultiClusterStatus::Cached => Some(MultiClusterStatus::Cached),
        pb::MultiClusterStatus::RaceLoser => Some(MultiClusterStatus::RaceLoser),
    }
}

pub fn ownership_to_proto(entry: Option<RemoteEntry>) -> pb::QueryOwnershipResponse {
    match entry {
        None => pb::QueryOwnershipResponse::default(),
        Some(e) => pb::QueryOwnershipResponse {
            found: true,
            cluster_id: e.cluster_id.0,
            address: Some(address_to_proto(&e.address)),
            status: status_to_proto(e.status),
        },
    }
}

pub fn ownership_from_proto(resp: pb::QueryOwnershipResponse) -> Result<Option<RemoteEntry>, DirectoryError> {
    if !resp.found {
        return Ok(None);
    }
    Ok(Some(RemoteEntry {
        cluster_id: ClusterId::new(resp.cluster_id),
        address: address_from_proto(resp.address)?,
        status: status_from_proto(resp.status),
    }))
}

pub fn directory_to_status(err: DirectoryError) -> Status {
    match &err {
        DirectoryError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
        DirectoryError::Conflict { .. } => Status::aborted(err.to_string()),
        DirectoryError::Unavailable(_) | DirectoryError::Remote(_) => Status::unavailable(err.to_string()),
        DirectoryError::Timeout => Status::deadline_exceeded(err.to_string()),
        DirectoryError::Storage(_) => Status::internal(err.to_string()),
    }
}

/// Classifies a failed outbound call to a peer cluster.
pub fn status_to_directory(status: Status) -> DirectoryError {
    match status.code() {
        tonic::Code::DeadlineExceeded => DirectoryError::Timeout,
        tonic::Code::InvalidArgument => DirectoryError::InvalidArgument(status.message().to_string()),
        _ => DirectoryError::Remote(format!("{}: {}", status.code(), status.message())),
    }
}
