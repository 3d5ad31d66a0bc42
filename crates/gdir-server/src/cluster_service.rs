use std::sync::Arc;

use gdir_directory::{ClusterMembership, GrainDirectory, RemoteClusters, RemoteQuery};
use gdir_proto::v1::{
    cluster_directory_service_server::ClusterDirectoryService, QueryOwnershipRequest,
    QueryOwnershipResponse,
};
use gdir_storage::DirectoryStore;
use gdir_types::{ClusterId, MembershipVersion};
use tonic::{Request, Response, Status};

use crate::convert::{directory_to_status, grain_id_from_proto, ownership_to_proto};

pub struct ClusterDirectoryServiceImpl<S, M, R> {
    directory: Arc<GrainDirectory<S, M, R>>,
}

impl<S, M, R> ClusterDirectoryServiceImpl<S, M, R> {
    pub fn new(directory: Arc<GrainDirectory<S, M, R>>) -> Self {
        ClusterDirectoryServiceImpl { directory }
    }
}

#[tonic::async_trait]
impl<S, M, R> ClusterDirectoryService for ClusterDirectoryServiceImpl<S, M, R>
where
    S: DirectoryStore,
    M: ClusterMembership,
    R: RemoteClusters,
{
    async fn query_ownership(
        &self,
        request: Request<QueryOwnershipRequest>,
    ) -> Result<Response<QueryOwnershipResponse>, Status> {
        let req = request.into_inner();
        if req.requesting_cluster_id.is_empty() {
            return Err(Status::invalid_argument("requesting_cluster_id must not be empty"));
        }
        let query = RemoteQuery {
            grain_id: grain_id_from_proto(req.grain_id).map_err(directory_to_status)?,
            requesting_cluster: ClusterId::new(req.requesting_cluster_id),
            membership_version: MembershipVersion(req.membership_version),
        };
        let entry = self
            .directory
            .answer_remote_query(&query)
            .await
            .map_err(directory_to_status)?;
        Ok(Response::new(ownership_to_proto(entry)))
    }
}
