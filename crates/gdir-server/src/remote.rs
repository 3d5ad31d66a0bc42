use std::collections::HashMap;
use std::time::Duration;

use gdir_directory::{RemoteClusters, RemoteEntry, RemoteQuery};
use gdir_proto::v1::{
    cluster_directory_service_client::ClusterDirectoryServiceClient, QueryOwnershipRequest,
};
use gdir_types::{ClusterId, DirectoryError};
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

use crate::convert::{grain_id_to_proto, ownership_from_proto, status_to_directory};

/// `RemoteClusters` over gRPC. Channels are created on first use per
/// cluster and reused afterwards; tonic reconnects them as needed.
pub struct GrpcRemoteClusters {
    endpoints: HashMap<ClusterId, String>,
    clients: Mutex<HashMap<ClusterId, ClusterDirectoryServiceClient<Channel>>>,
    connect_timeout: Duration,
}

impl GrpcRemoteClusters {
    pub fn new(endpoints: impl IntoIterator<Item = (ClusterId, String)>, connect_timeout: Duration) -> Self {
        GrpcRemoteClusters {
            endpoints: endpoints.into_iter().collect(),
            clients: Mutex::new(HashMap::new()),
            connect_timeout,
        }
    }

    async fn client(&self, cluster: &ClusterId) -> Result<ClusterDirectoryServiceClient<Channel>, DirectoryError> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(cluster) {
            return Ok(client.clone());
        }
        let url = self
            .endpoints
            .get(cluster)
            .ok_or_else(|| DirectoryError::Unavailable(format!("no endpoint configured for cluster {cluster}")))?;
        let channel = Endpoint::from_shared(url.clone())
            .map_err(|e| DirectoryError::InvalidArgument(format!("bad endpoint '{url}' for {cluster}: {e}")))?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();
        tracing::debug!(%cluster, %url, "created channel to peer cluster");
        let client = ClusterDirectoryServiceClient::new(channel);
        clients.insert(cluster.clone(), client.clone());
        Ok(client)
    }
}

impl RemoteClusters for GrpcRemoteClusters {
    async fn query(&self, cluster: &ClusterId, query: RemoteQuery) -> Result<Option<RemoteEntry>, DirectoryError> {
        let mut client = self.client(cluster).await?;
        let request = QueryOwnershipRequest {
            grain_id: Some(grain_id_to_proto(&query.grain_id)),
            requesting_cluster_id: query.requesting_cluster.0,
            membership_version: query.membership_version.0,
        };
        let response = client.query_ownership(request).await.map_err(status_to_directory)?;
        ownership_from_proto(response.into_inner())
    }
}
