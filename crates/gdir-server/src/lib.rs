mod cluster_service;
mod convert;
mod directory_service;
mod remote;

use std::net::SocketAddr;
use std::sync::Arc;

use gdir_directory::{ClusterMembership, GrainDirectory, RemoteClusters};
use gdir_proto::v1::{
    cluster_directory_service_server::ClusterDirectoryServiceServer,
    grain_directory_service_server::GrainDirectoryServiceServer,
};
use gdir_storage::DirectoryStore;
use tonic_reflection::server::Builder as ReflectionBuilder;

use cluster_service::ClusterDirectoryServiceImpl;
use directory_service::GrainDirectoryServiceImpl;

pub use convert::directory_to_status;
pub use remote::GrpcRemoteClusters;

/// Serves `GrainDirectoryService` to the local runtime.
pub async fn serve_client<S, M, R>(
    addr: SocketAddr,
    directory: Arc<GrainDirectory<S, M, R>>,
) -> anyhow::Result<()>
where
    S: DirectoryStore,
    M: ClusterMembership,
    R: RemoteClusters,
{
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(gdir_proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;
    tracing::info!(%addr, cluster = %directory.cluster_id(), "client gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(GrainDirectoryServiceServer::new(GrainDirectoryServiceImpl::new(directory)))
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}

/// Serves `ClusterDirectoryService` to peer clusters.
pub async fn serve_cluster<S, M, R>(
    addr: SocketAddr,
    directory: Arc<GrainDirectory<S, M, R>>,
) -> anyhow::Result<()>
where
    S: DirectoryStore,
    M: ClusterMembership,
    R: RemoteClusters,
{
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(gdir_proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;
    tracing::info!(%addr, cluster = %directory.cluster_id(), "cluster gRPC server starting");
    tonic::transport::Server::builder()
        .add_service(ClusterDirectoryServiceServer::new(ClusterDirectoryServiceImpl::new(directory)))
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(Into::into)
}
