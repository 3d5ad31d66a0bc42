use std::sync::Arc;

use gdir_directory::{ClusterMembership, GrainDirectory, RemoteClusters};
use gdir_proto::v1::{
    grain_directory_service_server::GrainDirectoryService, LookupRequest, LookupResponse,
    RegisterRequest, RegisterResponse, UnregisterManyRequest, UnregisterManyResponse,
    UnregisterRequest, UnregisterResponse, UnregisterResult, UnregisterSilosRequest,
    UnregisterSilosResponse,
};
use gdir_storage::DirectoryStore;
use tonic::{Request, Response, Status};

use crate::convert::{
    address_from_proto, address_to_proto, cause_from_proto, directory_to_status,
    grain_id_from_proto, silo_from_proto, status_to_proto,
};

pub struct GrainDirectoryServiceImpl<S, M, R> {
    directory: Arc<GrainDirectory<S, M, R>>,
}

impl<S, M, R> GrainDirectoryServiceImpl<S, M, R> {
    pub fn new(directory: Arc<GrainDirectory<S, M, R>>) -> Self {
        GrainDirectoryServiceImpl { directory }
    }
}

#[tonic::async_trait]
impl<S, M, R> GrainDirectoryService for GrainDirectoryServiceImpl<S, M, R>
where
    S: DirectoryStore,
    M: ClusterMembership,
    R: RemoteClusters,
{
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        let candidate = address_from_proto(req.candidate).map_err(directory_to_status)?;
        let previous = req
            .previous
            .map(|p| address_from_proto(Some(p)))
            .transpose()
            .map_err(directory_to_status)?;

        let winner = self
            .directory
            .register(candidate.clone(), previous)
            .await
            .map_err(directory_to_status)?;
        Ok(Response::new(RegisterResponse {
            won: winner.same_activation(&candidate),
            address: Some(address_to_proto(&winner)),
        }))
    }

    async fn lookup(
        &self,
        request: Request<LookupRequest>,
    ) -> Result<Response<LookupResponse>, Status> {
        let grain_id = grain_id_from_proto(request.into_inner().grain_id).map_err(directory_to_status)?;
        let address = self.directory.lookup(&grain_id).await.map_err(directory_to_status)?;
        let status = match &address {
            Some(a) => self
                .directory
                .status(&grain_id)
                .await
                .filter(|r| r.address.same_activation(a))
                .map(|r| r.status),
            None => None,
        };
        Ok(Response::new(LookupResponse {
            address: address.as_ref().map(address_to_proto),
            status: status_to_proto(status),
        }))
    }

    async fn unregister(
        &self,
        request: Request<UnregisterRequest>,
    ) -> Result<Response<UnregisterResponse>, Status> {
        let req = request.into_inner();
        let address = address_from_proto(req.address).map_err(directory_to_status)?;
        let cause = cause_from_proto(req.cause).map_err(directory_to_status)?;
        let removed = self
            .directory
            .unregister(&address, cause)
            .await
            .map_err(directory_to_status)?;
        Ok(Response::new(UnregisterResponse { removed }))
    }

    async fn unregister_many(
        &self,
        request: Request<UnregisterManyRequest>,
    ) -> Result<Response<UnregisterManyResponse>, Status> {
        let req = request.into_inner();
        let cause = cause_from_proto(req.cause).map_err(directory_to_status)?;
        let addresses = req
            .addresses
            .into_iter()
            .map(|a| address_from_proto(Some(a)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(directory_to_status)?;

        let results = self
            .directory
            .unregister_many(addresses, cause)
            .await
            .into_iter()
            .map(|o| UnregisterResult {
                address: Some(address_to_proto(&o.address)),
                removed: matches!(o.result, Ok(true)),
                error: o.result.err().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect();
        Ok(Response::new(UnregisterManyResponse { results }))
    }

    async fn unregister_silos(
        &self,
        request: Request<UnregisterSilosRequest>,
    ) -> Result<Response<UnregisterSilosResponse>, Status> {
        let silos = request
            .into_inner()
            .silos
            .into_iter()
            .map(silo_from_proto)
            .collect::<Result<Vec<_>, _>>()
            .map_err(directory_to_status)?;
        let removed = self
            .directory
            .unregister_silos(&silos)
            .await
            .map_err(directory_to_status)?;
        Ok(Response::new(UnregisterSilosResponse { removed }))
    }
}
