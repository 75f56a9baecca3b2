use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tonic::{Request, Response, Status};

use crate::rpc::{self, namedir_proto};
use crate::utils::types::Address;

/// The actual local name→address table (§4.3's "name-registry server").
/// `NameDir` wraps one of these and decides, via election, whether it is the
/// live instance other hosts should be talking to.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Address>>,
}

impl Registry {
    pub fn new() -> Arc<Registry> {
        Arc::new(Registry::default())
    }

    pub async fn register(&self, name: String, address: Address, safe: bool) {
        let mut entries = self.entries.lock().await;
        if safe && entries.contains_key(&name) {
            return;
        }
        entries.insert(name, address);
    }

    pub async fn lookup(&self, name: &str) -> Option<Address> {
        self.entries.lock().await.get(name).cloned()
    }

    pub async fn remove(&self, name: &str) {
        self.entries.lock().await.remove(name);
    }

    pub async fn list(&self) -> HashMap<String, Address> {
        self.entries.lock().await.clone()
    }
}

pub struct RegistryService {
    pub registry: Arc<Registry>,
}

#[tonic::async_trait]
impl namedir_proto::name_registry_server::NameRegistry for RegistryService {
    async fn lookup(
        &self,
        request: Request<namedir_proto::LookupRequest>,
    ) -> Result<Response<namedir_proto::LookupResponse>, Status> {
        let name = request.into_inner().name;
        match self.registry.lookup(&name).await {
            Some(address) => Ok(Response::new(namedir_proto::LookupResponse {
                found: true,
                address: address.to_string(),
            })),
            None => Ok(Response::new(namedir_proto::LookupResponse {
                found: false,
                address: String::new(),
            })),
        }
    }

    async fn register(
        &self,
        request: Request<namedir_proto::RegisterRequest>,
    ) -> Result<Response<namedir_proto::Empty>, Status> {
        let req = request.into_inner();
        let address = rpc::parse_address(&req.address)?;
        self.registry.register(req.name, address, req.safe).await;
        Ok(Response::new(namedir_proto::Empty {}))
    }

    async fn remove(
        &self,
        request: Request<namedir_proto::RemoveRequest>,
    ) -> Result<Response<namedir_proto::Empty>, Status> {
        self.registry.remove(&request.into_inner().name).await;
        Ok(Response::new(namedir_proto::Empty {}))
    }

    async fn list(
        &self,
        _request: Request<namedir_proto::Empty>,
    ) -> Result<Response<namedir_proto::ListResponse>, Status> {
        let entries = self
            .registry
            .list()
            .await
            .into_iter()
            .map(|(name, address)| (name, address.to_string()))
            .collect();
        Ok(Response::new(namedir_proto::ListResponse { entries }))
    }

    async fn health(
        &self,
        _request: Request<namedir_proto::Empty>,
    ) -> Result<Response<namedir_proto::Empty>, Status> {
        Ok(Response::new(namedir_proto::Empty {}))
    }
}
