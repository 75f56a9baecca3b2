use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};

use crate::config::Config;
use crate::rpc::{self, chord_proto};
use crate::utils::types::{Address, Key, KvStore, Value};

/// The co-located key/value data layer (§4.2). Routes every operation
/// through `find_successor` on the owning `ChordNode`; the node holds an
/// `Arc<ChordData>` for its own local triggers (`refresh`,
/// `refresh_replication`), so this module never depends on `ChordNode`
/// directly to avoid a reference cycle (§9 "cyclic references").
pub struct ChordData {
    pub node_address: Address,
    local_items: Mutex<KvStore>,
    replicated: Mutex<Vec<KvStore>>,
    config: Config,
    /// Set once by `main` after the `ChordNode` is constructed, since the two
    /// are mutually dependent at startup (§9 "cyclic references": both sides
    /// hold only the other's address, realized here as a resolver callback).
    find_successor: Mutex<Option<Arc<dyn Fn(crate::utils::types::HashPos) -> FindSuccessorFut + Send + Sync>>>,
    /// Same pattern as `find_successor`: lets the `RefreshReplication` RPC
    /// (§4.2, §6 RPC surface) read the node's current successor list without
    /// this module holding a live `ChordNode` handle.
    get_successors: Mutex<Option<Arc<dyn Fn() -> SuccessorsFut + Send + Sync>>>,
}

type FindSuccessorFut =
    std::pin::Pin<Box<dyn std::future::Future<Output = Address> + Send>>;
type SuccessorsFut = std::pin::Pin<Box<dyn std::future::Future<Output = Vec<Address>> + Send>>;

impl ChordData {
    pub fn new(node_address: Address, config: Config) -> Arc<ChordData> {
        let replicated = vec![KvStore::new(); config.replication_size];
        Arc::new(ChordData {
            node_address,
            local_items: Mutex::new(KvStore::new()),
            replicated: Mutex::new(replicated),
            config,
            find_successor: Mutex::new(None),
            get_successors: Mutex::new(None),
        })
    }

    pub async fn bind_find_successor(
        &self,
        resolver: Arc<dyn Fn(crate::utils::types::HashPos) -> FindSuccessorFut + Send + Sync>,
    ) {
        *self.find_successor.lock().await = Some(resolver);
    }

    pub async fn bind_get_successors(&self, resolver: Arc<dyn Fn() -> SuccessorsFut + Send + Sync>) {
        *self.get_successors.lock().await = Some(resolver);
    }

    async fn current_successors(&self) -> Vec<Address> {
        let resolver = self.get_successors.lock().await.clone();
        match resolver {
            Some(f) => f().await,
            None => Vec::new(),
        }
    }

    async fn owner_of(&self, key: &Key) -> Address {
        let resolver = self.find_successor.lock().await.clone();
        match resolver {
            Some(f) => f(key.id()).await,
            None => self.node_address.clone(),
        }
    }

    /// §4.2 `insert`.
    pub async fn insert(&self, key: Key, value: Value, safe: bool) {
        let owner = self.owner_of(&key).await;
        if owner == self.node_address {
            let mut items = self.local_items.lock().await;
            if safe && items.contains_key(&key) {
                return;
            }
            items.insert(key, value);
            return;
        }
        let service_address = owner.service_address();
        if !rpc::reachable(&service_address, self.config.request_timeout).await {
            warn!("insert: owner {service_address} unreachable, dropping");
            return;
        }
        if let Ok(channel) = rpc::connect(&service_address).await {
            let mut client = chord_proto::chord_data_client::ChordDataClient::new(channel);
            let _ = client
                .insert(chord_proto::InsertRequest {
                    key: key_to_bytes(&key),
                    value,
                    append: false,
                    safe,
                })
                .await;
        }
    }

    /// §4.2 `lookup`.
    pub async fn lookup(&self, key: Key) -> Option<Value> {
        let owner = self.owner_of(&key).await;
        if owner == self.node_address {
            return self.local_items.lock().await.get(&key).cloned();
        }
        let service_address = owner.service_address();
        if !rpc::reachable(&service_address, self.config.request_timeout).await {
            return None;
        }
        let channel = rpc::connect(&service_address).await.ok()?;
        let mut client = chord_proto::chord_data_client::ChordDataClient::new(channel);
        let reply = client
            .lookup(chord_proto::LookupRequest {
                key: key_to_bytes(&key),
            })
            .await
            .ok()?
            .into_inner();
        reply.found.then_some(reply.value)
    }

    /// §4.2 `remove`.
    pub async fn remove(&self, key: Key) {
        let owner = self.owner_of(&key).await;
        if owner == self.node_address {
            self.local_items.lock().await.remove(&key);
            return;
        }
        let service_address = owner.service_address();
        if let Ok(channel) = rpc::connect(&service_address).await {
            let mut client = chord_proto::chord_data_client::ChordDataClient::new(channel);
            let _ = client
                .remove(chord_proto::RemoveRequest {
                    key: key_to_bytes(&key),
                })
                .await;
        }
    }

    /// §4.2 `refresh`: snapshot, clear, and safe-reinsert every local item so
    /// entries that fell outside our arc after a ring change migrate away.
    pub async fn refresh(&self) {
        let snapshot: Vec<(Key, Value)> = {
            let mut items = self.local_items.lock().await;
            items.drain().collect()
        };
        for (key, value) in snapshot {
            self.insert(key, value, true).await;
        }
    }

    /// §4.2 `refresh_replication`.
    pub async fn refresh_replication(&self, successors: &[Address]) {
        let mut replicated = self.replicated.lock().await;
        for i in 0..self.config.replication_size {
            let Some(successor) = successors.get(i) else {
                replicated[i] = KvStore::new();
                continue;
            };
            let service_address = successor.service_address();
            if !rpc::reachable(&service_address, self.config.request_timeout).await {
                debug!("refresh_replication: successor {i} ({service_address}) unreachable, keeping stale shard");
                continue;
            }
            if let Ok(channel) = rpc::connect(&service_address).await {
                let mut client = chord_proto::chord_data_client::ChordDataClient::new(channel);
                if let Ok(reply) = client.get_items(chord_proto::Empty {}).await {
                    let mut shard = KvStore::new();
                    for pair in reply.into_inner().pairs {
                        match bytes_to_key(&pair.key) {
                            Ok(key) => {
                                shard.insert(key, pair.value);
                            }
                            Err(e) => warn!("refresh_replication: malformed key from successor {i}: {e}"),
                        }
                    }
                    replicated[i] = shard;
                }
            }
        }
    }

    /// §4.2 `claim_replicated_items`: merges the first `n` replicated shards
    /// into local items, then left-shifts, right-padding with empty shards.
    pub async fn claim_replicated_items(&self, n: u32) {
        let n = n as usize;
        let mut replicated = self.replicated.lock().await;
        let mut items = self.local_items.lock().await;
        let take = n.min(replicated.len());
        for shard in replicated.drain(0..take) {
            items.extend(shard);
        }
        for _ in 0..take {
            replicated.push(KvStore::new());
        }
    }

    pub async fn len(&self) -> usize {
        self.local_items.lock().await.len()
    }

    pub async fn dump_items(&self) -> Vec<(Key, Value)> {
        self.local_items
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn dump_debug(&self) -> Vec<(String, String)> {
        self.local_items
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v).to_string()))
            .collect()
    }
}

/// Wire encoding for `Key` (§4.2): a leading tag byte keeps `Str` and `Int`
/// distinguishable across the `bytes key` proto field, so a routed `Int` key
/// reconstructs to the same id on the remote owner as it would locally.
const KEY_TAG_STR: u8 = 0;
const KEY_TAG_INT: u8 = 1;

fn key_to_bytes(key: &Key) -> Vec<u8> {
    match key {
        Key::Str(s) => {
            let mut bytes = Vec::with_capacity(1 + s.len());
            bytes.push(KEY_TAG_STR);
            bytes.extend_from_slice(s.as_bytes());
            bytes
        }
        Key::Int(n) => {
            let mut bytes = Vec::with_capacity(1 + 8);
            bytes.push(KEY_TAG_INT);
            bytes.extend_from_slice(&n.to_be_bytes());
            bytes
        }
    }
}

fn bytes_to_key(bytes: &[u8]) -> Result<Key, Status> {
    match bytes.split_first() {
        Some((&KEY_TAG_STR, rest)) => Ok(Key::Str(String::from_utf8_lossy(rest).to_string())),
        Some((&KEY_TAG_INT, rest)) => {
            let octets: [u8; 8] = rest
                .try_into()
                .map_err(|_| Status::invalid_argument("malformed int key"))?;
            Ok(Key::Int(u64::from_be_bytes(octets)))
        }
        _ => Err(Status::invalid_argument("key must not be empty")),
    }
}

pub struct ChordDataService {
    pub data: Arc<ChordData>,
}

#[tonic::async_trait]
impl chord_proto::chord_data_server::ChordData for ChordDataService {
    async fn insert(
        &self,
        request: Request<chord_proto::InsertRequest>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        let req = request.into_inner();
        let key = bytes_to_key(&req.key)?;
        self.data.insert(key, req.value, req.safe).await;
        Ok(Response::new(chord_proto::Empty {}))
    }

    async fn lookup(
        &self,
        request: Request<chord_proto::LookupRequest>,
    ) -> Result<Response<chord_proto::LookupResponse>, Status> {
        let req = request.into_inner();
        let key = bytes_to_key(&req.key)?;
        match self.data.lookup(key).await {
            Some(value) => Ok(Response::new(chord_proto::LookupResponse { found: true, value })),
            None => Ok(Response::new(chord_proto::LookupResponse {
                found: false,
                value: vec![],
            })),
        }
    }

    async fn remove(
        &self,
        request: Request<chord_proto::RemoveRequest>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        let req = request.into_inner();
        let key = bytes_to_key(&req.key)?;
        self.data.remove(key).await;
        Ok(Response::new(chord_proto::Empty {}))
    }

    async fn refresh(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        self.data.refresh().await;
        Ok(Response::new(chord_proto::Empty {}))
    }

    async fn refresh_replication(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        let successors = self.data.current_successors().await;
        self.data.refresh_replication(&successors).await;
        Ok(Response::new(chord_proto::Empty {}))
    }

    async fn claim_replicated_items(
        &self,
        request: Request<chord_proto::ClaimReplicatedItemsRequest>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        self.data
            .claim_replicated_items(request.into_inner().count)
            .await;
        Ok(Response::new(chord_proto::Empty {}))
    }

    async fn get_items(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::ItemsResponse>, Status> {
        let pairs = self
            .data
            .dump_items()
            .await
            .into_iter()
            .map(|(key, value)| chord_proto::KvPairMsg {
                key: key_to_bytes(&key),
                value,
            })
            .collect();
        Ok(Response::new(chord_proto::ItemsResponse { pairs }))
    }

    async fn get_kv_store_size(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::GetKvStoreSizeResponse>, Status> {
        Ok(Response::new(chord_proto::GetKvStoreSizeResponse {
            size: self.data.len().await as u32,
        }))
    }

    async fn get_kv_store_data(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::GetKvStoreDataResponse>, Status> {
        let pairs = self
            .data
            .dump_debug()
            .await
            .into_iter()
            .map(|(key, value)| chord_proto::KvPairDebugMsg { key, value })
            .collect();
        Ok(Response::new(chord_proto::GetKvStoreDataResponse { pairs }))
    }

    async fn health(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        Ok(Response::new(chord_proto::Empty {}))
    }
}
