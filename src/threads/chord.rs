use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};

use crate::config::Config;
use crate::node::{FingerTable, SuccessorList};
use crate::rpc::{self, chord_proto};
use crate::threads::chord_data::ChordData;
use crate::utils::crypto;
use crate::utils::types::{Address, HashPos};

/// Per-host ring member (§4.1). Owns predecessor, successor list, and finger
/// table; exposes the `Chord` gRPC service and runs the stabilization loop.
pub struct ChordNode {
    pub address: Address,
    pub id: HashPos,
    pub config: Config,
    predecessor: Mutex<Option<Address>>,
    successors: Mutex<SuccessorList>,
    finger_table: Mutex<FingerTable>,
    data: Arc<ChordData>,
}

impl ChordNode {
    pub fn new(address: Address, config: Config, data: Arc<ChordData>) -> Arc<ChordNode> {
        let id = address.id();
        let finger_table = FingerTable::new(&id, config.finger_table_size);
        let successors = SuccessorList::singleton(address.clone(), config.replication_size);
        Arc::new(ChordNode {
            predecessor: Mutex::new(None),
            successors: Mutex::new(successors),
            finger_table: Mutex::new(finger_table),
            id,
            address,
            config,
            data,
        })
    }

    pub async fn direct_successor(&self) -> Address {
        self.successors
            .lock()
            .await
            .direct_successor()
            .cloned()
            .unwrap_or_else(|| self.address.clone())
    }

    pub async fn predecessor(&self) -> Option<Address> {
        self.predecessor.lock().await.clone()
    }

    pub async fn successor_list(&self) -> Vec<Address> {
        self.successors.lock().await.as_slice().to_vec()
    }

    /// §4.1 `find_successor`.
    pub async fn find_successor(&self, x: HashPos) -> Address {
        let successor = self.direct_successor().await;
        if successor.id() == self.id {
            return self.address.clone();
        }
        if crypto::in_arc(&x, &self.id, &successor.id()) {
            return successor;
        }
        let candidate = self.closest_preceding_node(x).await;
        if candidate.id() == self.id {
            return successor;
        }
        match self.call_find_successor(&candidate, x).await {
            Ok(address) => address,
            Err(e) => {
                warn!("find_successor tail call to {candidate} failed: {e}, returning direct successor");
                successor
            }
        }
    }

    async fn call_find_successor(&self, target: &Address, x: HashPos) -> Result<Address, tonic::Status> {
        let channel = rpc::connect(target)
            .await
            .map_err(|e| tonic::Status::unavailable(e.to_string()))?;
        let mut client = chord_proto::chord_client::ChordClient::new(channel);
        let reply = client
            .find_successor(chord_proto::FindSuccessorRequest {
                id: rpc::pos_to_bytes(&x),
            })
            .await?;
        rpc::parse_address(&reply.into_inner().address)
    }

    /// §4.1 `closest_preceding_node`: scans the finger table then the
    /// successor list in reverse, skipping entries that are not on the arc
    /// or not reachable, falling back to self.
    pub async fn closest_preceding_node(&self, x: HashPos) -> Address {
        let finger_candidates: Vec<Address> = {
            let finger_table = self.finger_table.lock().await;
            finger_table
                .fingers
                .iter()
                .rev()
                .filter_map(|f| f.address.clone())
                .filter(|a| crypto::in_arc(&a.id(), &self.id, &x))
                .collect()
        };
        let finger_candidate = self.first_reachable(&finger_candidates).await;

        let successor_candidates: Vec<Address> = {
            let successors = self.successors.lock().await;
            successors
                .as_slice()
                .iter()
                .rev()
                .filter(|a| crypto::in_arc(&a.id(), &self.id, &x))
                .cloned()
                .collect()
        };
        let successor_candidate = self.first_reachable(&successor_candidates).await;

        match (finger_candidate, successor_candidate) {
            (Some(f), Some(s)) => {
                if crypto::in_arc(&s.id(), &f.id(), &x) {
                    s
                } else {
                    f
                }
            }
            (Some(f), None) => f,
            (None, Some(s)) => s,
            (None, None) => self.address.clone(),
        }
    }

    /// First candidate (in the given order) that answers a reachability
    /// probe, honoring §4.1's "AND reachable(f)" clause on both scans above.
    async fn first_reachable(&self, candidates: &[Address]) -> Option<Address> {
        rpc::connect_to_first_reachable(candidates)
            .await
            .map(|(_channel, address, _idx)| address)
    }

    /// §4.1 `join`.
    pub async fn join(&self, seed: &Address) {
        let channel = match rpc::connect_with_retry(seed, &self.config).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("join: seed {seed} unreachable after retries: {e}, staying in a singleton ring");
                return;
            }
        };
        *self.predecessor.lock().await = None;
        {
            let mut successors = self.successors.lock().await;
            successors.replace(vec![]);
        }
        let mut client = chord_proto::chord_client::ChordClient::new(channel);
        let new_successor = match client
            .find_successor(chord_proto::FindSuccessorRequest {
                id: rpc::pos_to_bytes(&self.id),
            })
            .await
        {
            Ok(reply) => match rpc::parse_address(&reply.into_inner().address) {
                Ok(address) => address,
                Err(e) => {
                    warn!("join: seed {seed} returned an unparsable address: {e}");
                    return;
                }
            },
            Err(e) => {
                warn!("join: find_successor against seed {seed} failed: {e}");
                return;
            }
        };
        {
            let mut successors = self.successors.lock().await;
            successors.replace(vec![new_successor]);
        }
        self.data.refresh().await;
        self.data.refresh_replication(&self.successor_list().await).await;
        info!("joined ring via seed {seed}");
    }

    /// §4.1 `notify`.
    pub async fn notify(&self, candidate: Address) {
        let mut predecessor = self.predecessor.lock().await;
        let accept = match predecessor.as_ref() {
            None => true,
            Some(current) => {
                !rpc::reachable(current, self.config.request_timeout).await
                    || crypto::in_arc(&candidate.id(), &current.id(), &self.id)
            }
        };
        if accept {
            debug!("accepted {candidate} as predecessor");
            *predecessor = Some(candidate);
        }
    }

    /// §4.1 stabilization loop, step 1.
    async fn check_predecessor(&self) {
        let mut predecessor = self.predecessor.lock().await;
        if let Some(p) = predecessor.as_ref() {
            if !rpc::reachable(p, self.config.request_timeout).await {
                debug!("predecessor {p} unreachable, clearing");
                *predecessor = None;
            }
        }
    }

    /// §4.1 stabilization loop, step 2.
    async fn stabilize(&self) {
        let predecessor = self.predecessor().await;
        let successor = {
            let mut successors = self.successors.lock().await;
            if successors.direct_successor().is_none() {
                if let Some(p) = &predecessor {
                    successors.replace(vec![p.clone()]);
                }
            }
            successors.direct_successor().cloned()
        };
        let Some(successor) = successor else { return };
        if successor.id() == self.id {
            return;
        }

        if !rpc::reachable(&successor, self.config.request_timeout).await {
            let shifted = {
                let mut successors = self.successors.lock().await;
                successors.shift_left();
                successors.len()
            };
            let claimed = self.config.replication_size.saturating_sub(shifted);
            if claimed > 0 {
                self.data.claim_replicated_items(claimed as u32).await;
            }
            return;
        }

        if let Ok(channel) = rpc::connect(&successor).await {
            let mut client = chord_proto::chord_client::ChordClient::new(channel.clone());
            if let Ok(reply) = client.get_predecessor(chord_proto::Empty {}).await {
                if let Some(literal) = reply.into_inner().address {
                    if let Ok(x) = rpc::parse_address(&literal) {
                        if crypto::in_arc(&x.id(), &self.id, &successor.id()) {
                            let mut successors = self.successors.lock().await;
                            successors.prepend(x);
                        }
                    }
                }
            }

            let new_successor = self.direct_successor().await;
            if let Ok(reply) = client.get_successor_list(chord_proto::Empty {}).await {
                let mut rest = Vec::new();
                for literal in reply.into_inner().successors {
                    if let Ok(a) = rpc::parse_address(&literal) {
                        rest.push(a);
                    }
                }
                let mut combined = vec![new_successor.clone()];
                combined.extend(rest.into_iter().take(self.config.replication_size - 1));
                self.successors.lock().await.replace(combined);
            }
            self.data.refresh_replication(&self.successor_list().await).await;
            let _ = client
                .notify(chord_proto::NotifyRequest {
                    address: (&self.address).into(),
                })
                .await;
        }
    }

    /// §4.1 stabilization loop, step 3.
    async fn fix_fingers(&self) {
        let (index, start) = self.finger_table.lock().await.advance();
        let resolved = self.find_successor(start).await;
        self.finger_table.lock().await.set(index, resolved);
    }

    /// One stabilization tick: predecessor check, stabilize, fix one finger.
    /// `check_ring` (§4.1 step 4) lives in `NameDir`'s contest loop, which
    /// already knows how to look up and repair the ring-name binding.
    pub async fn tick(&self) {
        self.check_predecessor().await;
        self.stabilize().await;
        self.fix_fingers().await;
    }

    /// Spawns the periodic stabilizer; `alive` lets the caller stop it.
    pub fn spawn_stabilizer(self: Arc<Self>, alive: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while alive.load(Ordering::Relaxed) {
                self.tick().await;
                tokio::time::sleep(self.config.stabilization_interval).await;
            }
        })
    }
}

/// The tonic `Chord` service shell; all logic lives on `ChordNode`.
pub struct ChordNodeService {
    pub node: Arc<ChordNode>,
}

#[tonic::async_trait]
impl chord_proto::chord_server::Chord for ChordNodeService {
    async fn find_successor(
        &self,
        request: Request<chord_proto::FindSuccessorRequest>,
    ) -> Result<Response<chord_proto::AddressMsg>, Status> {
        let x = rpc::pos_from_bytes(&request.into_inner().id)?;
        let address = self.node.find_successor(x).await;
        Ok(Response::new(chord_proto::AddressMsg {
            address: (&address).into(),
        }))
    }

    async fn closest_preceding_node(
        &self,
        request: Request<chord_proto::FindSuccessorRequest>,
    ) -> Result<Response<chord_proto::AddressMsg>, Status> {
        let x = rpc::pos_from_bytes(&request.into_inner().id)?;
        let address = self.node.closest_preceding_node(x).await;
        Ok(Response::new(chord_proto::AddressMsg {
            address: (&address).into(),
        }))
    }

    async fn get_predecessor(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::OptionalAddressMsg>, Status> {
        let predecessor = self.node.predecessor().await;
        Ok(Response::new(chord_proto::OptionalAddressMsg {
            address: predecessor.map(|a| (&a).into()),
        }))
    }

    async fn get_successor_list(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::SuccessorListMsg>, Status> {
        let successors = self.node.successor_list().await;
        Ok(Response::new(chord_proto::SuccessorListMsg {
            successors: successors.iter().map(String::from).collect(),
        }))
    }

    async fn notify(
        &self,
        request: Request<chord_proto::NotifyRequest>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        let candidate = rpc::parse_address(&request.into_inner().address)?;
        self.node.notify(candidate).await;
        Ok(Response::new(chord_proto::Empty {}))
    }

    async fn join(
        &self,
        request: Request<chord_proto::AddressMsg>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        let seed = rpc::parse_address(&request.into_inner().address)?;
        self.node.join(&seed).await;
        Ok(Response::new(chord_proto::Empty {}))
    }

    async fn health(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::Empty>, Status> {
        Ok(Response::new(chord_proto::Empty {}))
    }

    async fn get_node_summary(
        &self,
        _request: Request<chord_proto::Empty>,
    ) -> Result<Response<chord_proto::NodeSummaryMsg>, Status> {
        let predecessor = self.node.predecessor().await;
        let successors = self.node.successor_list().await;
        let finger_table = self.node.finger_table.lock().await;
        let fingers = finger_table
            .fingers
            .iter()
            .map(|f| chord_proto::FingerEntryMsg {
                id: rpc::pos_to_bytes(&f.start),
                address: f.address.as_ref().map(String::from).unwrap_or_default(),
            })
            .collect();
        Ok(Response::new(chord_proto::NodeSummaryMsg {
            address: (&self.node.address).into(),
            pos: rpc::pos_to_bytes(&self.node.id),
            predecessor: predecessor.map(|a| (&a).into()),
            successor_list: Some(chord_proto::SuccessorListMsg {
                successors: successors.iter().map(String::from).collect(),
            }),
            finger_table: Some(chord_proto::FingerTableMsg { fingers }),
        }))
    }
}
