use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};

use crate::config::Config;
use crate::rpc::{self, mapreduce_proto};
use crate::threads::chord_data::ChordData;
use crate::threads::namedir::NameDir;
use crate::utils::types::{Address, Key};

const MASTER_MAP_CODE: &str = "master/staged/map-code";
const MASTER_REDUCE_CODE: &str = "master/staged/reduce-code";
const MASTER_DATA: &str = "master/staged/data";
const RESULTS_KEY: &str = "map-reduce/final-results";

/// The client-facing staging endpoint (§4.6). Chunks an incoming job into
/// the DHT for the Master to pick up, then forwards the published results
/// back to the client.
pub struct RequestHandler {
    pub address: Address,
    config: Config,
    data: Arc<ChordData>,
    user_address: Mutex<Option<Address>>,
}

impl RequestHandler {
    pub fn new(address: Address, config: Config, data: Arc<ChordData>) -> Arc<RequestHandler> {
        Arc::new(RequestHandler {
            address,
            config,
            data,
            user_address: Mutex::new(None),
        })
    }

    /// §4.6 `startup`.
    pub async fn startup(
        &self,
        user_address: Address,
        input_items: Vec<Vec<u8>>,
        map_function: Vec<u8>,
        reduce_function: Vec<u8>,
    ) -> bool {
        *self.user_address.lock().await = Some(user_address);

        let chunks: HashMap<String, Vec<Vec<u8>>> = input_items
            .chunks(self.config.items_per_chunk)
            .enumerate()
            .map(|(i, chunk)| (format!("map/{i}"), chunk.to_vec()))
            .collect();
        let Ok(data_bytes) = bincode::serialize(&chunks) else {
            return false;
        };

        for attempt in 0..=self.config.request_retries {
            self.data.insert(Key::Str(MASTER_MAP_CODE.to_string()), map_function.clone(), false).await;
            self.data
                .insert(Key::Str(MASTER_REDUCE_CODE.to_string()), reduce_function.clone(), false)
                .await;
            self.data.insert(Key::Str(MASTER_DATA.to_string()), data_bytes.clone(), false).await;

            let staged = self.data.lookup(Key::Str(MASTER_DATA.to_string())).await;
            if staged.as_deref() == Some(data_bytes.as_slice()) {
                info!("staged job ({} chunks) after {} attempt(s)", chunks.len(), attempt + 1);
                return true;
            }
            warn!("staging job failed on attempt {}, retrying", attempt + 1);
            tokio::time::sleep(self.config.connection_retry_sleep).await;
        }
        false
    }

    /// §4.6 `notify_results`: called by the Master once results are
    /// published; reads them back and forwards to the waiting client.
    pub async fn notify_results(&self) {
        let Some(bytes) = self.data.lookup(Key::Str(RESULTS_KEY.to_string())).await else {
            warn!("notify_results invoked but {RESULTS_KEY} is not staged");
            return;
        };
        let Ok(results) = bincode::deserialize::<HashMap<Vec<u8>, Vec<u8>>>(&bytes) else {
            warn!("final results blob was not well-typed");
            return;
        };
        let Some(user) = self.user_address.lock().await.clone() else {
            warn!("notify_results invoked with no remembered user address");
            return;
        };
        let Ok(channel) = rpc::connect(&user).await else {
            warn!("user callback address {user} unreachable");
            return;
        };
        let mut client = mapreduce_proto::user_callback_client::UserCallbackClient::new(channel);
        let results = results
            .into_iter()
            .map(|(key, value)| (String::from_utf8_lossy(&key).to_string(), value))
            .collect();
        let _ = client
            .notify_results(mapreduce_proto::NotifyResultsRequest { results })
            .await;
    }
}

pub struct RequestHandlerService {
    pub handler: Arc<RequestHandler>,
}

#[tonic::async_trait]
impl mapreduce_proto::request_handler_server::RequestHandler for RequestHandlerService {
    async fn startup(
        &self,
        request: Request<mapreduce_proto::StartupRequest>,
    ) -> Result<Response<mapreduce_proto::StartupResponse>, Status> {
        let req = request.into_inner();
        let user_address = rpc::parse_address(&req.user_address)?;
        let success = self
            .handler
            .startup(user_address, req.input_items, req.map_function, req.reduce_function)
            .await;
        Ok(Response::new(mapreduce_proto::StartupResponse { success }))
    }

    async fn notify_results(
        &self,
        _request: Request<mapreduce_proto::Empty>,
    ) -> Result<Response<mapreduce_proto::Empty>, Status> {
        self.handler.notify_results().await;
        Ok(Response::new(mapreduce_proto::Empty {}))
    }
}
