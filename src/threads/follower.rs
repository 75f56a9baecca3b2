use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};

use crate::config::Config;
use crate::mapreduce::FunctionTable;
use crate::rpc::{self, mapreduce_proto};
use crate::threads::namedir::NameDir;
use crate::utils::threading::Preemptible;
use crate::utils::types::Address;

/// The worker role (§4.5). Subscribes to the current Master and runs at
/// most one task at a time, preempting whatever is running when a new one
/// arrives.
pub struct Follower {
    pub address: Address,
    config: Config,
    functions: Arc<FunctionTable>,
    namedir: Arc<NameDir>,
    current: Mutex<Preemptible>,
}

impl Follower {
    pub fn new(address: Address, config: Config, functions: Arc<FunctionTable>, namedir: Arc<NameDir>) -> Arc<Follower> {
        Arc::new(Follower {
            address,
            config,
            functions,
            namedir,
            current: Mutex::new(Preemptible::new()),
        })
    }

    /// Locates `master` in the name directory and subscribes, retrying
    /// until a master exists (§4.5: "retries until a master exists").
    pub async fn subscribe_loop(self: Arc<Self>) {
        loop {
            let Some(master) = self.namedir.lookup("master").await else {
                tokio::time::sleep(self.config.request_timeout).await;
                continue;
            };
            match rpc::connect(&master).await {
                Ok(channel) => {
                    let mut client = mapreduce_proto::master_client::MasterClient::new(channel);
                    let result = client
                        .subscribe(mapreduce_proto::SubscribeRequest {
                            follower_address: self.address.to_string(),
                        })
                        .await;
                    match result {
                        Ok(_) => {
                            info!("subscribed to master {master}");
                            return;
                        }
                        Err(e) => warn!("subscribe to {master} failed: {e}, retrying"),
                    }
                }
                Err(e) => warn!("master {master} unreachable: {e}, retrying"),
            }
            tokio::time::sleep(self.config.request_timeout).await;
        }
    }

    /// §4.5 `map` (oneway).
    pub async fn map(self: &Arc<Self>, task_id: String, chunk: Vec<Vec<u8>>, func: Vec<u8>) {
        let this = self.clone();
        let fut = async move {
            let name = String::from_utf8_lossy(&func).to_string();
            let result = this.functions.map_fn(&name).map(|map_fn| {
                chunk
                    .iter()
                    .flat_map(|shard| map_fn(shard))
                    .collect::<Vec<_>>()
            });
            this.report_map(task_id, func, result).await;
        };
        self.current.lock().await.preempt(fut).await;
    }

    /// §4.5 `reduce` (oneway).
    pub async fn reduce(self: &Arc<Self>, task_id: String, out_key: Vec<u8>, values: Vec<Vec<u8>>, func: Vec<u8>) {
        let this = self.clone();
        let fut = async move {
            let name = String::from_utf8_lossy(&func).to_string();
            let result = this.functions.reduce_fn(&name).map(|reduce_fn| reduce_fn(&out_key, &values));
            this.report_reduce(task_id, func, result).await;
        };
        self.current.lock().await.preempt(fut).await;
    }

    async fn report_map(&self, task_id: String, func: Vec<u8>, result: Result<Vec<(Vec<u8>, Vec<u8>)>, crate::error::CoreError>) {
        let Some(master) = self.namedir.lookup("master").await else {
            error!("report_task: no master registered, dropping task {task_id} result");
            return;
        };
        let Ok(channel) = rpc::connect(&master).await else {
            error!("report_task: master {master} unreachable, dropping task {task_id} result");
            return;
        };
        let mut client = mapreduce_proto::master_client::MasterClient::new(channel);
        let (result_field, errored) = match result {
            Ok(pairs) => (
                Some(mapreduce_proto::report_task_request::Result::MapResult(
                    mapreduce_proto::MapResult {
                        pairs: pairs
                            .into_iter()
                            .map(|(key, value)| mapreduce_proto::KvBytesPair { key, value })
                            .collect(),
                    },
                )),
                false,
            ),
            Err(e) => {
                warn!("map task {task_id} errored: {e}");
                (None, true)
            }
        };
        let _ = client
            .report_task(mapreduce_proto::ReportTaskRequest {
                follower_address: self.address.to_string(),
                task_id,
                func,
                result: result_field,
                errored,
            })
            .await;
    }

    async fn report_reduce(&self, task_id: String, func: Vec<u8>, result: Result<Vec<u8>, crate::error::CoreError>) {
        let Some(master) = self.namedir.lookup("master").await else {
            error!("report_task: no master registered, dropping task {task_id} result");
            return;
        };
        let Ok(channel) = rpc::connect(&master).await else {
            error!("report_task: master {master} unreachable, dropping task {task_id} result");
            return;
        };
        let mut client = mapreduce_proto::master_client::MasterClient::new(channel);
        let (result_field, errored) = match result {
            Ok(value) => (
                Some(mapreduce_proto::report_task_request::Result::ReduceResult(
                    mapreduce_proto::ReduceResult { value },
                )),
                false,
            ),
            Err(e) => {
                warn!("reduce task {task_id} errored: {e}");
                (None, true)
            }
        };
        let _ = client
            .report_task(mapreduce_proto::ReportTaskRequest {
                follower_address: self.address.to_string(),
                task_id,
                func,
                result: result_field,
                errored,
            })
            .await;
    }
}

pub struct FollowerService {
    pub follower: Arc<Follower>,
}

#[tonic::async_trait]
impl mapreduce_proto::follower_server::Follower for FollowerService {
    async fn map(
        &self,
        request: Request<mapreduce_proto::MapTaskMsg>,
    ) -> Result<Response<mapreduce_proto::Empty>, Status> {
        let req = request.into_inner();
        self.follower.map(req.task_id, req.items, req.map_function).await;
        Ok(Response::new(mapreduce_proto::Empty {}))
    }

    async fn reduce(
        &self,
        request: Request<mapreduce_proto::ReduceTaskMsg>,
    ) -> Result<Response<mapreduce_proto::Empty>, Status> {
        let req = request.into_inner();
        self.follower
            .reduce(req.task_id, req.out_key, req.values, req.reduce_function)
            .await;
        Ok(Response::new(mapreduce_proto::Empty {}))
    }

    async fn health(
        &self,
        _request: Request<mapreduce_proto::Empty>,
    ) -> Result<Response<mapreduce_proto::Empty>, Status> {
        Ok(Response::new(mapreduce_proto::Empty {}))
    }
}
