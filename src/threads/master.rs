use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};

use crate::config::Config;
use crate::error::CoreError;
use crate::mapreduce::{Task, TaskGroup, TaskPayload};
use crate::rpc::{self, mapreduce_proto};
use crate::threads::chord_data::ChordData;
use crate::threads::namedir::NameDir;
use crate::utils::types::{Address, Key};

const MASTER_MAP_CODE: &str = "master/staged/map-code";
const MASTER_REDUCE_CODE: &str = "master/staged/reduce-code";
const MASTER_DATA: &str = "master/staged/data";
const MASTER_BACKUP_KEY: &str = "master/backup";
const RESULTS_KEY: &str = "map-reduce/final-results";

#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct Checkpoint {
    map_tasks: Vec<u8>,
    reduce_tasks: Vec<u8>,
    followers: Vec<Address>,
    results: HashMap<Vec<u8>, Vec<u8>>,
}

/// The singleton MapReduce coordinator (§4.4). At most one is registered in
/// the name directory at a time; `run` drives phases A-D and never returns
/// except on an invariant violation, which the caller treats as "this host's
/// Master task died" without tearing down Chord/NameDir on the same host.
pub struct Master {
    pub address: Address,
    config: Config,
    data: Arc<ChordData>,
    namedir: Arc<NameDir>,
    busy_followers: Mutex<HashSet<Address>>,
    idle_followers: Mutex<HashSet<Address>>,
    map_tasks: Mutex<TaskGroup>,
    reduce_tasks: Mutex<TaskGroup>,
    results: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    map_function: Mutex<Vec<u8>>,
    reduce_function: Mutex<Vec<u8>>,
    alive: Arc<AtomicBool>,
}

impl Master {
    pub fn new(address: Address, config: Config, data: Arc<ChordData>, namedir: Arc<NameDir>) -> Arc<Master> {
        Arc::new(Master {
            address,
            config,
            data,
            namedir,
            busy_followers: Mutex::new(HashSet::new()),
            idle_followers: Mutex::new(HashSet::new()),
            map_tasks: Mutex::new(TaskGroup::new()),
            reduce_tasks: Mutex::new(TaskGroup::new()),
            results: Mutex::new(HashMap::new()),
            map_function: Mutex::new(Vec::new()),
            reduce_function: Mutex::new(Vec::new()),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }

    pub async fn subscribe(&self, follower: Address) {
        self.idle_followers.lock().await.insert(follower);
    }

    /// §4.4 phase loop. Runs until `stop()` is called (on demotion).
    pub async fn run(self: Arc<Self>) {
        while self.alive.load(Ordering::Relaxed) {
            let Some((map_fn, reduce_fn)) = self.phase_a_wait_for_job().await else {
                return;
            };
            *self.map_function.lock().await = map_fn;
            *self.reduce_function.lock().await = reduce_fn;

            self.phase_b_initialize().await;

            let backup_self = self.clone();
            let backup_handle = tokio::spawn(async move { backup_self.backup_loop().await });

            if let Err(e) = self.run_phase(&self.map_tasks).await {
                error!("map phase invariant violation: {e}, master task aborting");
                backup_handle.abort();
                return;
            }
            if let Err(e) = self.run_phase(&self.reduce_tasks).await {
                error!("reduce phase invariant violation: {e}, master task aborting");
                backup_handle.abort();
                return;
            }
            backup_handle.abort();

            self.phase_d_publish().await;
        }
    }

    async fn phase_a_wait_for_job(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        loop {
            if !self.alive.load(Ordering::Relaxed) {
                return None;
            }
            let map_code = self.data.lookup(Key::Str(MASTER_MAP_CODE.to_string())).await;
            let reduce_code = self.data.lookup(Key::Str(MASTER_REDUCE_CODE.to_string())).await;
            if let (Some(m), Some(r)) = (map_code, reduce_code) {
                return Some((m, r));
            }
            tokio::time::sleep(self.config.request_timeout).await;
        }
    }

    async fn phase_b_initialize(&self) {
        if let Some(bytes) = self.data.lookup(Key::Str(MASTER_BACKUP_KEY.to_string())).await {
            if let Ok(checkpoint) = bincode::deserialize::<Checkpoint>(&bytes) {
                if let Ok(mut map_tasks) = TaskGroup::load(&checkpoint.map_tasks) {
                    map_tasks.reset_assigned_to_pending();
                    *self.map_tasks.lock().await = map_tasks;
                }
                if let Ok(mut reduce_tasks) = TaskGroup::load(&checkpoint.reduce_tasks) {
                    reduce_tasks.reset_assigned_to_pending();
                    *self.reduce_tasks.lock().await = reduce_tasks;
                }
                *self.idle_followers.lock().await = checkpoint.followers.into_iter().collect();
                *self.results.lock().await = checkpoint.results;
                info!("master resumed from checkpoint");
                return;
            }
        }

        let chunks: HashMap<String, Vec<Vec<u8>>> = self
            .data
            .lookup(Key::Str(MASTER_DATA.to_string()))
            .await
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
            .unwrap_or_default();

        let mut task_id = 0u64;
        let tasks = chunks
            .into_values()
            .map(|items| {
                let task = Task {
                    task_id,
                    payload: TaskPayload::Map { items },
                };
                task_id += 1;
                task
            })
            .collect();
        *self.map_tasks.lock().await = TaskGroup::from_tasks(tasks);
        *self.reduce_tasks.lock().await = TaskGroup::new();
        *self.results.lock().await = HashMap::new();
    }

    /// §4.4 phase C, shared machinery for map and reduce.
    async fn run_phase(&self, group: &Mutex<TaskGroup>) -> Result<(), CoreError> {
        loop {
            if group.lock().await.none() {
                return Ok(());
            }
            self.try_assign(group).await;
            tokio::time::sleep(self.config.request_timeout).await;
        }
    }

    async fn try_assign(&self, group: &Mutex<TaskGroup>) {
        let follower = {
            let mut idle = self.idle_followers.lock().await;
            let Some(follower) = idle.iter().next().cloned() else { return };
            idle.remove(&follower);
            follower
        };
        let task = {
            let mut group = group.lock().await;
            match group.pop_pending() {
                Some(task) => task,
                None => {
                    self.idle_followers.lock().await.insert(follower);
                    return;
                }
            }
        };
        self.busy_followers.lock().await.insert(follower.clone());

        let dispatched = match &task.payload {
            TaskPayload::Map { items } => {
                let map_function = self.map_function.lock().await.clone();
                self.dispatch_map(&follower, task.task_id, items.clone(), map_function).await
            }
            TaskPayload::Reduce { out_key, values } => {
                let reduce_function = self.reduce_function.lock().await.clone();
                self.dispatch_reduce(&follower, task.task_id, out_key.clone(), values.clone(), reduce_function)
                    .await
            }
        };

        if dispatched.is_err() {
            warn!("follower {follower} unreachable, leaving task {} assigned for the next checkpoint", task.task_id);
        }
        group.lock().await.mark_assigned(follower.to_string(), task);
    }

    async fn dispatch_map(&self, follower: &Address, task_id: u64, items: Vec<Vec<u8>>, func: Vec<u8>) -> Result<(), tonic::Status> {
        let channel = rpc::connect(follower).await.map_err(|e| Status::unavailable(e.to_string()))?;
        let mut client = mapreduce_proto::follower_client::FollowerClient::new(channel);
        client
            .map(mapreduce_proto::MapTaskMsg {
                task_id: task_id.to_string(),
                items,
                map_function: func,
            })
            .await?;
        Ok(())
    }

    async fn dispatch_reduce(
        &self,
        follower: &Address,
        task_id: u64,
        out_key: Vec<u8>,
        values: Vec<Vec<u8>>,
        func: Vec<u8>,
    ) -> Result<(), tonic::Status> {
        let channel = rpc::connect(follower).await.map_err(|e| Status::unavailable(e.to_string()))?;
        let mut client = mapreduce_proto::follower_client::FollowerClient::new(channel);
        client
            .reduce(mapreduce_proto::ReduceTaskMsg {
                task_id: task_id.to_string(),
                out_key,
                values,
                reduce_function: func,
            })
            .await?;
        Ok(())
    }

    /// §4.4 `report_task`.
    pub async fn report_task(
        &self,
        follower: Address,
        task_id: u64,
        func: Vec<u8>,
        map_result: Option<Vec<(Vec<u8>, Vec<u8>)>>,
        reduce_result: Option<Vec<u8>>,
    ) -> Result<(), CoreError> {
        {
            let mut busy = self.busy_followers.lock().await;
            if !busy.remove(&follower) {
                warn!("report_task from {follower}, which was not busy");
            }
        }
        self.idle_followers.lock().await.insert(follower);

        if func == *self.map_function.lock().await {
            let task = self.map_tasks.lock().await.set_as_complete(task_id);
            if task.is_none() {
                warn!("report_task: map task {task_id} not found in assigned set");
            }
            if let Some(pairs) = map_result {
                let mut reduce_tasks = self.reduce_tasks.lock().await;
                for (out_key, value) in pairs {
                    reduce_tasks.append_value(out_key, value);
                }
            }
            Ok(())
        } else if func == *self.reduce_function.lock().await {
            let completed = self.reduce_tasks.lock().await.set_as_complete(task_id);
            if let (Some(value), Some(task)) = (reduce_result, completed) {
                if let TaskPayload::Reduce { out_key, .. } = task.payload {
                    self.results.lock().await.insert(out_key, value);
                }
            }
            Ok(())
        } else {
            Err(CoreError::InvariantViolation(format!(
                "report_task: function on task {task_id} matches neither cached map nor reduce function"
            )))
        }
    }

    async fn phase_d_publish(&self) {
        let results = self.results.lock().await.clone();
        let Ok(bytes) = bincode::serialize(&results) else { return };
        self.data.insert(Key::Str(RESULTS_KEY.to_string()), bytes, false).await;

        if let Some(handler) = self.namedir.lookup("rq.handler").await {
            if let Ok(channel) = rpc::connect(&handler).await {
                let mut client = mapreduce_proto::request_handler_client::RequestHandlerClient::new(channel);
                let _ = client.notify_results(mapreduce_proto::Empty {}).await;
            }
        }
    }

    /// Independent backup loop (§4.4): periodically checkpoints all state
    /// under all four locks so a successor master can resume.
    async fn backup_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.master_backup_interval).await;
            let busy = self.busy_followers.lock().await;
            let idle = self.idle_followers.lock().await;
            let map_tasks = self.map_tasks.lock().await;
            let reduce_tasks = self.reduce_tasks.lock().await;
            let results = self.results.lock().await;

            let followers: Vec<Address> = busy.iter().chain(idle.iter()).cloned().collect();
            let checkpoint = Checkpoint {
                map_tasks: map_tasks.dump(),
                reduce_tasks: reduce_tasks.dump(),
                followers,
                results: results.clone(),
            };
            drop(results);
            drop(reduce_tasks);
            drop(map_tasks);
            drop(idle);
            drop(busy);

            if let Ok(bytes) = bincode::serialize(&checkpoint) {
                self.data.insert(Key::Str(MASTER_BACKUP_KEY.to_string()), bytes, false).await;
            }
        }
    }
}

pub struct MasterService {
    pub master: Arc<Master>,
}

#[tonic::async_trait]
impl mapreduce_proto::master_server::Master for MasterService {
    async fn subscribe(
        &self,
        request: Request<mapreduce_proto::SubscribeRequest>,
    ) -> Result<Response<mapreduce_proto::Empty>, Status> {
        let follower = rpc::parse_address(&request.into_inner().follower_address)?;
        self.master.subscribe(follower).await;
        Ok(Response::new(mapreduce_proto::Empty {}))
    }

    async fn report_task(
        &self,
        request: Request<mapreduce_proto::ReportTaskRequest>,
    ) -> Result<Response<mapreduce_proto::Empty>, Status> {
        let req = request.into_inner();
        let follower = rpc::parse_address(&req.follower_address)?;
        let task_id: u64 = req
            .task_id
            .parse()
            .map_err(|_| Status::invalid_argument("task_id must be a u64"))?;

        let (map_result, reduce_result) = match req.result {
            Some(mapreduce_proto::report_task_request::Result::MapResult(m)) => (
                Some(m.pairs.into_iter().map(|p| (p.key, p.value)).collect()),
                None,
            ),
            Some(mapreduce_proto::report_task_request::Result::ReduceResult(r)) => (None, Some(r.value)),
            None => (None, None),
        };

        self.master
            .report_task(follower, task_id, req.func, map_result, reduce_result)
            .await?;
        Ok(Response::new(mapreduce_proto::Empty {}))
    }

    async fn health(
        &self,
        _request: Request<mapreduce_proto::Empty>,
    ) -> Result<Response<mapreduce_proto::Empty>, Status> {
        Ok(Response::new(mapreduce_proto::Empty {}))
    }
}
