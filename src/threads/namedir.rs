use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::rpc::{self, namedir_proto};
use crate::threads::broadcast::Broadcaster;
use crate::threads::chord_data::ChordData;
use crate::threads::registry::Registry;
use crate::utils::crypto;
use crate::utils::threading::PeriodicTask;
use crate::utils::types::{Address, Key};

const NS_BACKUP_KEY: &str = "ns/backup";

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Callback = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

#[derive(Clone)]
enum Mode {
    Local,
    Remote(Address),
}

/// The contested singleton name→address registry wrapper (§4.3), grounded on
/// the original `NameServer`'s election/backup/restore logic. Each host runs
/// exactly one of these, bound to its own `(ip, port)`.
pub struct NameDir {
    self_address: Address,
    config: Config,
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    data: Arc<ChordData>,
    mode: Mutex<Mode>,
    on_startup: Mutex<Vec<(Address, Callback)>>,
    on_shutdown: Mutex<Vec<(Address, Callback)>>,
    backup_task: Mutex<Option<PeriodicTask>>,
    contest_task: Mutex<Option<PeriodicTask>>,
}

impl NameDir {
    pub fn new(
        self_address: Address,
        config: Config,
        registry: Arc<Registry>,
        broadcaster: Arc<Broadcaster>,
        data: Arc<ChordData>,
    ) -> Arc<NameDir> {
        Arc::new(NameDir {
            self_address,
            config,
            registry,
            broadcaster,
            data,
            mode: Mutex::new(Mode::Local),
            on_startup: Mutex::new(Vec::new()),
            on_shutdown: Mutex::new(Vec::new()),
            backup_task: Mutex::new(None),
            contest_task: Mutex::new(None),
        })
    }

    /// §4.3 `delegate`: binds a callback pair's lifetime to this host's
    /// leadership. Re-registers `address` and fires `on_startup` the moment
    /// this host is (or becomes) the leader.
    pub async fn delegate(
        &self,
        address: Address,
        on_startup: Callback,
        on_shutdown: Callback,
    ) {
        self.on_startup.lock().await.push((address.clone(), on_startup.clone()));
        self.on_shutdown.lock().await.push((address, on_shutdown));
        if matches!(*self.mode.lock().await, Mode::Local) {
            on_startup().await;
        }
    }

    pub async fn is_local(&self) -> bool {
        matches!(*self.mode.lock().await, Mode::Local)
    }

    /// Resolves `name` by asking whichever registry currently holds
    /// leadership (local call if we are it, RPC otherwise).
    pub async fn lookup(&self, name: &str) -> Option<Address> {
        match self.mode.lock().await.clone() {
            Mode::Local => self.registry.lookup(name).await,
            Mode::Remote(leader) => {
                let channel = rpc::connect(&leader).await.ok()?;
                let mut client = namedir_proto::name_registry_client::NameRegistryClient::new(channel);
                let reply = client
                    .lookup(namedir_proto::LookupRequest { name: name.to_string() })
                    .await
                    .ok()?
                    .into_inner();
                reply.found.then(|| rpc::parse_address(&reply.address).ok()).flatten()
            }
        }
    }

    pub async fn register(&self, name: &str, address: &Address, safe: bool) {
        match self.mode.lock().await.clone() {
            Mode::Local => self.registry.register(name.to_string(), address.clone(), safe).await,
            Mode::Remote(leader) => {
                if let Ok(channel) = rpc::connect(&leader).await {
                    let mut client =
                        namedir_proto::name_registry_client::NameRegistryClient::new(channel);
                    let _ = client
                        .register(namedir_proto::RegisterRequest {
                            name: name.to_string(),
                            address: address.to_string(),
                            safe,
                        })
                        .await;
                }
            }
        }
    }

    /// §4.3 `start`: launches the local server (this process always runs a
    /// `NameRegistry` gRPC endpoint; whether it is *authoritative* is what
    /// `mode` tracks), restores from DHT backup, runs startup callbacks, and
    /// spawns the backup and contest loops.
    pub async fn start(self: &Arc<Self>) {
        self.restore_from_backup().await;
        self.run_startup_callbacks().await;

        let backup_self = self.clone();
        let backup_task = PeriodicTask::spawn(self.config.ns_backup_interval, move || {
            let backup_self = backup_self.clone();
            async move { backup_self.backup().await }
        });
        *self.backup_task.lock().await = Some(backup_task);

        let contest_self = self.clone();
        let contest_task = PeriodicTask::spawn(self.config.ns_contest_interval, move || {
            let contest_self = contest_self.clone();
            async move { contest_self.refresh().await }
        });
        *self.contest_task.lock().await = Some(contest_task);
    }

    pub async fn stop(&self) {
        if let Some(task) = self.backup_task.lock().await.take() {
            task.stop();
        }
        if let Some(task) = self.contest_task.lock().await.take() {
            task.stop();
        }
    }

    async fn restore_from_backup(&self) {
        let Some(bytes) = self.data.lookup(Key::Str(NS_BACKUP_KEY.to_string())).await else {
            return;
        };
        let Ok(snapshot) = bincode::deserialize::<HashMap<String, Address>>(&bytes) else {
            warn!("ns/backup snapshot was not well-typed, ignoring");
            return;
        };
        for (name, address) in snapshot {
            self.registry.register(name, address, true).await;
        }
        info!("restored name directory from DHT backup");
    }

    async fn run_startup_callbacks(&self) {
        for (address, callback) in self.on_startup.lock().await.iter() {
            self.registry.register(address.object.clone(), address.clone(), false).await;
            callback().await;
        }
    }

    async fn run_shutdown_callbacks(&self) {
        for (_address, callback) in self.on_shutdown.lock().await.iter() {
            callback().await;
        }
    }

    /// §4.3 backup loop body.
    async fn backup(&self) {
        let snapshot = self.registry.list().await;
        let Ok(bytes) = bincode::serialize(&snapshot) else { return };
        self.data.insert(Key::Str(NS_BACKUP_KEY.to_string()), bytes, false).await;
    }

    /// §4.3 `refresh`, the leader-election rule.
    async fn refresh(&self) {
        let current_mode = self.mode.lock().await.clone();

        match current_mode {
            Mode::Remote(leader) => {
                if rpc::reachable(&leader, self.config.request_timeout).await {
                    return;
                }
                let discovered = self
                    .broadcaster
                    .discover(&self.self_address, self.config.request_timeout)
                    .await;
                match discovered {
                    Some(candidate) => {
                        debug!("remote leader {leader} unreachable, switching to {candidate}");
                        *self.mode.lock().await = Mode::Remote(candidate);
                    }
                    None => {
                        info!("remote leader {leader} unreachable and no candidate found, self-promoting");
                        *self.mode.lock().await = Mode::Local;
                        self.run_startup_callbacks().await;
                    }
                }
            }
            Mode::Local => {
                let Some(candidate) = self
                    .broadcaster
                    .discover(&self.self_address, self.config.request_timeout)
                    .await
                else {
                    return;
                };
                if candidate == self.self_address {
                    return;
                }
                let ours = crypto::id(&self.self_address.host);
                let theirs = crypto::id(&candidate.host);
                if !crypto::lt(&ours, &theirs) {
                    debug!("outranked by {candidate}, forwarding registry and demoting");
                    self.forward_registry_to(&candidate).await;
                    self.run_shutdown_callbacks().await;
                    *self.mode.lock().await = Mode::Remote(candidate);
                }
            }
        }
    }

    async fn forward_registry_to(&self, leader: &Address) {
        let entries = self.registry.list().await;
        let Ok(channel) = rpc::connect(leader).await else { return };
        let mut client = namedir_proto::name_registry_client::NameRegistryClient::new(channel);
        for (name, address) in entries {
            let _ = client
                .register(namedir_proto::RegisterRequest {
                    name,
                    address: address.to_string(),
                    safe: true,
                })
                .await;
        }
    }
}
