use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn, LevelFilter};
use tokio::sync::Mutex;
use tonic::transport::Server;

use mapreduce_dht::config::{Cli, Config};
use mapreduce_dht::mapreduce::FunctionTable;
use mapreduce_dht::rpc::{chord_proto, mapreduce_proto, namedir_proto};
use mapreduce_dht::threads::chord::{ChordNode, ChordNodeService};
use mapreduce_dht::threads::chord_data::{ChordData, ChordDataService};
use mapreduce_dht::threads::broadcast::Broadcaster;
use mapreduce_dht::threads::follower::{Follower, FollowerService};
use mapreduce_dht::threads::master::{Master, MasterService};
use mapreduce_dht::threads::namedir::NameDir;
use mapreduce_dht::threads::registry::{Registry, RegistryService};
use mapreduce_dht::threads::request_handler::{RequestHandler, RequestHandlerService};
use mapreduce_dht::utils::types::Address;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .env()
        .with_level(if cli.dev_mode { LevelFilter::Debug } else { LevelFilter::Info })
        .init()?;

    let config = Config::load(cli.config.as_ref());
    let grpc_addr: std::net::SocketAddr = cli.grpc.parse()?;
    let node_address = Address::new(cli.object.clone(), grpc_addr.ip().to_string(), grpc_addr.port());

    info!("starting host {node_address} (grpc listen {grpc_addr})");

    let data = ChordData::new(node_address.clone(), config.clone());
    let node = ChordNode::new(node_address.clone(), config.clone(), data.clone());
    {
        let node_for_resolver = node.clone();
        data.bind_find_successor(Arc::new(move |id| {
            let node = node_for_resolver.clone();
            Box::pin(async move { node.find_successor(id).await })
                as std::pin::Pin<Box<dyn std::future::Future<Output = Address> + Send>>
        }))
        .await;
        let node_for_successors = node.clone();
        data.bind_get_successors(Arc::new(move || {
            let node = node_for_successors.clone();
            Box::pin(async move { node.successor_list().await })
                as std::pin::Pin<Box<dyn std::future::Future<Output = Vec<Address>> + Send>>
        }))
        .await;
    }

    let registry = Registry::new();
    let broadcaster = Arc::new(Broadcaster::bind(config.broadcast_port).await?);
    {
        let broadcaster = broadcaster.clone();
        let node_address = node_address.clone();
        tokio::spawn(async move {
            broadcaster.respond_forever(&node_address).await;
        });
    }
    let namedir = NameDir::new(node_address.clone(), config.clone(), registry.clone(), broadcaster.clone(), data.clone());

    if let Some(peer_str) = &cli.peer {
        let peer_grpc: std::net::SocketAddr = peer_str.parse()?;
        let seed = Address::new("chord.dht", peer_grpc.ip().to_string(), peer_grpc.port());
        node.join(&seed).await;
    }

    let stabilizer_alive = Arc::new(AtomicBool::new(true));
    node.clone().spawn_stabilizer(stabilizer_alive.clone());

    namedir.start().await;

    let master_address = Address::new("master", node_address.host.clone(), node_address.port);
    let master = Master::new(master_address.clone(), config.clone(), data.clone(), namedir.clone());
    let master_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>> = Arc::new(Mutex::new(None));
    {
        let master = master.clone();
        let master_handle_start = master_handle.clone();
        let master_handle_stop = master_handle.clone();
        namedir
            .delegate(
                master_address,
                Arc::new(move || {
                    let master = master.clone();
                    let master_handle = master_handle_start.clone();
                    Box::pin(async move {
                        info!("this host is now the NameDir leader, starting Master");
                        let handle = tokio::spawn(master.clone().run());
                        *master_handle.lock().await = Some(handle);
                    }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
                }),
                Arc::new(move || {
                    let master_handle = master_handle_stop.clone();
                    Box::pin(async move {
                        if let Some(handle) = master_handle.lock().await.take() {
                            handle.abort();
                        }
                    }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
                }),
            )
            .await;
    }

    let rq_handler_address = Address::new("rq.handler", node_address.host.clone(), node_address.port);
    let request_handler = RequestHandler::new(rq_handler_address.clone(), config.clone(), data.clone());
    namedir
        .delegate(
            rq_handler_address,
            Arc::new(|| {
                Box::pin(async {}) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }),
            Arc::new(|| {
                Box::pin(async {}) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }),
        )
        .await;

    let functions = Arc::new(FunctionTable::new());
    let follower_address = Address::new("follower", node_address.host.clone(), node_address.port);
    let follower = Follower::new(follower_address, config.clone(), functions, namedir.clone());
    if !cli.no_follower {
        tokio::spawn(follower.clone().subscribe_loop());
    }

    let chord_service = ChordNodeService { node: node.clone() };
    let chord_data_service = ChordDataService { data: data.clone() };
    let registry_service = RegistryService { registry: registry.clone() };
    let master_service = MasterService { master: master.clone() };
    let request_handler_service = RequestHandlerService { handler: request_handler.clone() };
    let follower_service = FollowerService { follower };

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(mapreduce_dht::rpc::CHORD_DESCRIPTOR)
        .register_encoded_file_descriptor_set(mapreduce_dht::rpc::NAMEDIR_DESCRIPTOR)
        .register_encoded_file_descriptor_set(mapreduce_dht::rpc::MAPREDUCE_DESCRIPTOR)
        .build()?;

    Server::builder()
        .add_service(chord_proto::chord_server::ChordServer::new(chord_service))
        .add_service(chord_proto::chord_data_server::ChordDataServer::new(chord_data_service))
        .add_service(namedir_proto::name_registry_server::NameRegistryServer::new(registry_service))
        .add_service(mapreduce_proto::master_server::MasterServer::new(master_service))
        .add_service(mapreduce_proto::request_handler_server::RequestHandlerServer::new(request_handler_service))
        .add_service(mapreduce_proto::follower_server::FollowerServer::new(follower_service))
        .add_service(reflection)
        .serve(grpc_addr)
        .await?;

    warn!("gRPC server stopped, shutting down");
    Ok(())
}
