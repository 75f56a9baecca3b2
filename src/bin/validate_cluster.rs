//! Cluster sanity tool (SPEC_FULL.md §2): connects to a fixed list of
//! already-running nodes and checks that their reported ring state is
//! mutually consistent. Unlike the teacher's version this does not spawn
//! the cluster itself — nodes are started separately (e.g. by hand or by a
//! test harness) and their gRPC addresses are passed as arguments.

use std::collections::HashMap;

use tonic::transport::Channel;
use tonic::Request;

use mapreduce_dht::rpc::chord_proto;
use mapreduce_dht::rpc::chord_proto::chord_client::ChordClient;
use mapreduce_dht::rpc::chord_proto::chord_data_client::ChordDataClient;
use mapreduce_dht::rpc::chord_proto::{Empty, NodeSummaryMsg};
use mapreduce_dht::utils::crypto;
use mapreduce_dht::utils::types::HashPos;

#[tokio::main]
async fn main() {
    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: validate_cluster <grpc-url> [grpc-url...]");
        std::process::exit(2);
    }

    let mut summaries: Vec<NodeSummaryMsg> = Vec::new();
    for url in &urls {
        let channel = Channel::from_shared(url.clone())
            .expect("url must be a valid URI")
            .connect()
            .await
            .unwrap_or_else(|e| panic!("could not connect to {url}: {e}"));
        let mut client = ChordClient::new(channel);
        let summary = client
            .get_node_summary(Request::new(Empty {}))
            .await
            .unwrap_or_else(|e| panic!("get_node_summary failed for {url}: {e}"))
            .into_inner();
        summaries.push(summary);
    }

    summaries.sort_by(|a, b| pos_of(a).cmp(&pos_of(b)));

    let ring_ids: Vec<HashPos> = summaries.iter().map(pos_of).collect();
    let mut ok = true;

    ok &= check_predecessors(&summaries);
    ok &= check_fingers(&summaries, &ring_ids);
    ok &= check_successor_lists(&summaries);
    ok &= check_replicated_shards(&summaries).await;

    if ok {
        println!("cluster looks consistent ({} nodes)", summaries.len());
    } else {
        eprintln!("cluster is inconsistent");
        std::process::exit(1);
    }
}

fn pos_of(summary: &NodeSummaryMsg) -> HashPos {
    summary
        .pos
        .as_slice()
        .try_into()
        .expect("node summary pos must be a 20-byte id")
}

/// Each node's predecessor must be the node immediately before it on the
/// sorted ring (§4.1 `stabilize`/`notify`).
fn check_predecessors(summaries: &[NodeSummaryMsg]) -> bool {
    let mut ok = true;
    for (i, summary) in summaries.iter().enumerate() {
        let prev = &summaries[(i + summaries.len() - 1) % summaries.len()];
        match &summary.predecessor {
            Some(pred) if pred == &prev.address => {}
            Some(pred) => {
                eprintln!(
                    "node {} has predecessor {}, expected {}",
                    summary.address, pred, prev.address
                );
                ok = false;
            }
            None => {
                eprintln!("node {} reports no predecessor", summary.address);
                ok = false;
            }
        }
    }
    ok
}

/// Every finger entry must point at the node actually responsible for that
/// finger's id (§4.1 `fix_fingers`).
fn check_fingers(summaries: &[NodeSummaryMsg], ring_ids: &[HashPos]) -> bool {
    let address_by_id: HashMap<HashPos, &str> = summaries
        .iter()
        .map(|s| (pos_of(s), s.address.as_str()))
        .collect();
    let mut ok = true;
    for summary in summaries {
        let Some(table) = &summary.finger_table else { continue };
        for (j, finger) in table.fingers.iter().enumerate() {
            if finger.address.is_empty() {
                continue;
            }
            let finger_id: HashPos = finger
                .id
                .as_slice()
                .try_into()
                .expect("finger id must be a 20-byte id");
            let responsible = responsible_for(&finger_id, ring_ids);
            let responsible_addr = address_by_id[&responsible];
            if finger.address != responsible_addr {
                eprintln!(
                    "node {}: finger[{}] points to {} but {} is responsible",
                    summary.address, j, finger.address, responsible_addr
                );
                ok = false;
            }
        }
    }
    ok
}

/// Each node's successor list must match the next R nodes on the sorted
/// ring, in order (§4.1 Entities: `successors[0..R-1]`).
fn check_successor_lists(summaries: &[NodeSummaryMsg]) -> bool {
    let mut ok = true;
    let n = summaries.len();
    for (i, summary) in summaries.iter().enumerate() {
        let Some(list) = &summary.successor_list else { continue };
        for (j, successor) in list.successors.iter().enumerate() {
            if successor.is_empty() {
                continue;
            }
            let expected = &summaries[(i + j + 1) % n].address;
            if successor != expected {
                eprintln!(
                    "node {}: successor_list[{}] is {}, expected {}",
                    summary.address, j, successor, expected
                );
                ok = false;
            }
        }
    }
    ok
}

/// Every key owned by a node must also be held by its R direct successors'
/// replicated shards (§4.2 `refresh_replication`, §8 "replication
/// coverage").
async fn check_replicated_shards(summaries: &[NodeSummaryMsg]) -> bool {
    let mut ok = true;
    let n = summaries.len();
    for (i, summary) in summaries.iter().enumerate() {
        let owner_items = match fetch_items(&summary.address).await {
            Ok(items) => items,
            Err(e) => {
                eprintln!("node {}: get_items failed: {e}", summary.address);
                ok = false;
                continue;
            }
        };
        if owner_items.is_empty() {
            continue;
        }
        let successor_count = summary
            .successor_list
            .as_ref()
            .map(|l| l.successors.iter().filter(|s| !s.is_empty()).count())
            .unwrap_or(0);
        for j in 0..successor_count {
            let successor = &summaries[(i + j + 1) % n];
            let replica_items = match fetch_items(&successor.address).await {
                Ok(items) => items,
                Err(e) => {
                    eprintln!("node {}: get_items failed: {e}", successor.address);
                    ok = false;
                    continue;
                }
            };
            for (key, value) in &owner_items {
                if replica_items.get(key) != Some(value) {
                    eprintln!(
                        "node {}'s key is missing from {}'s replicated shard",
                        summary.address, successor.address
                    );
                    ok = false;
                }
            }
        }
    }
    ok
}

async fn fetch_items(data_address: &str) -> Result<HashMap<Vec<u8>, Vec<u8>>, tonic::Status> {
    let channel = Channel::from_shared(data_address.to_string())
        .map_err(|e| tonic::Status::invalid_argument(e.to_string()))?
        .connect()
        .await
        .map_err(|e| tonic::Status::unavailable(e.to_string()))?;
    let mut client = ChordDataClient::new(channel);
    let resp = client
        .get_items(Request::new(chord_proto::Empty {}))
        .await?
        .into_inner();
    Ok(resp.pairs.into_iter().map(|p| (p.key, p.value)).collect())
}

/// First node on the sorted ring whose id is `>=` the given key, wrapping to
/// the smallest id (the arc predicate's closed-on-the-right rule, GLOSSARY).
fn responsible_for(key: &HashPos, ring_ids: &[HashPos]) -> HashPos {
    ring_ids
        .iter()
        .find(|id| crypto::lt(key, id) || *key == **id)
        .copied()
        .unwrap_or_else(|| *ring_ids.iter().min().expect("ring must be non-empty"))
}
