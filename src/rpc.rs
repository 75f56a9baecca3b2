//! The RPC facade (§9): "given Address, return a handle on which methods
//! named by string may be called with typed arguments returning a typed
//! result or a transport error, or with oneway semantics". Concretely
//! realized with `tonic`/gRPC, matching the teacher's transport choice, but
//! every other module only reaches the network through the helpers here.

use std::time::Duration;

use log::warn;
use tonic::transport::Channel;

use crate::config::Config;
use crate::utils::types::{Address, HashPos};

pub mod chord_proto {
    tonic::include_proto!("chord");
}

pub mod namedir_proto {
    tonic::include_proto!("namedir");
}

pub mod mapreduce_proto {
    tonic::include_proto!("mapreduce");
}

pub const CHORD_DESCRIPTOR: &[u8] =
    tonic::include_file_descriptor_set!("chord_descriptor");
pub const NAMEDIR_DESCRIPTOR: &[u8] =
    tonic::include_file_descriptor_set!("namedir_descriptor");
pub const MAPREDUCE_DESCRIPTOR: &[u8] =
    tonic::include_file_descriptor_set!("mapreduce_descriptor");

/// Opens a channel to `address` without retrying.
pub async fn connect(address: &Address) -> Result<Channel, tonic::transport::Error> {
    Channel::from_shared(address.endpoint_url())
        .expect("address endpoint url is always a valid URI")
        .connect()
        .await
}

/// Opens a channel, retrying up to `config.connection_max_retries` times with
/// `config.connection_retry_sleep` between attempts. Used by call sites that
/// need a best-effort connection rather than an instant reachability check
/// (§4.1 join, §4.5 subscribe-until-a-master-exists).
pub async fn connect_with_retry(
    address: &Address,
    config: &Config,
) -> Result<Channel, tonic::Status> {
    let mut retries = 0;
    loop {
        match connect(address).await {
            Ok(channel) => return Ok(channel),
            Err(e) => {
                retries += 1;
                if retries > config.connection_max_retries {
                    return Err(tonic::Status::unavailable(format!(
                        "reached maximum connection retries to {address}: {e}"
                    )));
                }
                warn!("failed to connect to {address}: {e}, retrying...");
                tokio::time::sleep(config.connection_retry_sleep).await;
            }
        }
    }
}

/// A bounded-time liveness probe (§4.1 `reachable`, §9 "reachability probe").
/// Used throughout the stabilizer and the data layer to decide whether a
/// remembered address can still be dialed before routing to it.
pub async fn reachable(address: &Address, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, connect(address))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// Converts a `HashPos` to the raw 20-byte wire form used by every
/// `bytes id`/`bytes key` field across the three proto files.
pub fn pos_to_bytes(pos: &HashPos) -> Vec<u8> {
    pos.to_vec()
}

/// Parses a wire `bytes` field back into a `HashPos`. Every caller controls
/// both ends of the wire, so a malformed length is a programmer error, not a
/// recoverable input — callers map it to `Status::invalid_argument`.
pub fn pos_from_bytes(bytes: &[u8]) -> Result<HashPos, tonic::Status> {
    bytes
        .try_into()
        .map_err(|_| tonic::Status::invalid_argument("expected a 20-byte id"))
}

impl From<&Address> for String {
    fn from(address: &Address) -> Self {
        address.to_string()
    }
}

/// Parses an `AddressMsg`/`NotifyRequest`/... `address` field (the
/// `PYRO:{object}@{host}:{port}` literal) back into an `Address`.
pub fn parse_address(literal: &str) -> Result<Address, tonic::Status> {
    literal
        .parse()
        .map_err(|e| tonic::Status::invalid_argument(format!("bad address literal: {e}")))
}

/// Returns the first reachable address (and its channel) from a candidate
/// list, preserving order. Used by the stabilizer to fail over across the
/// successor list (§4.1 stabilize: "left-shift successor list to the nearest
/// reachable entry").
pub async fn connect_to_first_reachable(
    candidates: &[Address],
) -> Option<(Channel, Address, usize)> {
    for (idx, address) in candidates.iter().enumerate() {
        if let Ok(channel) = connect(address).await {
            return Some((channel, address.clone(), idx));
        }
    }
    None
}
