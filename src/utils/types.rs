use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 160-bit position on the Chord ring (§3). Stored big-endian, matching the
/// byte order SHA-1 naturally produces, so `HashPos` sorts the same whether
/// compared as bytes or as the integer it represents.
pub type HashPos = [u8; 20];

pub const HASH_POS_ZERO: HashPos = [0u8; 20];

/// Opaque tuple `{objectName, host, port}` (§3), serialized as the literal
/// `PYRO:{objectName}@{host}:{port}` form. The literal form is part of the
/// contract: it is what gets embedded in DHT-stored values (finger table
/// dumps, NameDir backups, Master checkpoints), so two `Address`es that parse
/// back to the same triple must print identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub object: String,
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(object: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Address {
            object: object.into(),
            host: host.into(),
            port,
        }
    }

    /// The id of an `Address` is derived purely from its host (§3, §9):
    /// the port and object name are never part of the id.
    pub fn id(&self) -> HashPos {
        crate::utils::crypto::id(&self.host)
    }

    /// Derives the co-located data-service address, reusing host/port with
    /// `objectName` suffixed `.service` (§3, §6).
    pub fn service_address(&self) -> Address {
        Address {
            object: format!("{}.service", self.object),
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// The bare `host:port` authority used to dial a gRPC channel. The object
    /// name only disambiguates logical endpoints sharing one listener; it
    /// plays no part in the transport address.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn endpoint_url(&self) -> String {
        format!("http://{}", self.authority())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PYRO:{}@{}:{}", self.object, self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid address literal: {0:?}")]
pub struct AddressParseError(pub String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("PYRO:")
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        let (object, host_port) = rest
            .split_once('@')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        let (host, port) = host_port
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Address::new(object, host, port))
    }
}

/// A DHT key (§4.2). `ChordService` computes the owning id differently
/// depending on which of these a caller supplies: a `Str` key is hashed with
/// `id()`, an `Int` key's id *is* the key, reduced mod 2^160. Keeping the two
/// variants distinct (rather than collapsing to raw bytes up front) is what
/// lets `key_id` apply the right rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Str(String),
    Int(u64),
}

impl Key {
    /// The id used for routing and storage (§4.2).
    pub fn id(&self) -> HashPos {
        match self {
            Key::Str(s) => crate::utils::crypto::id(s),
            Key::Int(n) => {
                let mut pos = HASH_POS_ZERO;
                pos[12..20].copy_from_slice(&n.to_be_bytes());
                pos
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s}"),
            Key::Int(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Int(n)
    }
}

pub type Value = Vec<u8>;

/// The per-node partial hash table (§3: `localItems`).
pub type KvStore = HashMap<Key, Value>;
