use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ini::Ini;
use log::warn;

/// Command-line entry point for a single host process (teacher's `utils::cli::Cli`,
/// extended with the Chord/NameDir/MapReduce knobs named in §6).
#[derive(Debug, Parser)]
#[command(name = "mapreduce-dht", about = "A self-organizing Chord DHT running a MapReduce coordinator")]
pub struct Cli {
    /// gRPC listen address of this host's Chord node, e.g. 127.0.0.1:5601.
    #[arg(long)]
    pub grpc: String,

    /// Address of an existing ring member to join. Omit to start a new ring.
    #[arg(long)]
    pub peer: Option<String>,

    /// Object name for this host's Chord node address (default "chord.dht" is
    /// only correct for a single-node-per-process ring topology; multi-node
    /// test harnesses should override it per process).
    #[arg(long, default_value = "chord.dht")]
    pub object: String,

    /// Optional `.ini` file overriding the defaults in `Config::default()`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Disable running a Follower task on this host.
    #[arg(long, default_value_t = false)]
    pub no_follower: bool,

    /// Development-only debug RPCs (node summaries, kv-store dumps).
    #[arg(long, default_value_t = false)]
    pub dev_mode: bool,
}

/// Every named constant from §6's configuration table, assembled once at
/// startup and threaded immutably through every component constructor.
#[derive(Debug, Clone)]
pub struct Config {
    pub broadcast_port: u16,
    pub finger_table_size: usize,
    pub replication_size: usize,
    pub stabilization_interval: Duration,
    pub recheck_interval: Duration,
    pub ns_contest_interval: Duration,
    pub ns_backup_interval: Duration,
    pub master_backup_interval: Duration,
    pub items_per_chunk: usize,
    pub request_timeout: Duration,
    pub request_retries: u32,
    pub connection_retry_sleep: Duration,
    pub connection_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            broadcast_port: 8009,
            // M = 160 / 2, per §6.
            finger_table_size: crate::utils::crypto::SHA1_BIT_COUNT / 2,
            replication_size: 5,
            stabilization_interval: Duration::from_millis(500),
            recheck_interval: Duration::from_secs(2),
            ns_contest_interval: Duration::from_millis(500),
            ns_backup_interval: Duration::from_secs(5),
            master_backup_interval: Duration::from_secs(5),
            items_per_chunk: 16,
            request_timeout: Duration::from_millis(250),
            request_retries: 5,
            connection_retry_sleep: Duration::from_millis(100),
            connection_max_retries: 15,
        }
    }
}

impl Config {
    /// Loads defaults, then overlays an optional `.ini` file (teacher's
    /// `rust-ini` dependency), following the section/key layout:
    /// `[dht]` for ring params, `[namedir]` for election/backup intervals,
    /// `[master]` for MapReduce knobs.
    pub fn load(path: Option<&PathBuf>) -> Config {
        let mut config = Config::default();
        let Some(path) = path else { return config };

        let ini = match Ini::load_from_file(path) {
            Ok(ini) => ini,
            Err(e) => {
                warn!("could not read config file {path:?}: {e}, using defaults");
                return config;
            }
        };

        if let Some(section) = ini.section(Some("dht")) {
            if let Some(v) = section.get("replication_size").and_then(|s| s.parse().ok()) {
                config.replication_size = v;
            }
            if let Some(v) = section
                .get("stabilization_interval_ms")
                .and_then(|s| s.parse().ok())
            {
                config.stabilization_interval = Duration::from_millis(v);
            }
            if let Some(v) = section
                .get("recheck_interval_ms")
                .and_then(|s| s.parse().ok())
            {
                config.recheck_interval = Duration::from_millis(v);
            }
        }

        if let Some(section) = ini.section(Some("namedir")) {
            if let Some(v) = section.get("broadcast_port").and_then(|s| s.parse().ok()) {
                config.broadcast_port = v;
            }
            if let Some(v) = section
                .get("contest_interval_ms")
                .and_then(|s| s.parse().ok())
            {
                config.ns_contest_interval = Duration::from_millis(v);
            }
            if let Some(v) = section
                .get("backup_interval_ms")
                .and_then(|s| s.parse().ok())
            {
                config.ns_backup_interval = Duration::from_millis(v);
            }
        }

        if let Some(section) = ini.section(Some("master")) {
            if let Some(v) = section
                .get("backup_interval_ms")
                .and_then(|s| s.parse().ok())
            {
                config.master_backup_interval = Duration::from_millis(v);
            }
            if let Some(v) = section.get("items_per_chunk").and_then(|s| s.parse().ok()) {
                config.items_per_chunk = v;
            }
            if let Some(v) = section
                .get("request_timeout_ms")
                .and_then(|s| s.parse().ok())
            {
                config.request_timeout = Duration::from_millis(v);
            }
            if let Some(v) = section.get("request_retries").and_then(|s| s.parse().ok()) {
                config.request_retries = v;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.finger_table_size, 80);
        assert_eq!(config.replication_size, 5);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = Config::load(Some(&PathBuf::from("/nonexistent/path.ini")));
        assert_eq!(config.replication_size, Config::default().replication_size);
    }
}
