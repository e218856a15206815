//! Configuration
//!
//! Command-line flags (with environment fallbacks) for both process roles, and the
//! library-side config structs the lock manager and index are built from.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "radix-object-store", version, about = "Distributed object store with a radix namespace index")]
pub struct Cli {
    /// Log filter (overridden by RUST_LOG).
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the object API and own the namespace index.
    Namenode(NamenodeArgs),
    /// Serve index records and payloads for the namenode.
    Datanode(DatanodeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct NamenodeArgs {
    #[arg(long, env = "BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Coordination store URL. Without it locks and the node directory stay in process.
    #[arg(long, env = "REDIS_URL")]
    pub redis: Option<String>,

    #[arg(long, env = "ROOT_KEY", default_value = "/")]
    pub root_key: String,

    #[arg(long, env = "LOCK_LEASE_MS", default_value_t = 10_000)]
    pub lock_lease_ms: u64,

    /// Give up acquiring a lock after this long. Waits forever when unset.
    #[arg(long, env = "LOCK_WAIT_MS")]
    pub lock_wait_ms: Option<u64>,

    #[arg(long, env = "LOCK_POOL_SIZE", default_value_t = 500)]
    pub lock_pool_size: usize,

    /// Seconds between storage-node health sweeps; 0 disables them.
    #[arg(long, env = "HEALTH_INTERVAL_SECS", default_value_t = 60)]
    pub health_interval_secs: u64,
}

impl NamenodeArgs {
    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            lease: Duration::from_millis(self.lock_lease_ms),
            acquire_timeout: self.lock_wait_ms.map(Duration::from_millis),
            pool_capacity: self.lock_pool_size,
        }
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            root_key: self.root_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct DatanodeArgs {
    #[arg(long, env = "BIND", default_value = "0.0.0.0:9000")]
    pub bind: SocketAddr,

    /// Node id; a fresh UUID when unset.
    #[arg(long, env = "NODE_ID")]
    pub id: Option<String>,

    /// Address the namenode should use to reach this node. Defaults to `--bind`.
    #[arg(long, env = "ADVERTISE")]
    pub advertise: Option<String>,

    /// Namenode address to register with (`host:port`).
    #[arg(long, env = "NAMENODE")]
    pub namenode: Option<String>,
}

/// Lock manager settings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Expiry of a read or write lease.
    pub lease: Duration,
    /// Deadline for a single acquisition, `None` to wait indefinitely.
    pub acquire_timeout: Option<Duration>,
    /// Maximum number of cached lock handles.
    pub pool_capacity: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(10),
            acquire_timeout: None,
            pool_capacity: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub root_key: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root_key: "/".to_string(),
        }
    }
}
