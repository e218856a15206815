//! Radix Object Store Library
//!
//! Core modules of a distributed object store whose namespace is a radix-compressed
//! trie of records stored on the storage nodes themselves. The binary (`main.rs`)
//! wires them into a namenode and datanode processes.
//!
//! ## Architecture Modules
//! - **`lock`**: Per-key distributed read/write mutex over a coordination store (Redis),
//!   with lease expiry, pub/sub wake-ups and a bounded pool of lock handles.
//! - **`directory`**: Storage-node registry. Resolves node ids to addresses, places new
//!   records round-robin, finds or creates the root record and drops dead nodes.
//! - **`store`**: Moves index records and object payloads to and from storage nodes,
//!   and implements the storage node's own HTTP service.
//! - **`index`**: The namespace trie (lookup, insertion with split, deletion with merge,
//!   prefix/delimiter listing) and the public object API.
//! - **`config`** / **`error`**: CLI configuration and the typed error taxonomy.
//! - **`metrics`**: Prometheus recorder and the `/metrics` scrape handler.

pub mod config;
pub mod directory;
pub mod error;
pub mod index;
pub mod lock;
pub mod metrics;
pub mod store;
