//! Namespace Index Module
//!
//! Maps hierarchical object keys to the storage node and source id holding each
//! object's bytes, using a radix-compressed trie whose records are themselves stored
//! on the storage nodes.
//!
//! ## Core Concepts
//! - **Records**: one `IndexRecord` per trie position, holding an optional object and a
//!   sorted list of routes to child positions.
//! - **Split**: inserting a key that partially matches a child creates an intermediate
//!   record at the longest common prefix.
//! - **Merge**: deleting leaves no non-root record without an object and a single child;
//!   such records are folded into their parent.
//! - **Locking**: each position is guarded by a distributed read/write lock named after
//!   its key, taken hand-over-hand from the root down.
//! - **Root**: the record at the root key always exists; its location is cached and
//!   rediscovered through the node directory when stale.

pub mod handlers;
pub mod keys;
pub mod protocol;
pub mod root;
pub mod trie;
pub mod types;

#[cfg(test)]
mod tests;

pub use trie::NamespaceIndex;
