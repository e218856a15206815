//! Namespace Trie
//!
//! Radix-compressed trie whose records live on storage nodes. Every operation is an
//! explicit loop over `(node_id, key)` positions starting at the root.
//!
//! ## Locking discipline
//! - One lock per position, named by the position's key.
//! - A position's lock is released before the next one is taken (hand-over-hand).
//! - The only place two locks are held at once is a fold during delete, and it
//!   takes them root-to-leaf.
//!
//! ## Restarts
//! A descent that reaches a position whose record has vanished (folded or deleted by
//! a concurrent delete) restarts from the root after a short pause. Delete fix-up does
//! the same when an ancestor it remembered no longer routes to the child: a sibling's
//! fold or a split may have moved the route, so the current parent is located again.

use super::keys::{delimited_group, may_follow, overlaps_prefix};
use super::root::RootCache;
use super::types::{ChildRoute, IndexRecord, ListResult, ObjectMeta, SourceId, now_ms};
use crate::config::IndexConfig;
use crate::directory::NodeDirectory;
use crate::directory::types::NodeId;
use crate::error::{IndexError, LockError};
use crate::lock::LockPool;
use crate::metrics::INDEX_RESTARTS;
use crate::store::RecordStore;

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const MAX_RESTARTS: usize = 5;

/// Next move of a lookup after reading one position.
enum LookupStep {
    Found(IndexRecord, Option<Bytes>),
    Descend(ChildRoute),
    Vanished,
}

/// Next move of an insertion after handling one position.
enum InsertStep {
    Done(IndexRecord),
    Descend(ChildRoute),
    Vanished,
}

/// What deleting the object at the target position did to its record.
enum Removal {
    /// No object stored at the key.
    Absent,
    Vanished,
    Deleted(ObjectMeta),
    Cleared { meta: ObjectMeta, pass_through: bool },
}

/// Structural change a parent has to absorb during delete fix-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Change {
    /// The child record is gone; drop its route.
    Removed,
    /// The child has no object and one child; splice its child in.
    PassThrough,
}

/// What applying a `Change` at a parent led to.
enum FixUp {
    /// Absorbed; the parent's own parent is unaffected.
    Settled,
    /// Absorbed; the parent now needs this change applied in its own parent.
    Propagate(Change),
    /// The parent is gone or no longer routes to the child.
    Moved,
}

pub struct NamespaceIndex {
    config: IndexConfig,
    directory: Arc<dyn NodeDirectory>,
    store: Arc<dyn RecordStore>,
    locks: Arc<LockPool>,
    root: RootCache,
}

impl NamespaceIndex {
    pub fn new(
        config: IndexConfig,
        directory: Arc<dyn NodeDirectory>,
        store: Arc<dyn RecordStore>,
        locks: Arc<LockPool>,
    ) -> Self {
        let root = RootCache::new(config.root_key.clone());
        Self {
            config,
            directory,
            store,
            locks,
            root,
        }
    }

    pub fn root_key(&self) -> &str {
        &self.config.root_key
    }

    /// Node currently serving the root record, discovering or creating it if needed.
    pub async fn root_node(&self) -> Result<NodeId, IndexError> {
        self.root
            .resolve(self.directory.as_ref(), self.store.as_ref(), &self.locks)
            .await
    }

    // --- Public Operations ---

    /// Metadata of the object stored at `key`.
    pub async fn head(&self, key: &str) -> Result<IndexRecord, IndexError> {
        self.validate(key)?;
        let (record, _) = self.retry_root(|| self.lookup(key, false)).await?;
        Ok(record)
    }

    /// Metadata and payload of the object stored at `key`.
    pub async fn get(&self, key: &str) -> Result<(IndexRecord, Bytes), IndexError> {
        self.validate(key)?;
        let (record, payload) = self.retry_root(|| self.lookup(key, true)).await?;
        Ok((record, payload.unwrap_or_default()))
    }

    /// Stores `payload` at `key`, creating or splitting records as needed.
    /// Returns the record now describing the object.
    pub async fn put(
        &self,
        key: &str,
        content_type: &str,
        payload: Bytes,
    ) -> Result<IndexRecord, IndexError> {
        self.validate(key)?;
        self.retry_root(|| self.insert(key, content_type, payload.clone()))
            .await
    }

    /// Deletes the object at `key`, merging records left redundant. Deleting an
    /// absent key succeeds.
    pub async fn delete(&self, key: &str) -> Result<(), IndexError> {
        self.validate(key)?;
        self.retry_root(|| self.remove(key)).await
    }

    /// Directory-style listing: objects under `prefix` with keys after `after`,
    /// collapsing keys that continue past `delimiter` into common prefixes.
    /// At most `limit` entries are returned; common prefixes do not count.
    pub async fn list(
        &self,
        prefix: &str,
        delimiter: &str,
        after: &str,
        limit: usize,
    ) -> Result<ListResult, IndexError> {
        self.retry_root(|| self.scan(prefix, delimiter, after, limit))
            .await
    }

    // --- Lookup ---

    async fn lookup(
        &self,
        key: &str,
        with_payload: bool,
    ) -> Result<(IndexRecord, Option<Bytes>), IndexError> {
        'restart: for attempt in 0..=MAX_RESTARTS {
            let mut at = self.root_route().await?;

            loop {
                let guard = self.locks.read(&at.key).await?;
                let step = self.lookup_locked(&at, key, with_payload).await;

                match settle(step, guard.release().await)? {
                    LookupStep::Found(record, payload) => return Ok((record, payload)),
                    LookupStep::Descend(next) => at = next,
                    LookupStep::Vanished => {
                        pause(attempt).await;
                        continue 'restart;
                    }
                }
            }
        }

        Err(IndexError::NotFound(key.to_string()))
    }

    async fn lookup_locked(
        &self,
        at: &ChildRoute,
        key: &str,
        with_payload: bool,
    ) -> Result<LookupStep, IndexError> {
        let Some(record) = self.load(at).await? else {
            return Ok(LookupStep::Vanished);
        };

        if record.key == key {
            let Some(meta) = &record.object else {
                return Err(IndexError::NotFound(key.to_string()));
            };
            // Payload read under the same lock, so it matches the metadata.
            let payload = if with_payload {
                Some(self.store.get_payload(&meta.node_id, &meta.source).await?)
            } else {
                None
            };
            return Ok(LookupStep::Found(record, payload));
        }

        match record.find_prefix(key) {
            Some(index) => Ok(LookupStep::Descend(record.children[index].clone())),
            None => Err(IndexError::NotFound(key.to_string())),
        }
    }

    // --- Insertion ---

    async fn insert(
        &self,
        key: &str,
        content_type: &str,
        payload: Bytes,
    ) -> Result<IndexRecord, IndexError> {
        'restart: for attempt in 0..=MAX_RESTARTS {
            let mut at = self.root_route().await?;

            loop {
                let guard = self.locks.write(&at.key).await?;
                let step = self.insert_locked(&at, key, content_type, &payload).await;

                match settle(step, guard.release().await)? {
                    InsertStep::Done(record) => return Ok(record),
                    InsertStep::Descend(next) => at = next,
                    InsertStep::Vanished => {
                        pause(attempt).await;
                        continue 'restart;
                    }
                }
            }
        }

        Err(IndexError::Contended(key.to_string()))
    }

    async fn insert_locked(
        &self,
        at: &ChildRoute,
        key: &str,
        content_type: &str,
        payload: &Bytes,
    ) -> Result<InsertStep, IndexError> {
        let Some(mut record) = self.load(at).await? else {
            return Ok(InsertStep::Vanished);
        };

        // Object at this very position: overwrite in place.
        if record.key == key {
            let (node_id, source) = match &record.object {
                Some(meta) => (meta.node_id.clone(), meta.source.clone()),
                None => (self.directory.assign_node().await?, SourceId::new()),
            };
            self.store
                .put_payload(&node_id, &source, payload.clone())
                .await?;

            record.object = Some(object_meta(node_id, source, content_type, payload));
            self.store.put_record(&at.node_id, &record).await?;

            tracing::debug!("Stored object '{}' in place", key);
            return Ok(InsertStep::Done(record));
        }

        let Some((index, matched)) = record.find_matched(key) else {
            // Disjoint from every child: new leaf.
            let node_id = self.directory.assign_node().await?;
            let source = SourceId::new();
            self.store
                .put_payload(&node_id, &source, payload.clone())
                .await?;

            let mut leaf = IndexRecord::new(key);
            leaf.object = Some(object_meta(node_id.clone(), source, content_type, payload));
            self.store.put_record(&node_id, &leaf).await?;

            record.insert_child(ChildRoute::new(node_id.clone(), key));
            self.store.put_record(&at.node_id, &record).await?;

            tracing::debug!("Created leaf '{}' on {} under '{}'", key, node_id, record.key);
            return Ok(InsertStep::Done(leaf));
        };

        let child = record.children[index].clone();
        if matched.len() == child.key.len() {
            return Ok(InsertStep::Descend(child));
        }

        // Partial match: split the child at the common prefix.
        let node_id = self.directory.assign_node().await?;
        let mut intermediate = IndexRecord::new(matched);
        intermediate.insert_child(child.clone());
        self.store.put_record(&node_id, &intermediate).await?;

        let route = ChildRoute::new(node_id, matched);
        record.children[index] = route.clone();
        self.store.put_record(&at.node_id, &record).await?;

        tracing::debug!(
            "Split '{}' at '{}' under '{}'",
            child.key,
            matched,
            record.key
        );
        Ok(InsertStep::Descend(route))
    }

    // --- Deletion ---

    async fn remove(&self, key: &str) -> Result<(), IndexError> {
        'restart: for attempt in 0..=MAX_RESTARTS {
            let mut at = self.root_route().await?;
            let mut path: Vec<ChildRoute> = Vec::new();

            // Descent under read locks, remembering the ancestors.
            while at.key != key {
                let guard = self.locks.read(&at.key).await?;
                let fetched = self.load(&at).await;
                let Some(record) = settle(fetched, guard.release().await)? else {
                    pause(attempt).await;
                    continue 'restart;
                };

                let Some(index) = record.find_prefix(key) else {
                    tracing::debug!("Delete of absent key '{}'", key);
                    return Ok(());
                };
                let next = record.children[index].clone();
                path.push(std::mem::replace(&mut at, next));
            }

            let guard = self.locks.write(&at.key).await?;
            let removal = self.remove_target_locked(&at).await;

            let (meta, change) = match settle(removal, guard.release().await)? {
                Removal::Absent => return Ok(()),
                Removal::Vanished => {
                    pause(attempt).await;
                    continue 'restart;
                }
                Removal::Deleted(meta) => (meta, Some(Change::Removed)),
                Removal::Cleared { meta, pass_through } => {
                    (meta, pass_through.then_some(Change::PassThrough))
                }
            };

            let fixed = match change {
                Some(change) => self.fix_up(path, at, change).await,
                None => Ok(()),
            };
            let payload_deleted = self
                .store
                .delete_payload(&meta.node_id, &meta.source)
                .await;
            fixed?;
            payload_deleted?;

            tracing::debug!("Deleted object '{}'", key);
            return Ok(());
        }

        Err(IndexError::Contended(key.to_string()))
    }

    async fn remove_target_locked(&self, at: &ChildRoute) -> Result<Removal, IndexError> {
        let Some(mut record) = self.load(at).await? else {
            return Ok(Removal::Vanished);
        };
        let Some(meta) = record.clear_object() else {
            return Ok(Removal::Absent);
        };

        if record.children.is_empty() && !self.is_root(&at.key) {
            self.store.delete_record(&at.node_id, &at.key).await?;
            return Ok(Removal::Deleted(meta));
        }

        self.store.put_record(&at.node_id, &record).await?;
        Ok(Removal::Cleared {
            meta,
            pass_through: record.is_pass_through() && !self.is_root(&at.key),
        })
    }

    /// Walks `path` bottom-up, absorbing `change` at each ancestor until one is
    /// left unaffected.
    pub(super) async fn fix_up(
        &self,
        mut path: Vec<ChildRoute>,
        mut child: ChildRoute,
        mut change: Change,
    ) -> Result<(), IndexError> {
        let mut relocations = 0;

        while let Some(parent) = path.pop() {
            let outcome = match change {
                Change::Removed => self.unlink_child(&parent, &child).await?,
                Change::PassThrough => self.fold_child(&parent, &child).await?,
            };

            match outcome {
                FixUp::Settled => break,
                FixUp::Propagate(next) => {
                    change = next;
                    child = parent;
                }
                FixUp::Moved => {
                    if relocations == MAX_RESTARTS {
                        return Err(IndexError::Contended(child.key));
                    }
                    relocations += 1;
                    tracing::debug!("Route to '{}' moved, locating its parent", child.key);

                    match self.locate_parent(&child).await? {
                        Some(ancestors) => path = ancestors,
                        None => {
                            tracing::debug!("'{}' is no longer linked", child.key);
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Ancestors of `child` as currently linked, ending with the record routing to it.
    /// `None` when no record routes to it any more.
    async fn locate_parent(
        &self,
        child: &ChildRoute,
    ) -> Result<Option<Vec<ChildRoute>>, IndexError> {
        'restart: for attempt in 0..=MAX_RESTARTS {
            let mut at = self.root_route().await?;
            let mut path: Vec<ChildRoute> = Vec::new();

            loop {
                let guard = self.locks.read(&at.key).await?;
                let fetched = self.load(&at).await;
                let Some(record) = settle(fetched, guard.release().await)? else {
                    pause(attempt).await;
                    continue 'restart;
                };

                if route_index(&record, child).is_some() {
                    path.push(at);
                    return Ok(Some(path));
                }
                let next = match record.find_prefix(&child.key) {
                    Some(index) if record.children[index].key != child.key => {
                        record.children[index].clone()
                    }
                    _ => return Ok(None),
                };
                path.push(std::mem::replace(&mut at, next));
            }
        }

        Err(IndexError::Contended(child.key.clone()))
    }

    async fn unlink_child(
        &self,
        parent: &ChildRoute,
        child: &ChildRoute,
    ) -> Result<FixUp, IndexError> {
        let guard = self.locks.write(&parent.key).await?;
        let step = self.unlink_child_locked(parent, child).await;
        settle(step, guard.release().await)
    }

    async fn unlink_child_locked(
        &self,
        parent: &ChildRoute,
        child: &ChildRoute,
    ) -> Result<FixUp, IndexError> {
        let Some(mut record) = self.load(parent).await? else {
            return Ok(FixUp::Moved);
        };
        let Some(index) = route_index(&record, child) else {
            return Ok(FixUp::Moved);
        };
        record.remove_child(index);

        let is_root = self.is_root(&parent.key);
        if record.children.is_empty() && !record.has_object() && !is_root {
            self.store.delete_record(&parent.node_id, &parent.key).await?;
            tracing::debug!("Deleted emptied record '{}'", parent.key);
            return Ok(FixUp::Propagate(Change::Removed));
        }

        self.store.put_record(&parent.node_id, &record).await?;
        if record.is_pass_through() && !is_root {
            Ok(FixUp::Propagate(Change::PassThrough))
        } else {
            Ok(FixUp::Settled)
        }
    }

    /// Splices the single child of `child` into `parent`, holding both write locks.
    async fn fold_child(
        &self,
        parent: &ChildRoute,
        child: &ChildRoute,
    ) -> Result<FixUp, IndexError> {
        let parent_guard = self.locks.write(&parent.key).await?;
        let child_guard = match self.locks.write(&child.key).await {
            Ok(guard) => guard,
            Err(e) => {
                if let Err(release_err) = parent_guard.release().await {
                    tracing::warn!("Failed to release '{}': {}", parent.key, release_err);
                }
                return Err(e.into());
            }
        };

        let step = self.fold_child_locked(parent, child).await;
        let child_released = child_guard.release().await;
        let parent_released = parent_guard.release().await;

        let value = step?;
        child_released?;
        parent_released?;
        Ok(value)
    }

    async fn fold_child_locked(
        &self,
        parent: &ChildRoute,
        child: &ChildRoute,
    ) -> Result<FixUp, IndexError> {
        let Some(mut record) = self.load(parent).await? else {
            return Ok(FixUp::Moved);
        };
        let Some(index) = route_index(&record, child) else {
            return Ok(FixUp::Moved);
        };
        // Gone or no longer a pass-through: whoever changed it owns the follow-up.
        let Some(folded) = self.load(child).await? else {
            return Ok(FixUp::Settled);
        };
        if !folded.is_pass_through() {
            return Ok(FixUp::Settled);
        }
        let Some(grandchild) = folded.children.first().cloned() else {
            return Ok(FixUp::Settled);
        };

        record.children[index] = grandchild;
        self.store.put_record(&parent.node_id, &record).await?;
        self.store.delete_record(&child.node_id, &child.key).await?;

        tracing::debug!("Folded '{}' into '{}'", child.key, parent.key);
        Ok(FixUp::Settled)
    }

    // --- Scan ---

    async fn scan(
        &self,
        prefix: &str,
        delimiter: &str,
        after: &str,
        limit: usize,
    ) -> Result<ListResult, IndexError> {
        let mut result = ListResult::default();
        if limit == 0 {
            return Ok(result);
        }

        // Depth-first with children pushed in reverse, so records pop in key order.
        let mut stack = vec![self.root_route().await?];

        while let Some(at) = stack.pop() {
            let guard = self.locks.read(&at.key).await?;
            let fetched = self.load(&at).await;
            let Some(record) = settle(fetched, guard.release().await)? else {
                // Restructured since its parent was read; its keys moved elsewhere.
                tracing::debug!("Skipping vanished record '{}' during scan", at.key);
                continue;
            };

            if let Some(group) = delimited_group(&record.key, prefix, delimiter) {
                // With the cursor inside the group, only its later keys count.
                let follows = if group.as_str() > after {
                    true
                } else if after.starts_with(group.as_str()) {
                    self.holds_key_after(record, after).await?
                } else {
                    false
                };
                if follows {
                    result.common_prefixes.insert(group);
                }
                continue;
            }

            stack.extend(
                record
                    .children
                    .iter()
                    .rev()
                    .filter(|child| {
                        overlaps_prefix(&child.key, prefix) && may_follow(&child.key, after)
                    })
                    .cloned(),
            );

            if record.has_object() && record.key.starts_with(prefix) && record.key.as_str() > after
            {
                result.entries.push(record);
                if result.entries.len() >= limit {
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Whether the subtree at `record` stores an object keyed after `after`.
    async fn holds_key_after(&self, record: IndexRecord, after: &str) -> Result<bool, IndexError> {
        let mut stack: Vec<ChildRoute> = Vec::new();
        let mut next = Some(record);

        loop {
            if let Some(record) = next.take() {
                if record.has_object() && record.key.as_str() > after {
                    return Ok(true);
                }
                stack.extend(
                    record
                        .children
                        .into_iter()
                        .filter(|child| may_follow(&child.key, after)),
                );
            }

            let Some(at) = stack.pop() else {
                return Ok(false);
            };
            let guard = self.locks.read(&at.key).await?;
            let fetched = self.load(&at).await;
            next = settle(fetched, guard.release().await)?;
        }
    }

    // --- Helpers ---

    fn validate(&self, key: &str) -> Result<(), IndexError> {
        if key.starts_with(self.config.root_key.as_str()) {
            Ok(())
        } else {
            Err(IndexError::InvalidKey {
                key: key.to_string(),
                root: self.config.root_key.clone(),
            })
        }
    }

    fn is_root(&self, key: &str) -> bool {
        key == self.config.root_key
    }

    async fn root_route(&self) -> Result<ChildRoute, IndexError> {
        let node_id = self.root_node().await?;
        Ok(ChildRoute::new(node_id, self.config.root_key.clone()))
    }

    /// Reads the record at `at`. `None` means a non-root record vanished; a missing
    /// root is reported as `RootMissing` so the cached location gets refreshed.
    async fn load(&self, at: &ChildRoute) -> Result<Option<IndexRecord>, IndexError> {
        match self.store.get_record(&at.node_id, &at.key).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() && self.is_root(&at.key) => {
                Err(IndexError::RootMissing(at.node_id.clone()))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs `op`, and once more after rediscovering the root if the cached root
    /// turned out to be stale.
    async fn retry_root<T, F, Fut>(&self, op: F) -> Result<T, IndexError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, IndexError>>,
    {
        match op().await {
            Err(IndexError::RootMissing(stale)) => {
                tracing::warn!("Root record missing on {}, rediscovering", stale);
                self.root.invalidate(&stale).await;
                op().await
            }
            other => other,
        }
    }
}

/// Combines an operation's result with its lock release: the operation's error wins,
/// otherwise a failed release is reported.
fn settle<T>(result: Result<T, IndexError>, released: Result<(), LockError>) -> Result<T, IndexError> {
    let value = result?;
    released?;
    Ok(value)
}

/// Position of the route to exactly `child` (same key, same node) in `record`.
fn route_index(record: &IndexRecord, child: &ChildRoute) -> Option<usize> {
    record
        .child_index(&child.key)
        .filter(|&index| record.children[index].node_id == child.node_id)
}

fn object_meta(node_id: NodeId, source: SourceId, content_type: &str, payload: &Bytes) -> ObjectMeta {
    ObjectMeta {
        node_id,
        source,
        size: payload.len() as u64,
        content_type: content_type.to_string(),
        last_modified: now_ms(),
    }
}

async fn pause(attempt: usize) {
    metrics::counter!(INDEX_RESTARTS).increment(1);
    let jitter = rand::random::<u64>() % 10;
    let delay = 5 * (attempt as u64 + 1) + jitter;
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
