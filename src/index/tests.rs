//! Namespace Index Tests
//!
//! Runs the trie end to end against the in-memory lock backend, node directory and
//! record store.
//!
//! ## Test Scopes
//! - **Objects**: put/get/head round trips, overwrite, idempotent delete.
//! - **Structure**: split at the longest common prefix, folding on delete, and the
//!   prefix and merge invariants over every stored record.
//! - **Listing**: prefix, delimiter, `after` cursor and limit.
//! - **Restructured fix-up**: delete fix-up after a sibling fold or a split moved
//!   the route it remembered.
//! - **Concurrency**: racing writers on one key and on sibling keys, sibling deletes,
//!   and a delete racing a split.
//! - **Failures**: invalid keys, unreachable nodes, a lost root record.
//! - **HTTP API**: the `/api` routes over a loopback listener.

#[cfg(test)]
mod tests {
    use crate::config::{IndexConfig, LockConfig};
    use crate::directory::memory::MemoryDirectory;
    use crate::directory::types::NodeId;
    use crate::error::{DirectoryError, IndexError, StoreError};
    use crate::index::handlers::{http_date, routes};
    use crate::index::keys::common_prefix;
    use crate::index::protocol::ListResponse;
    use crate::index::trie::{Change, NamespaceIndex};
    use crate::index::types::{ChildRoute, IndexRecord};
    use crate::lock::LockPool;
    use crate::lock::memory::MemoryLockBackend;
    use crate::store::memory::MemoryRecordStore;
    use axum::Extension;
    use bytes::Bytes;
    use std::collections::{BTreeSet, HashSet};
    use std::sync::Arc;

    struct Harness {
        index: Arc<NamespaceIndex>,
        store: Arc<MemoryRecordStore>,
        root_key: String,
    }

    fn harness(root_key: &str, nodes: usize) -> Harness {
        let directory = Arc::new(MemoryDirectory::with_nodes(nodes));
        let store = Arc::new(MemoryRecordStore::new());
        let locks = Arc::new(LockPool::new(
            Arc::new(MemoryLockBackend::new()),
            LockConfig::default(),
        ));
        let index = NamespaceIndex::new(
            IndexConfig {
                root_key: root_key.to_string(),
            },
            directory,
            store.clone(),
            locks,
        );

        Harness {
            index: Arc::new(index),
            store,
            root_key: root_key.to_string(),
        }
    }

    fn record(store: &MemoryRecordStore, key: &str) -> Option<IndexRecord> {
        store
            .all_records()
            .into_iter()
            .map(|(_, record)| record)
            .find(|record| record.key == key)
    }

    /// Route to the stored record for `key`, wherever it lives.
    fn route_to(store: &MemoryRecordStore, key: &str) -> ChildRoute {
        let (node_id, _) = store
            .all_records()
            .into_iter()
            .find(|(_, record)| record.key == key)
            .unwrap_or_else(|| panic!("No record for '{}'", key));
        ChildRoute::new(node_id, key)
    }

    fn child_keys(record: &IndexRecord) -> Vec<String> {
        record.children.iter().map(|c| c.key.clone()).collect()
    }

    fn entry_keys(entries: &[IndexRecord]) -> Vec<String> {
        entries.iter().map(|r| r.key.clone()).collect()
    }

    /// Checks the structural invariants over every stored record:
    /// - children are strict extensions of their parent, sorted, pairwise prefix-disjoint;
    /// - no non-root record is empty or a pass-through;
    /// - every route points at an existing record and every record is reachable.
    fn assert_trie_invariants(h: &Harness) {
        let all = h.store.all_records();

        for (_, record) in &all {
            for child in &record.children {
                assert!(
                    child.key.starts_with(&record.key) && child.key.len() > record.key.len(),
                    "Child '{}' is not a strict extension of '{}'",
                    child.key,
                    record.key
                );
            }
            for pair in record.children.windows(2) {
                assert!(pair[0].key < pair[1].key, "Children of '{}' unsorted", record.key);
                assert!(
                    common_prefix(&pair[0].key, &pair[1].key).len() <= record.key.len(),
                    "Siblings '{}' and '{}' should have been split",
                    pair[0].key,
                    pair[1].key
                );
            }
            if record.key != h.root_key {
                assert!(
                    !record.is_pass_through(),
                    "Pass-through record '{}' survived",
                    record.key
                );
                assert!(
                    record.has_object() || !record.children.is_empty(),
                    "Empty record '{}' survived",
                    record.key
                );
            }
        }

        let (root_node, _) = all
            .iter()
            .find(|(_, r)| r.key == h.root_key)
            .expect("root record must exist");
        let mut reachable = 0;
        let mut stack = vec![(root_node.clone(), h.root_key.clone())];
        while let Some((node_id, key)) = stack.pop() {
            let record = h
                .store
                .node(&node_id)
                .get_record(&key)
                .unwrap_or_else(|| panic!("Dangling route to '{}' on {}", key, node_id));
            reachable += 1;
            stack.extend(
                record
                    .children
                    .iter()
                    .map(|c| (c.node_id.clone(), c.key.clone())),
            );
        }
        assert_eq!(reachable, all.len(), "Orphaned records present");
    }

    // ============================================================
    // OBJECT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        // ARRANGE
        let h = harness("/", 3);

        // ACT
        h.index
            .put("/docs/readme.md", "text/markdown", Bytes::from_static(b"# hi"))
            .await
            .unwrap();
        let (record, payload) = h.index.get("/docs/readme.md").await.unwrap();

        // ASSERT
        assert_eq!(payload, Bytes::from_static(b"# hi"));
        let meta = record.object.unwrap();
        assert_eq!(meta.size, 4);
        assert_eq!(meta.content_type, "text/markdown");
        assert!(meta.last_modified > 0);
    }

    #[tokio::test]
    async fn test_head_returns_metadata() {
        let h = harness("/", 2);
        h.index
            .put("/a.bin", "application/octet-stream", Bytes::from(vec![0u8; 1024]))
            .await
            .unwrap();

        let record = h.index.head("/a.bin").await.unwrap();
        assert_eq!(record.key, "/a.bin");
        assert_eq!(record.object.unwrap().size, 1024);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let h = harness("/", 2);
        h.index.put("/abc", "text/plain", Bytes::new()).await.unwrap();

        assert!(h.index.get("/nope").await.unwrap_err().is_not_found());
        // A prefix of a stored key is not an object
        assert!(h.index.head("/ab").await.unwrap_err().is_not_found());
        // Neither is an extension of one
        assert!(h.index.head("/abcd").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_payload_in_place() {
        let h = harness("/", 2);
        h.index
            .put("/k", "text/plain", Bytes::from_static(b"one"))
            .await
            .unwrap();

        h.index
            .put("/k", "application/json", Bytes::from_static(b"{\"v\":2}"))
            .await
            .unwrap();

        let (record, payload) = h.index.get("/k").await.unwrap();
        assert_eq!(payload, Bytes::from_static(b"{\"v\":2}"));
        assert_eq!(record.object.unwrap().content_type, "application/json");
        assert_eq!(h.store.payload_count(), 1, "Overwrite must reuse the payload slot");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let h = harness("/", 2);

        h.index.delete("/never-written").await.unwrap();

        h.index.put("/x", "text/plain", Bytes::from_static(b"x")).await.unwrap();
        h.index.delete("/x").await.unwrap();
        h.index.delete("/x").await.unwrap();

        assert!(h.index.get("/x").await.unwrap_err().is_not_found());
        assert_eq!(h.store.payload_count(), 0, "Payload should be removed with the object");
    }

    #[tokio::test]
    async fn test_object_at_root_key() {
        let h = harness("/", 1);

        h.index.put("/", "text/html", Bytes::from_static(b"<html/>")).await.unwrap();
        let (_, payload) = h.index.get("/").await.unwrap();
        assert_eq!(payload, Bytes::from_static(b"<html/>"));

        h.index.delete("/").await.unwrap();

        assert!(h.index.head("/").await.unwrap_err().is_not_found());
        let root = record(&h.store, "/").expect("root record is never deleted");
        assert!(!root.has_object());
    }

    // ============================================================
    // STRUCTURE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_split_creates_intermediate_at_common_prefix() {
        // ARRANGE
        let h = harness("", 3);

        // ACT
        h.index.put("abc", "text/plain", Bytes::from_static(b"c")).await.unwrap();
        h.index.put("abd", "text/plain", Bytes::from_static(b"d")).await.unwrap();

        // ASSERT
        let root = record(&h.store, "").unwrap();
        assert_eq!(child_keys(&root), vec!["ab"]);

        let intermediate = record(&h.store, "ab").unwrap();
        assert!(!intermediate.has_object());
        assert_eq!(child_keys(&intermediate), vec!["abc", "abd"]);
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_put_at_intermediate_populates_it() {
        let h = harness("", 3);
        h.index.put("abc", "text/plain", Bytes::from_static(b"c")).await.unwrap();
        h.index.put("abd", "text/plain", Bytes::from_static(b"d")).await.unwrap();

        h.index.put("ab", "text/plain", Bytes::from_static(b"b")).await.unwrap();

        let intermediate = record(&h.store, "ab").unwrap();
        assert!(intermediate.has_object());
        assert_eq!(
            child_keys(&intermediate),
            vec!["abc", "abd"],
            "No third child should be created"
        );
        assert_eq!(h.index.get("ab").await.unwrap().1, Bytes::from_static(b"b"));
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_put_of_prefix_key_splits_existing_leaf() {
        let h = harness("", 2);
        h.index.put("abc", "text/plain", Bytes::from_static(b"c")).await.unwrap();

        h.index.put("ab", "text/plain", Bytes::from_static(b"b")).await.unwrap();

        let ab = record(&h.store, "ab").unwrap();
        assert!(ab.has_object());
        assert_eq!(child_keys(&ab), vec!["abc"]);
        assert_eq!(h.index.get("abc").await.unwrap().1, Bytes::from_static(b"c"));
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_sample_scenario_split_then_fold() {
        let h = harness("/", 3);
        let data = Bytes::from(vec![b'x'; 120]);

        // A single key hangs directly off the root.
        h.index.put("/reports/jan.csv", "text/csv", data.clone()).await.unwrap();
        let root = record(&h.store, "/").unwrap();
        assert_eq!(child_keys(&root), vec!["/reports/jan.csv"]);

        // A sibling splits at the shared directory.
        h.index.put("/reports/feb.csv", "text/csv", data.clone()).await.unwrap();
        let root = record(&h.store, "/").unwrap();
        assert_eq!(child_keys(&root), vec!["/reports/"]);
        let reports = record(&h.store, "/reports/").unwrap();
        assert_eq!(child_keys(&reports), vec!["/reports/feb.csv", "/reports/jan.csv"]);

        let listing = h.index.list("/reports/", "", "", 10).await.unwrap();
        assert_eq!(
            entry_keys(&listing.entries),
            vec!["/reports/feb.csv", "/reports/jan.csv"]
        );

        // Removing one leaves a pass-through, which gets folded away.
        h.index.delete("/reports/jan.csv").await.unwrap();
        assert!(record(&h.store, "/reports/").is_none());
        let root = record(&h.store, "/").unwrap();
        assert_eq!(child_keys(&root), vec!["/reports/feb.csv"]);
        assert_eq!(h.index.get("/reports/feb.csv").await.unwrap().1, data);
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_delete_routing_object_keeps_children() {
        let h = harness("", 2);
        for key in ["ab", "abc", "abd"] {
            h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }

        h.index.delete("ab").await.unwrap();

        let ab = record(&h.store, "ab").unwrap();
        assert!(!ab.has_object());
        assert_eq!(child_keys(&ab), vec!["abc", "abd"]);
        assert!(h.index.head("abc").await.is_ok());
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_clearing_object_folds_pass_through() {
        // ARRANGE: "a/" holds an object and a single child
        let h = harness("", 2);
        h.index.put("a/", "text/plain", Bytes::from_static(b"dir")).await.unwrap();
        h.index.put("a/x", "text/plain", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(child_keys(&record(&h.store, "a/").unwrap()), vec!["a/x"]);

        // ACT
        h.index.delete("a/").await.unwrap();

        // ASSERT
        assert!(record(&h.store, "a/").is_none());
        assert_eq!(child_keys(&record(&h.store, "").unwrap()), vec!["a/x"]);
        assert!(h.index.head("a/x").await.is_ok());
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_deleting_everything_leaves_only_root() {
        let h = harness("/", 3);
        let keys = ["/a", "/ab", "/abc", "/abd", "/b/c", "/b/d/e", "/b/d/f"];
        for key in keys {
            h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }

        for key in keys {
            h.index.delete(key).await.unwrap();
            assert_trie_invariants(&h);
        }

        let all = h.store.all_records();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1, IndexRecord::new("/"));
        assert_eq!(h.store.payload_count(), 0);
    }

    #[tokio::test]
    async fn test_invariants_hold_over_mixed_operations() {
        let h = harness("/", 4);
        let keys = [
            "/photos/2023/beach.jpg",
            "/photos/2023/bridge.jpg",
            "/photos/2024/snow.jpg",
            "/photos/",
            "/music/a.mp3",
            "/music/ab.mp3",
            "/music/abc.mp3",
            "/m",
            "/photos/2023/b",
        ];

        for key in keys {
            h.index
                .put(key, "text/plain", Bytes::from(key.to_string()))
                .await
                .unwrap();
            assert_trie_invariants(&h);
        }

        for key in ["/photos/2023/bridge.jpg", "/music/ab.mp3", "/photos/", "/m"] {
            h.index.delete(key).await.unwrap();
            assert_trie_invariants(&h);
        }

        let survivors = [
            "/photos/2023/beach.jpg",
            "/photos/2024/snow.jpg",
            "/music/a.mp3",
            "/music/abc.mp3",
            "/photos/2023/b",
        ];
        for key in survivors {
            let (_, payload) = h.index.get(key).await.unwrap();
            assert_eq!(payload, Bytes::from(key.to_string()));
        }
        assert_eq!(h.store.payload_count(), survivors.len());
    }

    #[tokio::test]
    async fn test_non_ascii_keys_split_on_char_boundaries() {
        let h = harness("/", 2);
        h.index.put("/café", "text/plain", Bytes::from_static(b"1")).await.unwrap();
        h.index.put("/cafè", "text/plain", Bytes::from_static(b"2")).await.unwrap();

        assert!(record(&h.store, "/caf").is_some());
        assert_eq!(h.index.get("/café").await.unwrap().1, Bytes::from_static(b"1"));
        assert_eq!(h.index.get("/cafè").await.unwrap().1, Bytes::from_static(b"2"));
        assert_trie_invariants(&h);
    }

    // ============================================================
    // LISTING TESTS
    // ============================================================

    async fn scan_fixture() -> Harness {
        let h = harness("", 3);
        for key in ["a/x", "a/y", "b/z"] {
            h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }
        h
    }

    #[tokio::test]
    async fn test_scan_prefix_without_delimiter() {
        let h = scan_fixture().await;

        let listing = h.index.list("a/", "", "", 10).await.unwrap();

        assert_eq!(entry_keys(&listing.entries), vec!["a/x", "a/y"]);
        assert!(listing.common_prefixes.is_empty());
    }

    #[tokio::test]
    async fn test_scan_groups_by_delimiter() {
        let h = scan_fixture().await;

        let listing = h.index.list("", "/", "", 10).await.unwrap();

        let expected: BTreeSet<String> = ["a/", "b/"].iter().map(|s| s.to_string()).collect();
        assert_eq!(listing.common_prefixes, expected);
        assert!(listing.entries.is_empty());
    }

    #[tokio::test]
    async fn test_scan_mixes_entries_and_groups() {
        let h = harness("/", 3);
        for key in [
            "/reports/jan.csv",
            "/reports/2024/a.csv",
            "/reports/2024/b.csv",
            "/reports/summary.txt",
            "/other/file",
        ] {
            h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }

        let listing = h.index.list("/reports/", "/", "", 100).await.unwrap();

        assert_eq!(
            entry_keys(&listing.entries),
            vec!["/reports/jan.csv", "/reports/summary.txt"]
        );
        assert_eq!(
            listing.common_prefixes.into_iter().collect::<Vec<_>>(),
            vec!["/reports/2024/"]
        );
    }

    #[tokio::test]
    async fn test_scan_after_and_limit() {
        let h = harness("/", 2);
        for key in ["/a", "/b", "/c", "/d", "/ca"] {
            h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }

        let first = h.index.list("/", "", "", 2).await.unwrap();
        assert_eq!(entry_keys(&first.entries), vec!["/a", "/b"]);

        let next = h.index.list("/", "", "/b", 2).await.unwrap();
        assert_eq!(entry_keys(&next.entries), vec!["/c", "/ca"]);

        let last = h.index.list("/", "", "/ca", 10).await.unwrap();
        assert_eq!(entry_keys(&last.entries), vec!["/d"]);

        let none = h.index.list("/", "", "", 0).await.unwrap();
        assert!(none.entries.is_empty());
    }

    #[tokio::test]
    async fn test_scan_skips_groups_before_cursor() {
        let h = scan_fixture().await;

        let listing = h.index.list("", "/", "a/y", 10).await.unwrap();

        let expected: BTreeSet<String> = ["b/".to_string()].into_iter().collect();
        assert_eq!(listing.common_prefixes, expected);
    }

    #[tokio::test]
    async fn test_scan_cursor_inside_group_keeps_later_keys() {
        // ARRANGE
        let h = harness("/", 3);
        for key in ["/a/x", "/a/y", "/b/z"] {
            h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }

        // ACT
        let inside = h.index.list("/", "/", "/a/x", 10).await.unwrap();
        let at_group = h.index.list("/", "/", "/a/", 10).await.unwrap();
        let past_group = h.index.list("/", "/", "/a/y", 10).await.unwrap();

        // ASSERT: "/a/y" still follows the cursor, so its group is listed
        let both: BTreeSet<String> = ["/a/", "/b/"].iter().map(|s| s.to_string()).collect();
        assert_eq!(inside.common_prefixes, both);
        assert!(inside.entries.is_empty());
        assert_eq!(at_group.common_prefixes, both);

        let later: BTreeSet<String> = ["/b/".to_string()].into_iter().collect();
        assert_eq!(past_group.common_prefixes, later);
    }

    #[tokio::test]
    async fn test_scan_cursor_inside_nested_group() {
        let h = harness("/", 2);
        for key in ["/logs/2024/01/a", "/logs/2024/02/b", "/logs/2025/01/c"] {
            h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }

        let listing = h.index.list("/logs/", "/", "/logs/2024/01/a", 10).await.unwrap();

        let expected: BTreeSet<String> = ["/logs/2024/", "/logs/2025/"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(listing.common_prefixes, expected);
    }

    #[tokio::test]
    async fn test_scan_entries_are_unique_and_sorted() {
        let h = harness("/", 4);
        let mut keys: Vec<String> = (0..40).map(|i| format!("/k/{:02}/{}", i % 7, i)).collect();
        for key in &keys {
            h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }

        let listing = h.index.list("/k/", "", "", 1000).await.unwrap();

        keys.sort();
        assert_eq!(entry_keys(&listing.entries), keys);
    }

    // ============================================================
    // RESTRUCTURED FIX-UP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_fix_up_follows_route_folded_into_grandparent() {
        // ARRANGE: "/r/b" is being deleted; its record is gone but its parent
        // "/r/" has not been fixed yet.
        let h = harness("/", 3);
        h.index.put("/r/a", "text/plain", Bytes::from_static(b"a")).await.unwrap();
        h.index.put("/r/b", "text/plain", Bytes::from_static(b"b")).await.unwrap();
        let root = route_to(&h.store, "/");
        let dir = route_to(&h.store, "/r/");
        let leaf = route_to(&h.store, "/r/b");
        assert!(h.store.node(&leaf.node_id).delete_record("/r/b"));

        // A sibling delete folds "/r/" away, moving the "/r/b" route into the root.
        h.index.delete("/r/a").await.unwrap();
        assert_eq!(child_keys(&record(&h.store, "/").unwrap()), vec!["/r/b"]);

        // ACT: the first delete resumes with its stale path
        h.index
            .fix_up(vec![root, dir], leaf, Change::Removed)
            .await
            .unwrap();

        // ASSERT
        assert_eq!(h.store.all_records().len(), 1);
        assert_trie_invariants(&h);
        h.index.put("/r/b", "text/plain", Bytes::from_static(b"b2")).await.unwrap();
        h.index.put("/r/bb", "text/plain", Bytes::from_static(b"bb")).await.unwrap();
        assert_eq!(h.index.get("/r/b").await.unwrap().1, Bytes::from_static(b"b2"));
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_fix_up_follows_route_moved_under_split() {
        // ARRANGE: "/a1" is being deleted, then a split puts "/a" between it and the root
        let h = harness("/", 3);
        h.index.put("/a1", "text/plain", Bytes::from_static(b"1")).await.unwrap();
        h.index.put("/b", "text/plain", Bytes::from_static(b"b")).await.unwrap();
        let root = route_to(&h.store, "/");
        let leaf = route_to(&h.store, "/a1");
        assert!(h.store.node(&leaf.node_id).delete_record("/a1"));

        h.index.put("/a2", "text/plain", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(child_keys(&record(&h.store, "/a").unwrap()), vec!["/a1", "/a2"]);

        // ACT
        h.index.fix_up(vec![root], leaf, Change::Removed).await.unwrap();

        // ASSERT: unlinked under "/a", which then folded into the root
        assert!(record(&h.store, "/a").is_none());
        assert_eq!(child_keys(&record(&h.store, "/").unwrap()), vec!["/a2", "/b"]);
        assert_eq!(h.index.get("/a2").await.unwrap().1, Bytes::from_static(b"2"));
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_fold_follows_pass_through_moved_under_split() {
        // ARRANGE: "/ab" was left with the single child "/ab1"
        let h = harness("/", 3);
        h.index.put("/ab1", "text/plain", Bytes::from_static(b"1")).await.unwrap();
        h.index.put("/ab2", "text/plain", Bytes::from_static(b"2")).await.unwrap();
        let root = route_to(&h.store, "/");
        let ab = route_to(&h.store, "/ab");
        let ab2 = route_to(&h.store, "/ab2");
        assert!(h.store.node(&ab2.node_id).delete_record("/ab2"));
        let mut pass_through = record(&h.store, "/ab").unwrap();
        let index = pass_through.child_index("/ab2").unwrap();
        pass_through.remove_child(index);
        h.store.node(&ab.node_id).put_record(pass_through);

        // A split moves "/ab" under a new "/a".
        h.index.put("/ac", "text/plain", Bytes::from_static(b"c")).await.unwrap();

        // ACT
        h.index.fix_up(vec![root], ab, Change::PassThrough).await.unwrap();

        // ASSERT
        assert!(record(&h.store, "/ab").is_none());
        assert_eq!(child_keys(&record(&h.store, "/a").unwrap()), vec!["/ab1", "/ac"]);
        assert_eq!(h.index.get("/ab1").await.unwrap().1, Bytes::from_static(b"1"));
        assert_trie_invariants(&h);
    }

    #[tokio::test]
    async fn test_fix_up_of_unlinked_child_is_a_no_op() {
        let h = harness("/", 2);
        h.index.put("/x", "text/plain", Bytes::from_static(b"x")).await.unwrap();
        let root = route_to(&h.store, "/");
        let ghost = ChildRoute::new(root.node_id.clone(), "/ghost");

        h.index.fix_up(vec![root], ghost, Change::Removed).await.unwrap();

        assert_eq!(child_keys(&record(&h.store, "/").unwrap()), vec!["/x"]);
        assert_trie_invariants(&h);
    }

    // ============================================================
    // CONCURRENCY TESTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sibling_deletes() {
        for round in 0..20 {
            // ARRANGE
            let h = harness("/", 3);
            for key in ["/r/a", "/r/b"] {
                h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
            }

            // ACT
            let (i1, i2) = (h.index.clone(), h.index.clone());
            let d1 = tokio::spawn(async move { i1.delete("/r/a").await });
            let d2 = tokio::spawn(async move { i2.delete("/r/b").await });
            d1.await.unwrap().unwrap();
            d2.await.unwrap().unwrap();

            // ASSERT
            assert_eq!(h.store.all_records().len(), 1, "Round {}", round);
            assert_trie_invariants(&h);
            h.index.put("/r/b", "text/plain", Bytes::from_static(b"v")).await.unwrap();
            assert!(h.index.head("/r/b").await.is_ok());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_delete_and_split() {
        for round in 0..20 {
            // ARRANGE
            let h = harness("/", 3);
            for key in ["/s/a1", "/t"] {
                h.index.put(key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
            }

            // ACT: the put splits the deleted key's parent route
            let (i1, i2) = (h.index.clone(), h.index.clone());
            let d = tokio::spawn(async move { i1.delete("/s/a1").await });
            let p = tokio::spawn(async move {
                i2.put("/s/a2", "text/plain", Bytes::from_static(b"n")).await
            });
            d.await.unwrap().unwrap();
            p.await.unwrap().unwrap();

            // ASSERT
            assert_trie_invariants(&h);
            assert!(h.index.head("/s/a1").await.unwrap_err().is_not_found(), "Round {}", round);
            assert_eq!(h.index.get("/s/a2").await.unwrap().1, Bytes::from_static(b"n"));
            assert!(h.index.head("/t").await.is_ok());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_same_key_leave_one_record() {
        // ARRANGE
        let h = harness("/", 3);
        let a = Bytes::from(vec![b'a'; 4096]);
        let b = Bytes::from(vec![b'b'; 2048]);

        // ACT
        let (i1, i2) = (h.index.clone(), h.index.clone());
        let (a1, b1) = (a.clone(), b.clone());
        let w1 = tokio::spawn(async move { i1.put("/same", "text/plain", a1).await });
        let w2 = tokio::spawn(async move { i2.put("/same", "text/plain", b1).await });
        w1.await.unwrap().unwrap();
        w2.await.unwrap().unwrap();

        // ASSERT: one of the two payloads, whole, with matching size
        let (record, payload) = h.index.get("/same").await.unwrap();
        assert!(payload == a || payload == b, "Payload must not be a mix");
        assert_eq!(record.object.unwrap().size, payload.len() as u64);

        let copies = h
            .store
            .all_records()
            .into_iter()
            .filter(|(_, r)| r.key == "/same")
            .count();
        assert_eq!(copies, 1);
        assert_trie_invariants(&h);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_on_sibling_keys() {
        let h = harness("/", 4);

        let mut handles = Vec::new();
        for i in 0..24 {
            let index = h.index.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("/dir/{}/file-{}", i % 3, i);
                index
                    .put(&key, "text/plain", Bytes::from(key.clone()))
                    .await
                    .map(|_| key)
            }));
        }

        let mut written = HashSet::new();
        for handle in handles {
            written.insert(handle.await.unwrap().unwrap());
        }

        for key in &written {
            let (_, payload) = h.index.get(key).await.unwrap();
            assert_eq!(payload, Bytes::from(key.clone()));
        }
        assert_trie_invariants(&h);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_and_deletes() {
        let h = harness("/", 3);
        for i in 0..10 {
            let key = format!("/q/{}", i);
            h.index.put(&key, "text/plain", Bytes::from_static(b"v")).await.unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..10 {
            let index = h.index.clone();
            handles.push(tokio::spawn(async move {
                index.delete(&format!("/q/{}", i)).await?;
                index
                    .put(&format!("/q/{}/n", i), "text/plain", Bytes::from_static(b"n"))
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..10 {
            assert!(h.index.head(&format!("/q/{}", i)).await.unwrap_err().is_not_found());
            assert!(h.index.head(&format!("/q/{}/n", i)).await.is_ok());
        }
        assert_trie_invariants(&h);
    }

    // ============================================================
    // FAILURE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_key_outside_root_is_rejected() {
        let h = harness("/", 1);

        let err = h.index.put("relative", "text/plain", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_no_storage_nodes_surfaces_directory_error() {
        let h = harness("/", 0);

        let err = h.index.put("/a", "text/plain", Bytes::new()).await.unwrap_err();
        assert!(
            matches!(
                err,
                IndexError::Store(StoreError::Directory(DirectoryError::NoNodes))
                    | IndexError::Directory(DirectoryError::NoNodes)
            ),
            "Got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_unreachable_node_error_propagates() {
        // ARRANGE
        let h = harness("/", 1);
        h.index.put("/a", "text/plain", Bytes::from_static(b"v")).await.unwrap();
        let node = NodeId("node-0".to_string());

        // ACT
        h.store.set_unavailable(&node, true);
        let err = h.index.get("/a").await.unwrap_err();

        // ASSERT: surfaced unchanged, not turned into NotFound
        assert!(
            matches!(err, IndexError::Store(StoreError::Status { status: 503, .. })),
            "Got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_lost_root_is_rediscovered() {
        // ARRANGE: the cached root record disappears
        let h = harness("/", 2);
        h.index.put("/a", "text/plain", Bytes::from_static(b"v")).await.unwrap();
        let old_root = h.index.root_node().await.unwrap();
        assert!(h.store.node(&old_root).delete_record("/"));

        // ACT
        h.index.put("/b", "text/plain", Bytes::from_static(b"w")).await.unwrap();

        // ASSERT: a fresh root serves new writes
        assert!(record(&h.store, "/").is_some());
        assert_eq!(h.index.get("/b").await.unwrap().1, Bytes::from_static(b"w"));
    }

    // ============================================================
    // HTTP API TESTS
    // ============================================================

    async fn spawn_api(h: &Harness) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = routes().layer(Extension(h.index.clone()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_http_date_format() {
        assert_eq!(http_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[tokio::test]
    async fn test_api_object_lifecycle() {
        // ARRANGE
        let h = harness("/", 2);
        let base = spawn_api(&h).await;
        let client = reqwest::Client::new();

        // ACT: upload
        let put = client
            .put(format!("{}/api/docs/notes.md", base))
            .header("Content-Type", "text/markdown")
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(put.status(), 200);

        // ASSERT: download with headers
        let get = client
            .get(format!("{}/api/docs/notes.md", base))
            .send()
            .await
            .unwrap();
        assert_eq!(get.status(), 200);
        assert_eq!(get.headers()["content-type"], "text/markdown");
        assert!(get.headers()["last-modified"]
            .to_str()
            .unwrap()
            .ends_with("GMT"));
        assert_eq!(get.text().await.unwrap(), "hello");

        let head = client
            .head(format!("{}/api/docs/notes.md", base))
            .send()
            .await
            .unwrap();
        assert_eq!(head.status(), 200);
        assert_eq!(head.headers()["content-type"], "text/markdown");

        // Delete, then it is gone
        let delete = client
            .delete(format!("{}/api/docs/notes.md", base))
            .send()
            .await
            .unwrap();
        assert_eq!(delete.status(), 200);

        let missing = client
            .get(format!("{}/api/docs/notes.md", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn test_api_put_defaults_content_type() {
        let h = harness("/", 1);
        let base = spawn_api(&h).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{}/api/plain", base))
            .body("x")
            .send()
            .await
            .unwrap();

        let record = h.index.head("/plain").await.unwrap();
        assert_eq!(record.object.unwrap().content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_api_requests_are_counted() {
        // ARRANGE
        let metrics = crate::metrics::init();
        let h = harness("/", 1);
        let base = spawn_api(&h).await;

        // ACT
        let response = reqwest::get(format!("{}/api/counted/missing", base))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(response.status(), 404);
        let rendered = metrics.render();
        assert!(rendered.contains("radix_store_api_requests"), "Got: {}", rendered);
        assert!(rendered.contains("status=\"404\""), "Got: {}", rendered);
    }

    #[tokio::test]
    async fn test_api_list() {
        let h = harness("/", 2);
        for key in ["/photos/a.jpg", "/photos/b.jpg", "/photos/2024/c.jpg"] {
            h.index.put(key, "image/jpeg", Bytes::from_static(b"img")).await.unwrap();
        }
        let base = spawn_api(&h).await;

        let response: ListResponse = reqwest::Client::new()
            .get(format!("{}/api", base))
            .query(&[("prefix", "/photos/"), ("delimiter", "/")])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let keys: Vec<String> = response.entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec!["/photos/a.jpg", "/photos/b.jpg"]);
        assert_eq!(response.entries[0].size, 3);
        assert_eq!(response.common_prefixes, vec!["/photos/2024/"]);
    }
}
