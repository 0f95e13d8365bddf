//! InMemoryEphemeralStore - 開発・テスト用の key/value ツリー
//!
//! # 実装詳細
//! - serde_json::Value のツリーを tokio Mutex で保護
//! - 変更は broadcast channel で購読者へ通知（ロック解放後に送信）
//! - TTL は注入した Clock で判定し、各操作の前に期限切れを掃除
//! - 空になった親ノードは削除（Firebase と同じ見え方）
//! - `fail_under` で指定した prefix 配下の操作を失敗させられる

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast};

use crate::domain::{EpochMillis, StoreError};
use crate::ports::{Clock, EphemeralStore, StoreChange, StorePath, Subscription};

const CHANGE_CAPACITY: usize = 256;

#[derive(Default)]
struct Tree {
    root: Value,
    expiries: HashMap<StorePath, EpochMillis>,
    failing: Vec<StorePath>,
}

impl Tree {
    fn check(&self, path: &StorePath) -> Result<(), StoreError> {
        if self.failing.iter().any(|p| p.overlaps(path)) {
            return Err(StoreError::Unavailable(format!("injected failure at {path}")));
        }
        Ok(())
    }

    fn get(&self, path: &StorePath) -> Option<&Value> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.as_object()?.get(segment)?;
        }
        if node.is_null() { None } else { Some(node) }
    }

    fn set(&mut self, path: &StorePath, value: Value) {
        if value.is_null() {
            self.remove(path);
            return;
        }
        let mut node = &mut self.root;
        for segment in path.segments() {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Value::Object(map) = node else {
                return;
            };
            node = map.entry(segment.clone()).or_insert(Value::Null);
        }
        *node = value;
    }

    fn remove(&mut self, path: &StorePath) -> bool {
        let Some((last, parents)) = path.segments().split_last() else {
            let existed = !self.root.is_null();
            self.root = Value::Null;
            return existed;
        };
        let removed = remove_at(&mut self.root, parents, last);
        self.expiries.retain(|p, _| !path.contains(p));
        removed
    }

    /// Drop expired keys, returning the paths that disappeared.
    fn purge_expired(&mut self, now: EpochMillis) -> Vec<StorePath> {
        let expired: Vec<StorePath> = self
            .expiries
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(p, _)| p.clone())
            .collect();
        let mut gone = Vec::new();
        for path in expired {
            self.expiries.remove(&path);
            if self.remove(&path) {
                gone.push(path);
            }
        }
        gone
    }
}

/// Remove `parents/last`, pruning parents left empty. Returns whether anything was removed.
fn remove_at(node: &mut Value, parents: &[String], last: &str) -> bool {
    let Value::Object(map) = node else {
        return false;
    };
    match parents.split_first() {
        None => map.remove(last).is_some(),
        Some((head, rest)) => {
            let Some(child) = map.get_mut(head) else {
                return false;
            };
            let removed = remove_at(child, rest, last);
            if child.as_object().is_some_and(Map::is_empty) {
                map.remove(head);
            }
            removed
        }
    }
}

/// In-process ephemeral store.
///
/// # 使用例
/// ```ignore
/// let store = InMemoryEphemeralStore::new(clock.clone());
/// store.write(&StorePath::parse("users/u1/heartbeat"), json!({...})).await?;
/// ```
pub struct InMemoryEphemeralStore {
    tree: Mutex<Tree>,
    changes: broadcast::Sender<StoreChange>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEphemeralStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            tree: Mutex::new(Tree::default()),
            changes,
            clock,
        }
    }

    /// Every operation touching `prefix` (or an ancestor of it) fails until `heal`.
    pub async fn fail_under(&self, prefix: StorePath) {
        self.tree.lock().await.failing.push(prefix);
    }

    pub async fn heal(&self) {
        self.tree.lock().await.failing.clear();
    }

    /// Remove every expired key now. Returns how many disappeared.
    pub async fn purge_expired(&self) -> usize {
        let gone = {
            let mut tree = self.tree.lock().await;
            tree.purge_expired(self.clock.now_millis())
        };
        let count = gone.len();
        self.notify(gone);
        count
    }

    /// Copy of the whole tree (debug dumps, tests).
    pub async fn snapshot(&self) -> Value {
        let mut tree = self.tree.lock().await;
        let gone = tree.purge_expired(self.clock.now_millis());
        let root = tree.root.clone();
        drop(tree);
        self.notify(gone);
        root
    }

    fn notify(&self, paths: impl IntoIterator<Item = StorePath>) {
        for path in paths {
            // no subscribers is fine
            let _ = self.changes.send(StoreChange { path });
        }
    }

    async fn mutate<F>(&self, path: &StorePath, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Tree, EpochMillis) + Send,
    {
        let now = self.clock.now_millis();
        let mut gone = {
            let mut tree = self.tree.lock().await;
            tree.check(path)?;
            let gone = tree.purge_expired(now);
            apply(&mut tree, now);
            gone
        };
        gone.push(path.clone());
        self.notify(gone);
        Ok(())
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let (value, gone) = {
            let mut tree = self.tree.lock().await;
            tree.check(path)?;
            let gone = tree.purge_expired(self.clock.now_millis());
            (tree.get(path).cloned(), gone)
        };
        self.notify(gone);
        Ok(value)
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.mutate(path, |tree, _| {
            tree.expiries.remove(path);
            tree.set(path, value);
        })
        .await
    }

    async fn write_with_ttl(
        &self,
        path: &StorePath,
        value: Value,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.mutate(path, |tree, now| {
            tree.set(path, value);
            tree.expiries
                .insert(path.clone(), now.saturating_add(ttl_ms));
        })
        .await
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.mutate(path, |tree, _| {
            for (key, value) in fields {
                tree.set(&path.child(key), value);
            }
        })
        .await
    }

    async fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        self.mutate(path, |tree, _| {
            tree.remove(path);
        })
        .await
    }

    fn subscribe(&self, path: &StorePath) -> Subscription {
        Subscription::new(path.clone(), self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use crate::ports::ephemeral_store::fields;
    use serde_json::json;

    fn store() -> (Arc<FixedClock>, InMemoryEphemeralStore) {
        let clock = Arc::new(FixedClock::from_millis(1_000_000));
        let store = InMemoryEphemeralStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn write_read_and_nested_read() {
        let (_, store) = store();
        let path = StorePath::parse("users/u1/tasks/t1");
        store.write(&path, json!({"name": "a"})).await.unwrap();

        assert_eq!(store.read(&path).await.unwrap(), Some(json!({"name": "a"})));
        assert_eq!(
            store.read(&StorePath::parse("users/u1")).await.unwrap(),
            Some(json!({"tasks": {"t1": {"name": "a"}}}))
        );
        assert_eq!(store.read(&StorePath::parse("users/u2")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_prunes_empty_parents() {
        let (_, store) = store();
        let path = StorePath::parse("users/u1/tasks/t1");
        store.write(&path, json!(1)).await.unwrap();
        store.delete(&path).await.unwrap();

        assert_eq!(store.snapshot().await, json!({}));
        assert_eq!(store.read(&StorePath::parse("users")).await.unwrap(), None);
        // deleting again is fine
        store.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn update_merges_and_creates() {
        let (_, store) = store();
        let path = StorePath::parse("presence/u1/s1");
        store
            .update(&path, fields(json!({"room_id": "r1", "is_active": false})))
            .await
            .unwrap();
        store
            .update(&path, fields(json!({"is_active": true})))
            .await
            .unwrap();
        assert_eq!(
            store.read(&path).await.unwrap(),
            Some(json!({"room_id": "r1", "is_active": true}))
        );
    }

    #[tokio::test]
    async fn writing_null_deletes() {
        let (_, store) = store();
        let path = StorePath::parse("a/b");
        store.write(&path, json!("x")).await.unwrap();
        store.write(&path, Value::Null).await.unwrap();
        assert_eq!(store.read(&StorePath::parse("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_keys_expire_with_the_clock() {
        let (clock, store) = store();
        let path = StorePath::parse("room_events/r1/e1");
        store
            .write_with_ttl(&path, json!({"kind": "started"}), Duration::from_secs(10))
            .await
            .unwrap();

        clock.advance_secs(9);
        assert!(store.read(&path).await.unwrap().is_some());
        clock.advance_secs(1);
        assert!(store.read(&path).await.unwrap().is_none());
        assert_eq!(store.read(&StorePath::parse("room_events")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn plain_write_clears_ttl() {
        let (clock, store) = store();
        let path = StorePath::parse("k");
        store
            .write_with_ttl(&path, json!(1), Duration::from_secs(1))
            .await
            .unwrap();
        store.write(&path, json!(2)).await.unwrap();
        clock.advance_secs(5);
        assert_eq!(store.read(&path).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn injected_failures_cover_the_subtree() {
        let (_, store) = store();
        store.fail_under(StorePath::parse("users/u1")).await;

        let err = store
            .write(&StorePath::parse("users/u1/heartbeat"), json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store
            .write(&StorePath::parse("users/u2/heartbeat"), json!(1))
            .await
            .unwrap();

        store.heal().await;
        store
            .write(&StorePath::parse("users/u1/heartbeat"), json!(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscribers_see_overlapping_changes_only() {
        let (_, store) = store();
        let mut sub = store.subscribe(&StorePath::parse("presence/u1"));

        store
            .write(&StorePath::parse("presence/u2/s9"), json!(1))
            .await
            .unwrap();
        store
            .write(&StorePath::parse("presence/u1/s1"), json!(1))
            .await
            .unwrap();

        let change = sub.changed().await.unwrap();
        assert_eq!(change.path, StorePath::parse("presence/u1/s1"));
    }
}
