//! EphemeralStore port - 低遅延の key/value ツリー（realtime buffer）
//!
//! The fast store holds in-flight task buffers, timer state, heartbeats, presence
//! sessions and room broadcasts. It is *not* the system of record.
//!
//! # 設計原則
//! - 値は JSON（serde_json::Value）で、パスはスラッシュ区切り
//! - `update` は部分更新（存在しなければ作成）、`write(Null)` は削除と同じ
//! - `subscribe` は購読で、戻り値の `Subscription` を drop すると購読解除
//! - TTL 付き書き込みで、クライアントが生き残らなくても一時イベントが消える

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::domain::StoreError;

/// Slash-separated location in the ephemeral tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// A change at one path is visible at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Something changed at `path`; subscribers re-read what they care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub path: StorePath,
}

/// Live subscription to a subtree. Dropping it unsubscribes.
pub struct Subscription {
    prefix: StorePath,
    rx: broadcast::Receiver<StoreChange>,
}

impl Subscription {
    pub fn new(prefix: StorePath, rx: broadcast::Receiver<StoreChange>) -> Self {
        Self { prefix, rx }
    }

    pub fn prefix(&self) -> &StorePath {
        &self.prefix
    }

    /// Next change overlapping the subscribed subtree, `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.path.overlaps(&self.prefix) => return Some(change),
                Ok(_) => continue,
                // missed some: report the whole subtree as changed
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    return Some(StoreChange {
                        path: self.prefix.clone(),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Write a value the store deletes by itself once `ttl` has passed.
    async fn write_with_ttl(
        &self,
        path: &StorePath,
        value: Value,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Merge `fields` into the object at `path` (creating it if absent).
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Deleting a missing path succeeds.
    async fn delete(&self, path: &StorePath) -> Result<(), StoreError>;

    fn subscribe(&self, path: &StorePath) -> Subscription;
}

pub async fn read_as<T: DeserializeOwned>(
    store: &dyn EphemeralStore,
    path: &StorePath,
) -> Result<Option<T>, StoreError> {
    let Some(value) = store.read(path).await? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            path: path.to_string(),
            source,
        })
}

pub async fn write_as<T: Serialize + Sync + ?Sized>(
    store: &dyn EphemeralStore,
    path: &StorePath,
    value: &T,
) -> Result<(), StoreError> {
    let value = encode(path, value)?;
    store.write(path, value).await
}

/// Decode every child of `path`. Children that fail to decode are skipped.
pub async fn read_children<T: DeserializeOwned>(
    store: &dyn EphemeralStore,
    path: &StorePath,
) -> Result<Vec<(String, T)>, StoreError> {
    let Some(value) = store.read(path).await? else {
        return Ok(Vec::new());
    };
    let Value::Object(children) = value else {
        return Err(StoreError::NotAnObject(path.to_string()));
    };
    let mut decoded = Vec::with_capacity(children.len());
    for (key, child) in children {
        match serde_json::from_value(child) {
            Ok(v) => decoded.push((key, v)),
            Err(e) => {
                tracing::warn!(path = %path.child(key.as_str()), error = %e, "skipping undecodable child");
            }
        }
    }
    Ok(decoded)
}

/// Encode a serializable value for `path`.
pub fn encode<T: Serialize + ?Sized>(path: &StorePath, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Encode {
        path: path.to_string(),
        source,
    })
}

/// Field map for `update` from a `json!({...})` literal; non-objects give no fields.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_parsing_and_display() {
        let p = StorePath::parse("/users/u1//tasks/");
        assert_eq!(p.segments().len(), 3);
        assert_eq!(p.segments()[1], "u1");
        assert_eq!(p.to_string(), "/users/u1/tasks");
        assert_eq!(StorePath::root().to_string(), "/");
    }

    #[test]
    fn containment_and_overlap() {
        let user = StorePath::parse("users/u1");
        let task = user.child("tasks").child("t1");
        assert!(user.contains(&task));
        assert!(!task.contains(&user));
        assert!(task.overlaps(&user));
        assert!(!task.overlaps(&StorePath::parse("users/u2")));
        assert_eq!(task.parent().and_then(|p| p.last().map(str::to_string)), Some("tasks".into()));
        assert_eq!(StorePath::root().parent(), None);
    }

    #[test]
    fn fields_from_json_literal() {
        let map = fields(serde_json::json!({"status": "paused", "time_spent": 10}));
        assert_eq!(map.len(), 2);
        assert!(fields(serde_json::json!(3)).is_empty());
    }
}
