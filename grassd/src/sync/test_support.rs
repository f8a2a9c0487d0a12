//! In-memory [`RemoteStore`] with fault injection for sync tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use grass_core::{CloudError, Session};
use reqwest::StatusCode;
use serde_json::{Map, Value};

use crate::remote::{RemoteError, RemoteStore};
use crate::sync::transfer::TransferError;

const URL_SCHEME: &str = "mem://";

#[derive(Default)]
pub struct MemoryRemote {
    tree: Mutex<Value>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    put_log: Mutex<Vec<String>>,
    offline_calls: AtomicU32,
    failed_calls: AtomicU32,
    downloads: AtomicU32,
    fail_fetches: AtomicBool,
    read_delay: Mutex<Duration>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Value::Object(Map::new())),
            ..Self::default()
        }
    }

    /// Fails the next `calls` remote calls with a connectivity error.
    pub fn go_offline(&self, calls: u32) {
        self.offline_calls.store(calls, Ordering::SeqCst);
    }

    pub fn go_online(&self) {
        self.offline_calls.store(0, Ordering::SeqCst);
    }

    /// Makes reads return a snapshot taken before sleeping for `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    /// Makes every blob download fail with a connectivity error while the
    /// rest of the remote stays reachable.
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn failed_calls(&self) -> u32 {
        self.failed_calls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> u32 {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn blob(&self, object_key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(object_key).cloned()
    }

    pub fn blob_put_log(&self) -> Vec<String> {
        self.put_log.lock().unwrap().clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let tree = self.tree.lock().unwrap();
        lookup(&tree, key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut tree = self.tree.lock().unwrap();
        store(&mut tree, key, value);
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        let remaining = self.offline_calls.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        if remaining != u32::MAX {
            self.offline_calls.store(remaining - 1, Ordering::SeqCst);
        }
        self.failed_calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::Unreachable("memory remote is offline".into()))
    }
}

fn not_found(what: &str) -> RemoteError {
    RemoteError::Cloud(CloudError::Api {
        status: StatusCode::NOT_FOUND,
        body: format!("{what} not found"),
    })
}

fn segments(key: &str) -> impl Iterator<Item = &str> {
    key.split('/').filter(|s| !s.is_empty())
}

fn lookup<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    let mut node = tree;
    for segment in segments(key) {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

fn store(tree: &mut Value, key: &str, value: Value) {
    if value.is_null() {
        remove(tree, &segments(key).collect::<Vec<_>>());
        return;
    }
    let mut node = tree;
    for segment in segments(key) {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .expect("node was just made an object")
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    *node = value;
}

/// Removes the key and prunes parents left empty, like the real store.
fn remove(node: &mut Value, path: &[&str]) {
    let Some((head, rest)) = path.split_first() else {
        *node = Value::Object(Map::new());
        return;
    };
    let Some(object) = node.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        object.remove(*head);
    } else if let Some(child) = object.get_mut(*head) {
        remove(child, rest);
        if child.as_object().is_some_and(Map::is_empty) {
            object.remove(*head);
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn read(&self, _session: &Session, key: &str) -> Result<Option<Value>, RemoteError> {
        self.check_online()?;
        let snapshot = self.get(key);
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot.filter(|value| !value.is_null()))
    }

    async fn write(&self, _session: &Session, key: &str, value: &Value) -> Result<(), RemoteError> {
        self.check_online()?;
        self.set(key, value.clone());
        Ok(())
    }

    async fn update(
        &self,
        _session: &Session,
        key: &str,
        value: &Value,
    ) -> Result<(), RemoteError> {
        self.check_online()?;
        let mut tree = self.tree.lock().unwrap();
        if let Some(children) = value.as_object() {
            for (child, child_value) in children {
                store(&mut tree, &format!("{key}/{child}"), child_value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, _session: &Session, key: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        self.set(key, Value::Null);
        Ok(())
    }

    async fn blob_put(
        &self,
        _session: &Session,
        object_key: &str,
        source: &Path,
    ) -> Result<(), RemoteError> {
        self.check_online()?;
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|err| RemoteError::Transfer(TransferError::Io(err)))?;
        self.blobs
            .lock()
            .unwrap()
            .insert(object_key.to_string(), bytes);
        self.put_log.lock().unwrap().push(object_key.to_string());
        Ok(())
    }

    async fn blob_url(&self, _session: &Session, object_key: &str) -> Result<String, RemoteError> {
        self.check_online()?;
        if !self.blobs.lock().unwrap().contains_key(object_key) {
            return Err(not_found(object_key));
        }
        Ok(format!("{URL_SCHEME}{object_key}"))
    }

    async fn blob_fetch(&self, url: &str, target: &Path) -> Result<(), RemoteError> {
        self.check_online()?;
        if self.fail_fetches.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err(RemoteError::Unreachable("download interrupted".into()));
        }
        let object_key = url.strip_prefix(URL_SCHEME).unwrap_or(url);
        let bytes = self.blob(object_key).ok_or_else(|| not_found(object_key))?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| RemoteError::Transfer(TransferError::Io(err)))?;
        }
        tokio::fs::write(target, bytes)
            .await
            .map_err(|err| RemoteError::Transfer(TransferError::Io(err)))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn blob_delete(&self, _session: &Session, object_key: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        self.blobs
            .lock()
            .unwrap()
            .remove(object_key)
            .map(|_| ())
            .ok_or_else(|| not_found(object_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delete_prunes_empty_parents() {
        let remote = MemoryRemote::new();
        remote.set("locks/u1/k/h1", json!("read"));
        remote.set("locks/u1/other/h2", json!("write"));
        remote.set("locks/u1/k/h1", Value::Null);

        assert!(remote.get("locks/u1/k").is_none());
        assert_eq!(remote.get("locks/u1/other/h2"), Some(json!("write")));
    }
}
