//! In-process document store with push subscriptions.
//!
//! Mirrors the semantics the session relies on: `replace` keeps
//! sub-collections, `delete` is recursive, subscriptions open with the
//! current state. Also exposes hooks to replay notifications and inject
//! delete failures, which is how redelivery and flaky teardown are exercised.

use crate::error::StoreError;
use crate::signaling::{AddedEntry, DocumentSnapshot, Fields, SignalingChannel, Subscription};
use crate::utils::random_id;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Journal entry of a write accepted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Replace { doc_id: String },
    Update { doc_id: String, field: String },
    Delete { doc_id: String },
    Append { doc_id: String, subcollection: String },
}

#[derive(Default)]
struct StoredDocument {
    fields: Option<Fields>,
    subcollections: HashMap<String, Vec<AddedEntry>>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, StoredDocument>,
    doc_watchers: HashMap<String, Vec<mpsc::UnboundedSender<DocumentSnapshot>>>,
    entry_watchers: HashMap<(String, String), Vec<mpsc::UnboundedSender<AddedEntry>>>,
    journal: Vec<StoreOp>,
    failing_deletes: u32,
}

impl Inner {
    fn snapshot(&self, doc_id: &str) -> DocumentSnapshot {
        DocumentSnapshot {
            doc_id: doc_id.to_string(),
            fields: self.docs.get(doc_id).and_then(|d| d.fields.clone()),
        }
    }

    fn notify_document(&mut self, doc_id: &str) {
        let snapshot = self.snapshot(doc_id);
        if let Some(watchers) = self.doc_watchers.get_mut(doc_id) {
            watchers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }

    fn notify_entry(&mut self, doc_id: &str, subcollection: &str, entry: &AddedEntry) {
        let key = (doc_id.to_string(), subcollection.to_string());
        if let Some(watchers) = self.entry_watchers.get_mut(&key) {
            watchers.retain(|tx| tx.send(entry.clone()).is_ok());
        }
    }
}

/// Cheap to clone; clones share the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current fields of a document, `None` if absent.
    pub fn document(&self, doc_id: &str) -> Option<Fields> {
        self.inner.lock().snapshot(doc_id).fields
    }

    /// Entries of a sub-collection in append order.
    pub fn entries(&self, doc_id: &str, subcollection: &str) -> Vec<Fields> {
        let inner = self.inner.lock();
        inner
            .docs
            .get(doc_id)
            .and_then(|d| d.subcollections.get(subcollection))
            .map(|entries| entries.iter().map(|e| e.fields.clone()).collect())
            .unwrap_or_default()
    }

    /// Every accepted write so far.
    pub fn journal(&self) -> Vec<StoreOp> {
        self.inner.lock().journal.clone()
    }

    /// Sends the current snapshot again to every document subscriber.
    pub fn redeliver(&self, doc_id: &str) {
        self.inner.lock().notify_document(doc_id);
    }

    /// Makes the next `count` deletes fail with `Unavailable`.
    pub fn fail_next_deletes(&self, count: u32) {
        self.inner.lock().failing_deletes = count;
    }

    /// Live document subscriptions for `doc_id`.
    pub fn document_watchers(&self, doc_id: &str) -> usize {
        let mut inner = self.inner.lock();
        match inner.doc_watchers.get_mut(doc_id) {
            Some(watchers) => {
                watchers.retain(|tx| !tx.is_closed());
                watchers.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl SignalingChannel for MemoryStore {
    async fn replace(&self, doc_id: &str, fields: Fields) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.docs.entry(doc_id.to_string()).or_default().fields = Some(fields);
        inner.journal.push(StoreOp::Replace {
            doc_id: doc_id.to_string(),
        });
        trace!("replace {doc_id}");
        inner.notify_document(doc_id);
        Ok(())
    }

    async fn update(&self, doc_id: &str, field: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let fields = inner
            .docs
            .get_mut(doc_id)
            .and_then(|d| d.fields.as_mut())
            .ok_or_else(|| StoreError::NotFound(doc_id.to_string()))?;
        fields.insert(field.to_string(), value);
        inner.journal.push(StoreOp::Update {
            doc_id: doc_id.to_string(),
            field: field.to_string(),
        });
        trace!("update {doc_id}.{field}");
        inner.notify_document(doc_id);
        Ok(())
    }

    async fn delete(&self, doc_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing_deletes > 0 {
            inner.failing_deletes -= 1;
            return Err(StoreError::Unavailable(format!("delete of {doc_id} refused")));
        }
        let existed = inner.docs.remove(doc_id).is_some();
        inner.journal.push(StoreOp::Delete {
            doc_id: doc_id.to_string(),
        });
        trace!("delete {doc_id} (existed: {existed})");
        if existed {
            inner.notify_document(doc_id);
        }
        Ok(())
    }

    async fn append(
        &self,
        doc_id: &str,
        subcollection: &str,
        fields: Fields,
    ) -> Result<String, StoreError> {
        let entry = AddedEntry {
            entry_id: random_id(),
            fields,
        };
        let mut inner = self.inner.lock();
        inner
            .docs
            .entry(doc_id.to_string())
            .or_default()
            .subcollections
            .entry(subcollection.to_string())
            .or_default()
            .push(entry.clone());
        inner.journal.push(StoreOp::Append {
            doc_id: doc_id.to_string(),
            subcollection: subcollection.to_string(),
        });
        trace!("append {doc_id}/{subcollection}/{}", entry.entry_id);
        inner.notify_entry(doc_id, subcollection, &entry);
        Ok(entry.entry_id)
    }

    async fn subscribe_document(
        &self,
        doc_id: &str,
    ) -> Result<Subscription<DocumentSnapshot>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let _ = tx.send(inner.snapshot(doc_id));
        inner
            .doc_watchers
            .entry(doc_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn subscribe_collection(
        &self,
        doc_id: &str,
        subcollection: &str,
    ) -> Result<Subscription<AddedEntry>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let existing = inner
            .docs
            .get(doc_id)
            .and_then(|d| d.subcollections.get(subcollection))
            .cloned()
            .unwrap_or_default();
        for entry in existing {
            let _ = tx.send(entry);
        }
        inner
            .entry_watchers
            .entry((doc_id.to_string(), subcollection.to_string()))
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn replace_keeps_subcollections_and_delete_removes_them() {
        let store = MemoryStore::new();
        store.replace("calls/a", fields(json!({"status": "waiting"}))).await.unwrap();
        store
            .append("calls/a", "callerCandidates", fields(json!({"candidate": "c"})))
            .await
            .unwrap();

        store.replace("calls/a", fields(json!({"status": "waiting"}))).await.unwrap();
        assert_eq!(store.entries("calls/a", "callerCandidates").len(), 1);

        store.delete("calls/a").await.unwrap();
        assert!(store.document("calls/a").is_none());
        assert!(store.entries("calls/a", "callerCandidates").is_empty());
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let store = MemoryStore::new();
        let err = store
            .update("calls/missing", "status", json!("connected"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("calls/missing".into()));
    }

    #[tokio::test]
    async fn document_subscription_opens_with_current_state() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe_document("calls/a").await.unwrap();
        assert!(!sub.recv().await.unwrap().exists());

        store.replace("calls/a", fields(json!({"status": "waiting"}))).await.unwrap();
        let snapshot = sub.recv().await.unwrap();
        assert_eq!(snapshot.fields.unwrap()["status"], json!("waiting"));

        store.redeliver("calls/a");
        assert!(sub.recv().await.unwrap().exists());

        store.delete("calls/a").await.unwrap();
        assert!(!sub.recv().await.unwrap().exists());
    }

    #[tokio::test]
    async fn collection_subscription_replays_existing_entries() {
        let store = MemoryStore::new();
        store
            .append("calls/a", "calleeCandidates", fields(json!({"candidate": "first"})))
            .await
            .unwrap();

        let mut sub = store.subscribe_collection("calls/a", "calleeCandidates").await.unwrap();
        assert_eq!(sub.recv().await.unwrap().fields["candidate"], json!("first"));

        store
            .append("calls/a", "calleeCandidates", fields(json!({"candidate": "second"})))
            .await
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().fields["candidate"], json!("second"));
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let store = MemoryStore::new();
        let sub = store.subscribe_document("calls/a").await.unwrap();
        assert_eq!(store.document_watchers("calls/a"), 1);
        drop(sub);
        assert_eq!(store.document_watchers("calls/a"), 0);
    }

    #[tokio::test]
    async fn injected_delete_failures() {
        let store = MemoryStore::new();
        store.replace("calls/a", Fields::new()).await.unwrap();
        store.fail_next_deletes(1);

        assert!(store.delete("calls/a").await.is_err());
        assert!(store.document("calls/a").is_some());
        assert!(store.delete("calls/a").await.is_ok());
        assert!(store.document("calls/a").is_none());
    }
}
