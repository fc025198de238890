//! Signaling channel over a shared document store
//!
//! The store is the only medium between the device and the viewer. It
//! offers whole-document replace, single-field update, recursive delete,
//! append into a sub-collection, and push subscriptions on a document or a
//! sub-collection. Deliveries are at-least-once and may repeat.

pub mod document;
pub mod memory;

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use document::{SessionStatus, CALLEE_CANDIDATES, CALLER_CANDIDATES};
pub use memory::{MemoryStore, StoreOp};

/// Field map of one document or collection entry.
pub type Fields = serde_json::Map<String, Value>;

/// A push subscription. Dropping the receiver unsubscribes.
pub type Subscription<T> = mpsc::UnboundedReceiver<T>;

/// State of a document at notification time; `fields` is `None` once deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub doc_id: String,
    pub fields: Option<Fields>,
}

impl DocumentSnapshot {
    pub fn exists(&self) -> bool {
        self.fields.is_some()
    }
}

/// One entry appended to a sub-collection.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedEntry {
    pub entry_id: String,
    pub fields: Fields,
}

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Overwrites every field of the document. Sub-collections are untouched.
    async fn replace(&self, doc_id: &str, fields: Fields) -> Result<(), StoreError>;

    /// Sets one field of an existing document.
    async fn update(&self, doc_id: &str, field: &str, value: Value) -> Result<(), StoreError>;

    /// Deletes the document and its known sub-collections. Deleting a
    /// missing document succeeds.
    async fn delete(&self, doc_id: &str) -> Result<(), StoreError>;

    /// Appends an entry and returns its generated id.
    async fn append(
        &self,
        doc_id: &str,
        subcollection: &str,
        fields: Fields,
    ) -> Result<String, StoreError>;

    /// Emits the current snapshot first, then one per change.
    async fn subscribe_document(
        &self,
        doc_id: &str,
    ) -> Result<Subscription<DocumentSnapshot>, StoreError>;

    /// Emits every existing entry first, then each new one.
    async fn subscribe_collection(
        &self,
        doc_id: &str,
        subcollection: &str,
    ) -> Result<Subscription<AddedEntry>, StoreError>;
}
