//! Opaque CRDT document state.
//!
//! The coordinator only ever needs two operations from the CRDT: merge a
//! remote update and encode the full state. [`DocumentState`] is that
//! capability; [`YrsDocument`] backs it with a Yrs `Doc`.

use std::sync::Mutex;
use yrs::updates::decoder::Decode;
use yrs::{ReadTxn, StateVector, Transact, Update};

/// Failure merging a remote update.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeError {
    #[error("update could not be decoded: {0}")]
    Decode(String),
    #[error("update could not be applied: {0}")]
    Apply(String),
}

/// Minimal CRDT capability the session coordinator depends on.
pub trait DocumentState: Send + Sync {
    /// Merge an update produced by a remote replica.
    fn apply_remote(&self, update: &[u8]) -> Result<(), MergeError>;

    /// Full-state encoding, enough to bootstrap a replica from nothing.
    fn snapshot(&self) -> Vec<u8>;
}

/// Yrs-backed document (v1 update encoding).
pub struct YrsDocument {
    doc: Mutex<yrs::Doc>,
}

impl YrsDocument {
    pub fn new() -> Self {
        Self {
            doc: Mutex::new(yrs::Doc::new()),
        }
    }

    /// Boxed constructor for use as a session document factory.
    pub fn boxed() -> Box<dyn DocumentState> {
        Box::new(Self::new())
    }

    fn with_doc<R>(&self, f: impl FnOnce(&yrs::Doc) -> R) -> R {
        // A panic inside a transaction leaves the Doc itself consistent
        let doc = self.doc.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&doc)
    }
}

impl Default for YrsDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentState for YrsDocument {
    fn apply_remote(&self, update: &[u8]) -> Result<(), MergeError> {
        let update = Update::decode_v1(update).map_err(|e| MergeError::Decode(e.to_string()))?;
        self.with_doc(|doc| {
            let mut txn = doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| MergeError::Apply(e.to_string()))
        })
    }

    fn snapshot(&self) -> Vec<u8> {
        self.with_doc(|doc| {
            let txn = doc.transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        })
    }
}
