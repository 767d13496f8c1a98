//! Process-wide map from document key to session.
//!
//! ```text
//!  SessionRegistry ── SessionStore (in-memory today)
//!        │
//!        └── Session (per key, never evicted)
//!              ├── DocumentState    (CRDT)
//!              ├── CredentialStore  (password, set once)
//!              └── MembershipSet    (members + BroadcastRelay)
//! ```
//!
//! A session is created on first reference and reused by every later
//! join of the same key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::credential::{Argon2Hasher, CredentialHasher, CredentialStore};
use crate::document::{DocumentState, YrsDocument};
use crate::key::DocumentKey;
use crate::membership::MembershipSet;

/// Builds a fresh, empty CRDT document for a new session.
pub type DocumentFactory = Arc<dyn Fn() -> Box<dyn DocumentState> + Send + Sync>;

/// Server-side record of one document.
pub struct Session {
    key: DocumentKey,
    document: Box<dyn DocumentState>,
    credentials: CredentialStore,
    members: MembershipSet,
}

impl Session {
    pub fn new(
        key: DocumentKey,
        document: Box<dyn DocumentState>,
        credentials: CredentialStore,
        members: MembershipSet,
    ) -> Self {
        Self {
            key,
            document,
            credentials,
            members,
        }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn document(&self) -> &dyn DocumentState {
        self.document.as_ref()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn members(&self) -> &MembershipSet {
        &self.members
    }
}

/// Backing store for sessions.
///
/// `get_or_insert_with` must be atomic: for a given key exactly one
/// caller ever sees `created == true`.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &DocumentKey) -> Option<Arc<Session>>;

    fn get_or_insert_with(
        &self,
        key: DocumentKey,
        init: Box<dyn FnOnce() -> Session + '_>,
    ) -> (Arc<Session>, bool);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keys(&self) -> Vec<DocumentKey>;
}

/// Memory-resident store; sessions live until the process exits.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<DocumentKey, Arc<Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, key: &DocumentKey) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    fn get_or_insert_with(
        &self,
        key: DocumentKey,
        init: Box<dyn FnOnce() -> Session + '_>,
    ) -> (Arc<Session>, bool) {
        // The entry holds the shard lock until the insert completes
        match self.sessions.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let session = Arc::new(init());
                entry.insert(session.clone());
                (session, true)
            }
        }
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn keys(&self) -> Vec<DocumentKey> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Creates and looks up sessions.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    hasher: Arc<dyn CredentialHasher>,
    documents: DocumentFactory,
    broadcast_capacity: usize,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        hasher: Arc<dyn CredentialHasher>,
        documents: DocumentFactory,
        broadcast_capacity: usize,
    ) -> Self {
        Self {
            store,
            hasher,
            documents,
            broadcast_capacity,
        }
    }

    /// In-memory store, Argon2 credentials, Yrs documents.
    pub fn in_memory(broadcast_capacity: usize) -> Self {
        Self::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(Argon2Hasher::default()),
            Arc::new(YrsDocument::boxed),
            broadcast_capacity,
        )
    }

    /// Same as [`in_memory`](Self::in_memory) with a custom hasher.
    pub fn with_hasher(hasher: Arc<dyn CredentialHasher>, broadcast_capacity: usize) -> Self {
        Self::new(
            Arc::new(InMemorySessionStore::new()),
            hasher,
            Arc::new(YrsDocument::boxed),
            broadcast_capacity,
        )
    }

    /// Pure lookup.
    pub fn get_session(&self, key: &DocumentKey) -> Option<Arc<Session>> {
        self.store.get(key)
    }

    /// Existing session for `key`, or a new empty one.
    pub fn ensure_session(&self, key: &DocumentKey) -> (Arc<Session>, bool) {
        let (session, created) = self.store.get_or_insert_with(
            key.clone(),
            Box::new(|| {
                Session::new(
                    key.clone(),
                    (self.documents)(),
                    CredentialStore::new(self.hasher.clone()),
                    MembershipSet::new(self.broadcast_capacity),
                )
            }),
        );
        if created {
            log::info!("Created session for document '{key}'");
        }
        (session, created)
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    pub fn document_keys(&self) -> Vec<DocumentKey> {
        self.store.keys()
    }
}
