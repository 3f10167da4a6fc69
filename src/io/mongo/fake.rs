//! In-memory document store for tests.
//!
//! [`InMemoryStore`] keeps databases and collections in process memory, evaluates
//! pipelines with [`eval`](super::eval), and counts every call so tests can assert on
//! what the connector asked the store to do. [`InMemoryConnector`] maps URIs to stores
//! and answers unknown URIs with a connectivity error, like a driver whose server
//! selection timed out.

use super::eval::{matches, run_pipeline};
use super::traits::{DocumentStore, StoreConnector};
use crate::error::{Error, Result};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Collections = BTreeMap<String, Vec<Document>>;

#[derive(Default)]
struct StoreState {
    databases: BTreeMap<String, Collections>,
    next_id: u64,
}

/// Number of calls of each kind an [`InMemoryStore`] has served.
#[derive(Debug, Default)]
pub struct StoreStats {
    list_calls: AtomicUsize,
    estimated_count_calls: AtomicUsize,
    exact_count_calls: AtomicUsize,
    aggregate_calls: AtomicUsize,
    insert_calls: AtomicUsize,
}

/// Point-in-time copy of [`StoreStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub list_calls: usize,
    pub estimated_count_calls: usize,
    pub exact_count_calls: usize,
    pub aggregate_calls: usize,
    pub insert_calls: usize,
}

impl StoreStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            list_calls: self.list_calls.load(Ordering::SeqCst),
            estimated_count_calls: self.estimated_count_calls.load(Ordering::SeqCst),
            exact_count_calls: self.exact_count_calls.load(Ordering::SeqCst),
            aggregate_calls: self.aggregate_calls.load(Ordering::SeqCst),
            insert_calls: self.insert_calls.load(Ordering::SeqCst),
        }
    }
}

/// Shared in-memory store. Clones are handles onto the same data.
#[derive(Clone)]
pub struct InMemoryStore {
    uri: String,
    state: Arc<Mutex<StoreState>>,
    stats: Arc<StoreStats>,
    rejections: Arc<Mutex<Vec<Document>>>,
    unreachable: Arc<AtomicBool>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            state: Arc::new(Mutex::new(StoreState::default())),
            stats: Arc::new(StoreStats::default()),
            rejections: Arc::new(Mutex::new(Vec::new())),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Create an empty collection (and its database).
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn create_collection(&self, database: &str, collection: &str) {
        self.state
            .lock()
            .expect("store mutex poisoned")
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
    }

    /// Insert documents directly, bypassing rejection rules and call statistics.
    ///
    /// Documents without an `_id` get one. Returns the ids in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn seed(&self, database: &str, collection: &str, docs: Vec<Document>) -> Vec<Bson> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let docs = assign_ids(&mut state, docs);
        let ids = docs.iter().filter_map(|d| d.get("_id").cloned()).collect();
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        ids
    }

    /// Every stored document of a collection, in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .expect("store mutex poisoned")
            .databases
            .get(database)
            .and_then(|db| db.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Remove every document from a collection, keeping the collection.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn delete_many(&self, database: &str, collection: &str) {
        if let Some(docs) = self
            .state
            .lock()
            .expect("store mutex poisoned")
            .databases
            .get_mut(database)
            .and_then(|db| db.get_mut(collection))
        {
            docs.clear();
        }
    }

    /// Drop a collection. The database disappears from listings once it has none left.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn drop_collection(&self, database: &str, collection: &str) {
        if let Some(db) = self
            .state
            .lock()
            .expect("store mutex poisoned")
            .databases
            .get_mut(database)
        {
            db.remove(collection);
        }
    }

    /// Make any `insert_many` batch containing a document that matches `filter` fail
    /// without inserting anything.
    ///
    /// # Panics
    ///
    /// Panics if the rejection mutex is poisoned.
    pub fn reject_inserts_where(&self, filter: Document) {
        self.rejections
            .lock()
            .expect("rejections mutex poisoned")
            .push(filter);
    }

    /// Simulate a network partition: every call fails with a connectivity error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::connectivity(&self.uri, "server selection timed out"));
        }
        Ok(())
    }

    fn collection_snapshot(&self, database: &str, collection: &str) -> Vec<Document> {
        self.documents(database, collection)
    }
}

fn assign_ids(state: &mut StoreState, docs: Vec<Document>) -> Vec<Document> {
    docs.into_iter()
        .map(|doc| {
            if doc.contains_key("_id") {
                return doc;
            }
            state.next_id += 1;
            let mut bytes = [0u8; 12];
            bytes[4..].copy_from_slice(&state.next_id.to_be_bytes());
            let mut with_id = Document::new();
            with_id.insert("_id", ObjectId::from_bytes(bytes));
            for (k, v) in doc {
                with_id.insert(k, v);
            }
            with_id
        })
        .collect()
}

impl DocumentStore for InMemoryStore {
    fn list_database_names(&self) -> Result<Vec<String>> {
        self.check_reachable()?;
        StoreStats::bump(&self.stats.list_calls);
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .databases
            .iter()
            .filter(|(_, colls)| !colls.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        self.check_reachable()?;
        StoreStats::bump(&self.stats.list_calls);
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .databases
            .get(database)
            .map(|colls| colls.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn estimated_document_count(&self, database: &str, collection: &str) -> Result<u64> {
        self.check_reachable()?;
        StoreStats::bump(&self.stats.estimated_count_calls);
        let state = self.state.lock().expect("store mutex poisoned");
        let n = state
            .databases
            .get(database)
            .and_then(|db| db.get(collection))
            .map_or(0, Vec::len);
        Ok(n as u64)
    }

    fn count_documents(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Document],
    ) -> Result<u64> {
        self.check_reachable()?;
        StoreStats::bump(&self.stats.exact_count_calls);
        let docs = run_pipeline(self.collection_snapshot(database, collection), pipeline)?;
        Ok(docs.len() as u64)
    }

    fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Document],
    ) -> Result<Vec<Document>> {
        self.check_reachable()?;
        StoreStats::bump(&self.stats.aggregate_calls);
        run_pipeline(self.collection_snapshot(database, collection), pipeline)
    }

    fn insert_many(&self, database: &str, collection: &str, docs: Vec<Document>) -> Result<usize> {
        self.check_reachable()?;
        StoreStats::bump(&self.stats.insert_calls);
        {
            let rules = self.rejections.lock().expect("rejections mutex poisoned");
            for doc in &docs {
                for rule in rules.iter() {
                    if matches(doc, rule)? {
                        return Err(Error::Insert {
                            inserted: 0,
                            message: format!("document rejected by rule {rule}"),
                        });
                    }
                }
            }
        }

        let mut state = self.state.lock().expect("store mutex poisoned");
        let docs = assign_ids(&mut state, docs);
        let coll = state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        let mut seen: HashSet<String> = coll
            .iter()
            .filter_map(|d| d.get("_id").map(ToString::to_string))
            .collect();
        for doc in &docs {
            if let Some(id) = doc.get("_id")
                && !seen.insert(id.to_string())
            {
                return Err(Error::Insert {
                    inserted: 0,
                    message: format!("E11000 duplicate key error: _id {id}"),
                });
            }
        }
        let n = docs.len();
        coll.extend(docs);
        Ok(n)
    }
}

/// Resolves URIs to registered [`InMemoryStore`]s.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    stores: HashMap<String, InMemoryStore>,
    connects: Arc<AtomicUsize>,
}

impl InMemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(mut self, store: InMemoryStore) -> Self {
        self.stores.insert(store.uri().to_string(), store);
        self
    }

    /// Number of connections opened so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl StoreConnector for InMemoryConnector {
    fn connect(&self, uri: &str) -> Result<Arc<dyn DocumentStore>> {
        let store = self
            .stores
            .get(uri)
            .ok_or_else(|| Error::connectivity(uri, "server selection timed out"))?;
        store.check_reachable()?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(store.clone()))
    }
}
