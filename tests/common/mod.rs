//! Common utilities for Anubis integration tests.
#![allow(dead_code)]

use ahash::AHashMap as HashMap;
use anubis::{
    errors::{AnubisError, Result},
    storage::{Storage, StorageMutation},
    Anubis, AnubisConfig, Entity, LockManager, Name,
};
use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// --- MockStorage ---

/// An in-memory `Storage` that can be told to fail.
#[derive(Debug, Default)]
pub struct MockStorage {
    data: Mutex<HashMap<(Name, String), RecordBatch>>,
    fail: AtomicBool,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves a record from the mock storage.
    pub fn get(&self, entity: &Name, key: &str) -> Option<RecordBatch> {
        self.data.lock().get(&(entity.clone(), key.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Makes every following `apply_mutations` call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Storage for MockStorage {
    fn apply_mutations(&self, mutations: Vec<StorageMutation>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AnubisError::StorageError("disk on fire".to_string()));
        }
        let mut data = self.data.lock();
        for mutation in mutations {
            match mutation {
                StorageMutation::Insert(entity, key, record_batch) => {
                    data.insert((entity, key), record_batch);
                }
                StorageMutation::Delete(entity, key) => {
                    data.remove(&(entity, key));
                }
            }
        }
        Ok(())
    }
}

// --- Helper Functions ---

/// Helper function to create an Anubis instance with the default configuration.
pub fn setup_anubis() -> Arc<Anubis> {
    Arc::new(Anubis::new(AnubisConfig::default()))
}

/// Helper function to create a lock manager over plain string resources.
pub fn setup_lock_manager(shared_waits_for_exclusive: bool) -> Arc<LockManager<&'static str>> {
    let config = AnubisConfig {
        shared_waits_for_exclusive,
        ..AnubisConfig::default()
    };
    Arc::new(LockManager::with_config(&config))
}

/// Helper function to create an entity named `warren.<name>` backed by `storage`.
pub fn create_entity(name: &str, storage: Arc<MockStorage>) -> Arc<Entity> {
    Entity::new(Name::entity("warren", name), create_test_schema(), storage)
}

/// Helper function to create a simple schema.
pub fn create_test_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("value", DataType::Utf8, true),
    ]))
}

/// Helper function to create a RecordBatch.
pub fn create_record_batch(ids: Vec<i64>, values: Vec<Option<&str>>) -> RecordBatch {
    let schema = create_test_schema();
    RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(values)),
        ],
    )
    .unwrap()
}

/// Polls `condition` until it holds, panicking after five seconds.
pub fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting until {}", what);
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Waits until `count` requests are parked on the lock for `resource`.
pub fn wait_for_waiters<T>(manager: &LockManager<T>, resource: &T, count: usize)
where
    T: Clone + Eq + std::hash::Hash + std::fmt::Debug,
{
    wait_until(&format!("{} waiters on {:?}", count, resource), || {
        manager
            .get(resource)
            .is_some_and(|lock| lock.waiting() == count)
    });
}
