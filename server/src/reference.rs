//! Reference counting.
//!
//! Pinned blocks carry a positive reference count; unpinned writes
//! live in the cache set instead. A key is never in both at once.
//! Same-key mutations serialize on a stripe of async locks so that
//! check-then-act sequences (create-on-first-pin, GC's check-and-
//! delete) are safe without a global lock.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::ActiveValue::Set;
use sea_orm::DatabaseConnection;
use tokio::sync::{Mutex, MutexGuard};

use crate::database::entity::cache_entry::{self, Entity as CacheEntry};
use crate::database::entity::refcount::{self, Entity as RefCount};
use crate::error::{ServerError, ServerResult};

/// Number of per-key lock stripes.
const LOCK_STRIPES: usize = 256;

/// The per-key pin counter.
#[derive(Debug)]
pub struct RefCounter {
    db: DatabaseConnection,
    stripes: Vec<Mutex<()>>,
}

impl RefCounter {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Acquires the stripe lock covering `key`.
    ///
    /// Other keys hashing to the same stripe serialize too; that is
    /// acceptable because the critical sections are short.
    pub async fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % LOCK_STRIPES;
        self.stripes[stripe].lock().await
    }

    /// Atomically increments the count for `key`.
    ///
    /// When the prior count was zero or absent, `create` runs exactly
    /// once while the per-key lock is held; if it fails, nothing is
    /// recorded and the error is returned. A key promoted out of the
    /// cache set loses its membership there.
    pub async fn incr_or_create<F, Fut>(&self, key: &str, create: F) -> ServerResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServerResult<()>>,
    {
        let _guard = self.lock_key(key).await;

        let existing = RefCount::find_by_id(key).one(&self.db).await?;

        match existing {
            Some(row) => {
                let mut model: refcount::ActiveModel = row.clone().into();
                model.count = Set(row.count + 1);
                model.update(&self.db).await?;
            }
            None => {
                create().await?;

                let model = refcount::ActiveModel {
                    key: Set(key.to_string()),
                    count: Set(1),
                };
                RefCount::insert(model).exec(&self.db).await?;

                // Pinning supersedes cache membership.
                CacheEntry::delete_by_id(key).exec(&self.db).await?;
            }
        }

        Ok(())
    }

    /// Atomically decrements the count for `key`.
    ///
    /// Reaching zero removes the entry entirely; the key is *not*
    /// moved to the cache set, so it becomes eligible for collection.
    pub async fn decr(&self, key: &str) -> ServerResult<()> {
        let _guard = self.lock_key(key).await;

        let row = RefCount::find_by_id(key)
            .one(&self.db)
            .await?
            .ok_or(ServerError::NoSuchBlock)?;

        if row.count <= 1 {
            RefCount::delete_by_id(key).exec(&self.db).await?;
        } else {
            let mut model: refcount::ActiveModel = row.clone().into();
            model.count = Set(row.count - 1);
            model.update(&self.db).await?;
        }

        Ok(())
    }

    /// True iff the count is positive.
    pub async fn has(&self, key: &str) -> ServerResult<bool> {
        Ok(RefCount::find_by_id(key).one(&self.db).await?.is_some())
    }

    /// The persisted count, if any.
    pub async fn count(&self, key: &str) -> ServerResult<Option<i64>> {
        Ok(RefCount::find_by_id(key)
            .one(&self.db)
            .await?
            .map(|row| row.count))
    }
}

/// The set of blocks stored without a pin.
#[derive(Debug, Clone)]
pub struct CacheSet {
    db: DatabaseConnection,
}

impl CacheSet {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn add(&self, key: &str) -> ServerResult<()> {
        let model = cache_entry::ActiveModel {
            key: Set(key.to_string()),
            created_at: Set(Utc::now()),
        };

        CacheEntry::insert(model)
            .on_conflict(
                OnConflict::column(cache_entry::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .do_nothing()
            .exec(&self.db)
            .await?;

        Ok(())
    }

    pub async fn has(&self, key: &str) -> ServerResult<bool> {
        Ok(CacheEntry::find_by_id(key).one(&self.db).await?.is_some())
    }

    pub async fn remove(&self, key: &str) -> ServerResult<()> {
        CacheEntry::delete_by_id(key).exec(&self.db).await?;
        Ok(())
    }

    /// Snapshot of every member key.
    pub async fn iter(&self) -> ServerResult<Vec<String>> {
        Ok(CacheEntry::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| row.key)
            .collect())
    }
}
