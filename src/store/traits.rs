//! Repository trait, the single persistence seam for messages and orders.
//!
//! Every entity lives behind its own async mutex. Holding an entity's
//! handle lock serializes all writes to that entity while leaving other
//! entities free.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;

/// Shared, individually locked entity.
pub type Handle<T> = Arc<Mutex<T>>;

/// Something a repository can key by id.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: &'static str;
    fn id(&self) -> Uuid;
}

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Insert a new entity. Fails if the id is taken.
    async fn insert(&self, entity: T) -> Result<Handle<T>, StoreError>;

    /// Handle for one entity.
    async fn get(&self, id: Uuid) -> Option<Handle<T>>;

    /// Handles for every entity, in insertion order. The collection lock is
    /// released before this returns; callers lock entities one at a time.
    async fn handles(&self) -> Vec<Handle<T>>;

    /// Point-in-time copy of one entity.
    async fn snapshot(&self, id: Uuid) -> Option<T> {
        let handle = self.get(id).await?;
        let entity = handle.lock().await;
        Some(entity.clone())
    }

    async fn count(&self) -> usize {
        self.handles().await.len()
    }
}
