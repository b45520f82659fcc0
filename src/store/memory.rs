//! In-memory repository backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::traits::{Entity, Handle, Repository};
use crate::error::StoreError;
use crate::orders::model::Order;
use crate::pipeline::types::InboundMessage;

impl Entity for InboundMessage {
    const KIND: &'static str = "message";
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Order {
    const KIND: &'static str = "order";
    fn id(&self) -> Uuid {
        self.id
    }
}

struct Inner<T> {
    by_id: HashMap<Uuid, Handle<T>>,
    order: Vec<Uuid>,
}

/// Map of per-entity mutexes. The outer lock is held only long enough to
/// look up or insert a handle.
pub struct MemoryRepository<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: Entity> MemoryRepository<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                order: Vec::new(),
            }),
        })
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MemoryRepository<T> {
    async fn insert(&self, entity: T) -> Result<Handle<T>, StoreError> {
        let id = entity.id();
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&id) {
            return Err(StoreError::Duplicate { entity: T::KIND, id });
        }
        let handle = Arc::new(Mutex::new(entity));
        inner.by_id.insert(id, Arc::clone(&handle));
        inner.order.push(id);
        Ok(handle)
    }

    async fn get(&self, id: Uuid) -> Option<Handle<T>> {
        self.inner.read().await.by_id.get(&id).cloned()
    }

    async fn handles(&self) -> Vec<Handle<T>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::orders::model::{LineItem, NewOrder};

    fn order() -> Order {
        Order::new(
            NewOrder {
                customer: "ACME".into(),
                line_items: vec![LineItem::new("A-1", 1)],
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn insert_get_and_snapshot() {
        let repo = MemoryRepository::<Order>::new();
        let o = order();
        let id = o.id;
        repo.insert(o).await.unwrap();

        assert!(repo.get(id).await.is_some());
        assert_eq!(repo.snapshot(id).await.unwrap().id, id);
        assert!(repo.get(Uuid::new_v4()).await.is_none());
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let repo = MemoryRepository::<Order>::new();
        let o = order();
        repo.insert(o.clone()).await.unwrap();
        assert!(matches!(
            repo.insert(o).await,
            Err(StoreError::Duplicate { entity: "order", .. })
        ));
    }

    #[tokio::test]
    async fn handles_keep_insertion_order() {
        let repo = MemoryRepository::<Order>::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let o = order();
            ids.push(o.id);
            repo.insert(o).await.unwrap();
        }
        let mut seen = Vec::new();
        for handle in repo.handles().await {
            seen.push(handle.lock().await.id);
        }
        assert_eq!(seen, ids);
    }

    #[tokio::test]
    async fn entity_lock_does_not_block_other_entities() {
        let repo = MemoryRepository::<Order>::new();
        let a = order();
        let b = order();
        let (a_id, b_id) = (a.id, b.id);
        repo.insert(a).await.unwrap();
        repo.insert(b).await.unwrap();

        let a_handle = repo.get(a_id).await.unwrap();
        let _held = a_handle.lock().await;
        // Another entity and the collection stay reachable while `a` is locked.
        let b_snapshot = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            repo.snapshot(b_id),
        )
        .await
        .expect("snapshot of b should not block");
        assert!(b_snapshot.is_some());
        assert_eq!(repo.handles().await.len(), 2);
    }
}
