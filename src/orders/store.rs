use crate::orders::types::Order;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

pub type Predicate = dyn Fn(&Order) -> bool + Send + Sync;
pub type Mutation = dyn Fn(&mut Order) + Send + Sync;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("order {order_id} not found")]
    NotFound { order_id: String },

    /// The compare-and-update predicate did not hold. Callers decide whether
    /// this is a real failure or an idempotent no-op.
    #[error("conflicting update on order {order_id}")]
    Conflict { order_id: String },

    #[error("order {order_id} already exists")]
    DuplicateId { order_id: String },
}

/// Single source of truth for "has this payment already been applied".
///
/// `compare_and_update` is the only mutation primitive: the predicate is
/// evaluated and the mutation applied inside one atomic section, which is
/// what prevents lost updates when two pollers race on the same order.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, order_id: &str) -> Result<Order, StoreError>;

    async fn insert(&self, order: Order) -> Result<(), StoreError>;

    async fn compare_and_update(
        &self,
        order_id: &str,
        predicate: &Predicate,
        mutation: &Mutation,
    ) -> Result<Order, StoreError>;
}

/// Reference implementation backed by a mutex-held map. The lock is held
/// across predicate check and mutation, never across an await point.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: Vec<Order>) -> Self {
        let map = orders.into_iter().map(|o| (o.id.clone(), o)).collect();
        Self {
            orders: Mutex::new(map),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, order_id: &str) -> Result<Order, StoreError> {
        let orders = self.orders.lock().expect("order store lock poisoned");
        orders.get(order_id).cloned().ok_or(StoreError::NotFound {
            order_id: order_id.to_string(),
        })
    }

    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().expect("order store lock poisoned");
        if orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateId {
                order_id: order.id.clone(),
            });
        }
        orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn compare_and_update(
        &self,
        order_id: &str,
        predicate: &Predicate,
        mutation: &Mutation,
    ) -> Result<Order, StoreError> {
        let mut orders = self.orders.lock().expect("order store lock poisoned");
        let order = orders.get_mut(order_id).ok_or(StoreError::NotFound {
            order_id: order_id.to_string(),
        })?;
        if !predicate(order) {
            return Err(StoreError::Conflict {
                order_id: order_id.to_string(),
            });
        }
        mutation(order);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PaymentMethod;
    use crate::orders::types::OrderStatus;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn order(id: &str) -> Order {
        Order::new_pending(id, dec!(15.00), PaymentMethod::Pix)
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = InMemoryOrderStore::new();
        store.insert(order("ord_1")).await.expect("insert");
        let fetched = store.get("ord_1").await.expect("get");
        assert_eq!(fetched.id, "ord_1");
        assert!(matches!(
            store.get("missing").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryOrderStore::new();
        store.insert(order("ord_1")).await.expect("insert");
        assert!(matches!(
            store.insert(order("ord_1")).await,
            Err(StoreError::DuplicateId { .. })
        ));
    }

    #[tokio::test]
    async fn cas_applies_mutation_only_when_predicate_holds() {
        let store = InMemoryOrderStore::with_orders(vec![order("ord_1")]);

        let updated = store
            .compare_and_update(
                "ord_1",
                &|o| o.status == OrderStatus::Pending,
                &|o| o.status = OrderStatus::Completed,
            )
            .await
            .expect("first transition should apply");
        assert_eq!(updated.status, OrderStatus::Completed);

        // Second identical CAS must conflict, not double-apply.
        let second = store
            .compare_and_update(
                "ord_1",
                &|o| o.status == OrderStatus::Pending,
                &|o| o.status = OrderStatus::Completed,
            )
            .await;
        assert!(matches!(second, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn concurrent_cas_lets_exactly_one_writer_through() {
        let store = Arc::new(InMemoryOrderStore::with_orders(vec![order("ord_1")]));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_update(
                        "ord_1",
                        &|o| o.status == OrderStatus::Pending,
                        &|o| {
                            o.status = OrderStatus::Completed;
                            o.applied_payments.push("pay_99".to_string());
                        },
                    )
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("task should not panic") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let final_order = store.get("ord_1").await.expect("get");
        assert_eq!(final_order.applied_payments.len(), 1);
    }
}
