//! Live order registry.
//!
//! The facade owns every order it has submitted: an entry appears on
//! submission and leaves on a terminal status or an acknowledged cancel.
//! Status lookups for unknown ids are `MissingOrder` errors, never aborts.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{GatewayError, Result};
use crate::types::{Order, OrderId};

#[derive(Debug, Default)]
pub struct OrderRegistry {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: OrderId, order: Order) {
        self.orders.write().expect("order registry lock poisoned").insert(id, order);
    }

    pub fn get(&self, id: &OrderId) -> Option<Order> {
        self.orders.read().expect("order registry lock poisoned").get(id).cloned()
    }

    /// Like [`get`](Self::get), but an absent id is the caller's error.
    pub fn require(&self, id: &OrderId) -> Result<Order> {
        self.get(id).ok_or_else(|| GatewayError::MissingOrder(id.0.clone()))
    }

    pub fn remove(&self, id: &OrderId) -> Option<Order> {
        self.orders.write().expect("order registry lock poisoned").remove(id)
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.orders.read().expect("order registry lock poisoned").contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.orders.read().expect("order registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetPair, OrderSide};
    use rust_decimal::Decimal;

    fn order() -> Order {
        Order {
            side: OrderSide::Buy,
            pair: AssetPair(0),
            price: Decimal::from(10),
            quantity: Decimal::ONE,
        }
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let registry = OrderRegistry::new();
        let id = OrderId("K".into());
        registry.insert(id.clone(), order());
        assert!(registry.contains(&id));
        assert_eq!(registry.require(&id).unwrap(), order());
        assert_eq!(registry.remove(&id), Some(order()));
        assert!(!registry.contains(&id));
    }

    #[test]
    fn missing_id_is_a_typed_error() {
        let registry = OrderRegistry::new();
        match registry.require(&OrderId("ghost".into())) {
            Err(GatewayError::MissingOrder(id)) => assert_eq!(id, "ghost"),
            other => panic!("expected MissingOrder, got {:?}", other),
        }
    }
}
