use crate::domain::cart::{Cart, Totals};
use crate::domain::order::Order;
use crate::domain::ports::OrderBackendHandle;
use crate::error::{CheckoutError, Result};

/// Turns a cart into a persisted order.
///
/// Stock is reserved by the backend as part of order creation; nothing here
/// touches stock counts. Failures are never retried automatically.
pub struct OrderSubmitter {
    backend: OrderBackendHandle,
}

impl OrderSubmitter {
    pub fn new(backend: OrderBackendHandle) -> Self {
        Self { backend }
    }

    pub async fn submit(&self, cart: &Cart) -> Result<Order> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let lines = cart.items().to_vec();
        let shown = cart.totals();
        tracing::debug!(lines = lines.len(), total = %shown.total, "submitting order");

        match self.backend.create_order(lines, cart.customer()).await {
            Ok(order) => {
                if order.totals() != shown {
                    warn_totals_drift(&order, &shown);
                }
                tracing::info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    total = %order.total,
                    "order created"
                );
                Ok(order)
            }
            Err(CheckoutError::InsufficientStock(products)) => {
                tracing::warn!(?products, "order rejected for insufficient stock");
                Err(CheckoutError::InsufficientStock(products))
            }
            Err(e) => {
                tracing::warn!(error = %e, "order submission failed");
                Err(e)
            }
        }
    }
}

fn warn_totals_drift(order: &Order, shown: &Totals) {
    tracing::warn!(
        order_number = %order.order_number,
        shown_total = %shown.total,
        recorded_total = %order.total,
        "backend totals differ from the cart; the order's amounts are charged"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cart::{Product, ProductId};
    use crate::domain::money::Money;
    use crate::infrastructure::in_memory::InMemoryBackend;
    use std::sync::Arc;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::with_catalog(vec![
            Product::new("P1", "Milk 500ml", Money::from_minor(6_000), 10),
            Product::new("P7", "Bread", Money::from_minor(5_500), 1),
        ])
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected_locally() {
        let backend = backend();
        let submitter = OrderSubmitter::new(Arc::new(backend.clone()));

        let result = submitter.submit(&Cart::new()).await;
        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
        assert_eq!(backend.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_submit_reserves_stock() {
        let backend = backend();
        let submitter = OrderSubmitter::new(Arc::new(backend.clone()));
        let milk = backend.product(&ProductId::new("P1")).await.unwrap();

        let mut cart = Cart::new();
        cart.add(&milk, milk.price).unwrap();
        cart.set_quantity(&milk.id, 3).unwrap();

        let order = submitter.submit(&cart).await.unwrap();
        assert_eq!(order.total, cart.totals().total);
        assert_eq!(backend.stock_of(&milk.id).await, Some(7));
    }

    #[tokio::test]
    async fn test_partial_shortage_reserves_nothing() {
        let backend = backend();
        let submitter = OrderSubmitter::new(Arc::new(backend.clone()));
        let milk = backend.product(&ProductId::new("P1")).await.unwrap();
        let bread = backend.product(&ProductId::new("P7")).await.unwrap();

        let mut cart = Cart::new();
        cart.add(&milk, milk.price).unwrap();
        cart.add(&bread, bread.price).unwrap();
        cart.set_quantity(&bread.id, 2).unwrap();

        let result = submitter.submit(&cart).await;
        match result {
            Err(CheckoutError::InsufficientStock(ids)) => assert_eq!(ids, vec![bread.id.clone()]),
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(backend.order_count().await, 0);
        assert_eq!(backend.stock_of(&milk.id).await, Some(10));
        assert_eq!(backend.stock_of(&bread.id).await, Some(1));
        assert!(backend.stock_movements().await.is_empty());
    }
}
