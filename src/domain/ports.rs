use super::cart::LineItem;
use super::money::Money;
use super::order::{CustomerRef, Order, OrderId};
use super::payment::{ExternalRef, GatewayStatus, PhoneNumber};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of recording a cash payment.
#[derive(Debug, Clone, PartialEq)]
pub struct CashSettlement {
    pub order: Order,
    pub change: Money,
}

/// The order/catalog service.
#[async_trait]
pub trait OrderBackend: Send + Sync {
    /// Persists an order and reserves stock for every line, all or nothing.
    ///
    /// Fails with `InsufficientStock` naming every short product, in which
    /// case nothing was reserved.
    async fn create_order(&self, lines: Vec<LineItem>, customer: Option<CustomerRef>)
    -> Result<Order>;

    /// Records a cash payment and completes the order.
    async fn settle_cash(&self, order_id: OrderId, tendered: Money) -> Result<CashSettlement>;

    /// Records a mobile-money payment the gateway confirmed and completes
    /// the order. Returns the completed order.
    async fn record_mobile_payment(
        &self,
        order_id: OrderId,
        external_ref: &ExternalRef,
        amount: Money,
    ) -> Result<Order>;
}

/// The mobile-money push gateway.
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    /// Prompts the customer's phone to approve `amount`.
    async fn initiate_push(
        &self,
        order_id: OrderId,
        phone: &PhoneNumber,
        amount: Money,
    ) -> Result<ExternalRef>;

    /// Asks for the current status of a push.
    async fn query_status(&self, external_ref: &ExternalRef) -> Result<GatewayStatus>;
}

pub type OrderBackendHandle = Arc<dyn OrderBackend>;
pub type GatewayHandle = Arc<dyn MobileMoneyGateway>;
