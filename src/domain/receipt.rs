use crate::domain::cart::LineItem;
use crate::domain::money::Money;
use crate::domain::order::{CustomerRef, Order, OrderId};
use crate::domain::payment::{AttemptState, ExternalRef, PaymentAttempt, PaymentMethod, Tender};
use crate::error::{CheckoutError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// The finalized record of a paid sale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer: Option<CustomerRef>,
    pub lines: Vec<LineItem>,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub method: PaymentMethod,
    pub tendered: Money,
    /// Only present for cash.
    pub change: Option<Money>,
    pub external_ref: Option<ExternalRef>,
    pub issued_at: DateTime<Utc>,
}

impl Receipt {
    /// Projects a paid order and its settled attempt into a receipt.
    ///
    /// Amounts are copied from the order as the backend recorded them.
    pub fn build(order: &Order, attempt: &PaymentAttempt) -> Result<Self> {
        if attempt.state != AttemptState::Settled {
            return Err(CheckoutError::FatalInconsistency(format!(
                "receipt requested for order {} with a {:?} payment attempt",
                order.order_number, attempt.state
            )));
        }
        if attempt.order_id != order.id {
            return Err(CheckoutError::FatalInconsistency(format!(
                "payment attempt for order {} used to build receipt for order {}",
                attempt.order_id, order.id
            )));
        }

        let (tendered, change) = match &attempt.tender {
            Tender::Cash { tendered, change } => (*tendered, Some(*change)),
            Tender::MobileMoney { .. } => (attempt.amount, None),
        };

        Ok(Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            customer: order.customer,
            lines: order.lines.clone(),
            subtotal: order.subtotal,
            tax: order.tax,
            total: order.total,
            method: attempt.method(),
            tendered,
            change,
            external_ref: attempt.external_ref().cloned(),
            issued_at: attempt.last_polled_at.unwrap_or(attempt.started_at),
        })
    }
}
