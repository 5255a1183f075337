use crate::application::poller::PollPolicy;
use crate::application::settler::{
    MobileMoneyState, PaymentSettler, PollOutcome, SettlementResult,
};
use crate::application::submitter::OrderSubmitter;
use crate::domain::cart::{Cart, Product, ProductId, Totals};
use crate::domain::money::Money;
use crate::domain::order::{CustomerRef, Order};
use crate::domain::payment::{ExternalRef, PaymentMethod};
use crate::domain::ports::{GatewayHandle, OrderBackendHandle};
use crate::domain::receipt::Receipt;
use crate::error::{CheckoutError, Result};
use std::mem;
use tokio::time::Instant;

const DEFAULT_COUNTRY_CODE: &str = "254";

/// Where the current sale stands.
pub enum SessionState {
    /// Ringing up items. The only state in which the cart can change.
    Building,
    /// Waiting for the backend to create the order.
    Submitting,
    AwaitingPayment(PaymentSettler),
    /// The gateway declined or the customer never answered. The order is
    /// kept so payment can be retried or taken another way.
    Failed {
        settler: PaymentSettler,
        reason: String,
    },
    /// Polling gave up. The push may still be approved on the phone.
    PaymentAbandoned(PaymentSettler),
    /// Paid. The cart has been cleared for the next sale.
    Settled(Receipt),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Submitting => "submitting",
            Self::AwaitingPayment(_) => "awaiting payment",
            Self::Failed { .. } => "failed",
            Self::PaymentAbandoned(_) => "payment abandoned",
            Self::Settled(_) => "settled",
        }
    }

    pub fn order(&self) -> Option<&Order> {
        self.settler().map(PaymentSettler::order)
    }

    pub fn settler(&self) -> Option<&PaymentSettler> {
        match self {
            Self::AwaitingPayment(settler)
            | Self::Failed { settler, .. }
            | Self::PaymentAbandoned(settler) => Some(settler),
            Self::Building | Self::Submitting | Self::Settled(_) => None,
        }
    }
}

/// Coordinates one terminal's sales: cart, order submission, settlement
/// and receipt, one sale at a time.
pub struct CheckoutSession {
    backend: OrderBackendHandle,
    gateway: GatewayHandle,
    submitter: OrderSubmitter,
    country_code: String,
    cart: Cart,
    state: SessionState,
}

impl CheckoutSession {
    pub fn new(backend: OrderBackendHandle, gateway: GatewayHandle) -> Self {
        Self {
            submitter: OrderSubmitter::new(backend.clone()),
            backend,
            gateway,
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            cart: Cart::new(),
            state: SessionState::Building,
        }
    }

    #[must_use]
    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = country_code.into();
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn totals(&self) -> Totals {
        self.cart.totals()
    }

    /// The terminal payment result, if the sale has one.
    pub fn settlement(&self) -> Option<SettlementResult> {
        self.state.settler().and_then(PaymentSettler::result)
    }

    fn cart_mut(&mut self, action: &'static str) -> Result<&mut Cart> {
        match self.state {
            SessionState::Building => Ok(&mut self.cart),
            _ => Err(self.invalid(action)),
        }
    }

    fn invalid(&self, action: &'static str) -> CheckoutError {
        CheckoutError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }

    pub fn add_item(&mut self, product: &Product) -> Result<()> {
        self.cart_mut("add items")?.add(product, product.price)
    }

    pub fn add_item_at(&mut self, product: &Product, price: Money) -> Result<()> {
        self.cart_mut("add items")?.add(product, price)
    }

    pub fn set_quantity(&mut self, product_id: &ProductId, qty: i64) -> Result<()> {
        self.cart_mut("change quantities")?.set_quantity(product_id, qty)
    }

    pub fn set_line_discount(&mut self, product_id: &ProductId, discount: Money) -> Result<()> {
        self.cart_mut("change discounts")?
            .set_line_discount(product_id, discount)
    }

    pub fn remove_item(&mut self, product_id: &ProductId) -> Result<bool> {
        Ok(self.cart_mut("remove items")?.remove(product_id))
    }

    pub fn set_customer(&mut self, customer: Option<CustomerRef>) -> Result<()> {
        self.cart_mut("change the customer")?.set_customer(customer);
        Ok(())
    }

    /// Submits the cart as an order and prepares to take payment by `method`.
    ///
    /// On any failure the session goes back to `Building` with the cart
    /// untouched. Nothing is retried.
    pub async fn checkout(&mut self, method: PaymentMethod) -> Result<Order> {
        if !matches!(self.state, SessionState::Building) {
            return Err(self.invalid("check out"));
        }
        if self.cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        self.state = SessionState::Submitting;
        match self.submitter.submit(&self.cart).await {
            Ok(order) => {
                self.state = SessionState::AwaitingPayment(PaymentSettler::new(
                    method,
                    order.clone(),
                    self.backend.clone(),
                    self.gateway.clone(),
                    &self.country_code,
                ));
                Ok(order)
            }
            Err(e) => {
                self.state = SessionState::Building;
                Err(e)
            }
        }
    }

    /// Takes a cash tender. A short tender leaves the sale awaiting payment.
    pub async fn pay_cash(&mut self, tendered: Money) -> Result<Receipt> {
        let receipt = match &mut self.state {
            SessionState::AwaitingPayment(PaymentSettler::Cash(settler)) => {
                settler.settle(tendered).await?
            }
            _ => return Err(self.invalid("take cash")),
        };
        self.finish_sale(receipt.clone());
        Ok(receipt)
    }

    /// Sends a mobile-money push for the order total.
    ///
    /// Also used to retry after a decline, a timeout or an abandoned wait.
    pub async fn send_push(&mut self, phone: &str) -> Result<ExternalRef> {
        let settler = match &mut self.state {
            SessionState::AwaitingPayment(PaymentSettler::MobileMoney(settler))
            | SessionState::Failed {
                settler: PaymentSettler::MobileMoney(settler),
                ..
            }
            | SessionState::PaymentAbandoned(PaymentSettler::MobileMoney(settler)) => settler,
            _ => return Err(self.invalid("send a push")),
        };
        let external_ref = settler.initiate(phone).await?;

        self.state = match mem::replace(&mut self.state, SessionState::Submitting) {
            SessionState::AwaitingPayment(settler)
            | SessionState::Failed { settler, .. }
            | SessionState::PaymentAbandoned(settler) => SessionState::AwaitingPayment(settler),
            other => other,
        };
        Ok(external_ref)
    }

    /// Queries the in-flight push once.
    ///
    /// A `QueryError` leaves the session exactly as it was.
    pub async fn poll_payment(&mut self) -> Result<PollOutcome> {
        let outcome = match &mut self.state {
            SessionState::AwaitingPayment(PaymentSettler::MobileMoney(settler)) => {
                settler.poll().await?
            }
            SessionState::Settled(receipt) => return Ok(PollOutcome::Confirmed(receipt.clone())),
            _ => return Err(self.invalid("poll for payment")),
        };

        match &outcome {
            PollOutcome::Pending { .. } => {}
            PollOutcome::Confirmed(receipt) => self.finish_sale(receipt.clone()),
            PollOutcome::Declined { code, description }
            | PollOutcome::TimedOut { code, description } => {
                if let SessionState::AwaitingPayment(settler) =
                    mem::replace(&mut self.state, SessionState::Submitting)
                {
                    self.state = SessionState::Failed {
                        settler,
                        reason: format!("{code}: {description}"),
                    };
                }
            }
        }
        Ok(outcome)
    }

    /// Polls the in-flight push on `policy`'s schedule until the gateway
    /// gives a verdict or the wait budget runs out.
    ///
    /// Query errors are logged and polling continues. When the budget is
    /// spent the push is abandoned locally and `PaymentAbandoned` returned.
    pub async fn await_payment(&mut self, policy: &PollPolicy) -> Result<Receipt> {
        let in_flight = matches!(
            &self.state,
            SessionState::AwaitingPayment(settler) if settler.is_in_flight()
        );
        if !in_flight {
            return Err(self.invalid("wait for payment"));
        }

        let deadline = Instant::now() + policy.max_wait();
        for delay in policy.schedule() {
            tokio::time::sleep(delay).await;
            match self.poll_payment().await {
                Ok(PollOutcome::Confirmed(receipt)) => return Ok(receipt),
                Ok(PollOutcome::Declined { code, description }) => {
                    return Err(CheckoutError::PaymentDeclined { code, description });
                }
                Ok(PollOutcome::TimedOut { code, description }) => {
                    return Err(CheckoutError::PaymentTimedOut { code, description });
                }
                Ok(PollOutcome::Pending { message }) => {
                    tracing::debug!(%message, "payment pending");
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "status query failed, will query again");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        let external_ref = self.abandon_payment()?;
        let order_number = self
            .state
            .order()
            .map(|o| o.order_number.clone())
            .unwrap_or_default();
        Err(CheckoutError::PaymentAbandoned {
            external_ref: external_ref.to_string(),
            order_number,
        })
    }

    /// Stops waiting for the in-flight push without contacting the gateway.
    pub fn abandon_payment(&mut self) -> Result<ExternalRef> {
        let external_ref = match &mut self.state {
            SessionState::AwaitingPayment(PaymentSettler::MobileMoney(settler)) => {
                settler.abandon()?
            }
            _ => return Err(self.invalid("abandon the payment")),
        };
        if let SessionState::AwaitingPayment(settler) =
            mem::replace(&mut self.state, SessionState::Submitting)
        {
            self.state = SessionState::PaymentAbandoned(settler);
        }
        Ok(external_ref)
    }

    /// Takes payment for the same order by another method.
    ///
    /// Refused while a push is in flight. After an abandoned push the
    /// cashier must first check the customer was not charged and call
    /// [`CheckoutSession::confirm_unpaid`]; until then the push may still be
    /// approved and switching would risk charging twice.
    pub fn switch_method(&mut self, method: PaymentMethod) -> Result<()> {
        if let SessionState::PaymentAbandoned(settler) = &self.state {
            let external_ref = abandoned_ref(settler);
            tracing::warn!(%external_ref, "method switch refused; abandoned push not confirmed unpaid");
            return Err(CheckoutError::UnconfirmedAbandonedPush { external_ref });
        }

        let settler = match mem::replace(&mut self.state, SessionState::Submitting) {
            SessionState::AwaitingPayment(settler) | SessionState::Failed { settler, .. }
                if !settler.is_in_flight() =>
            {
                settler
            }
            other => {
                self.state = other;
                return Err(self.invalid("switch payment method"));
            }
        };

        let order = settler.order().clone();
        tracing::info!(
            order_number = %order.order_number,
            from = %settler.method(),
            to = %method,
            "payment method switched"
        );
        self.state = SessionState::AwaitingPayment(PaymentSettler::new(
            method,
            order,
            self.backend.clone(),
            self.gateway.clone(),
            &self.country_code,
        ));
        Ok(())
    }

    /// Records the cashier's confirmation that an abandoned push was not
    /// paid, e.g. after checking the customer's phone or the gateway
    /// statement. The sale moves to `Failed` and another method may be used.
    pub fn confirm_unpaid(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, SessionState::Submitting) {
            SessionState::PaymentAbandoned(settler) => {
                let external_ref = abandoned_ref(&settler);
                tracing::warn!(
                    order_number = %settler.order().order_number,
                    %external_ref,
                    "abandoned push confirmed unpaid by the cashier"
                );
                self.state = SessionState::Failed {
                    settler,
                    reason: format!("push {external_ref} abandoned, confirmed unpaid"),
                };
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.invalid("confirm an abandoned push unpaid"))
            }
        }
    }

    /// Operator gives up on the sale: the cart is cleared and the session
    /// returns to `Building`.
    ///
    /// Returns the unpaid order, if one was created, for manual
    /// reconciliation. An in-flight push is only abandoned locally.
    pub fn cancel_sale(&mut self) -> Option<Order> {
        let state = mem::replace(&mut self.state, SessionState::Building);
        self.cart.clear();

        let mut settler = match state {
            SessionState::AwaitingPayment(settler)
            | SessionState::Failed { settler, .. }
            | SessionState::PaymentAbandoned(settler) => settler,
            SessionState::Building | SessionState::Submitting | SessionState::Settled(_) => {
                tracing::info!("sale cancelled");
                return None;
            }
        };

        if let PaymentSettler::MobileMoney(mm) = &mut settler {
            if matches!(mm.state(), MobileMoneyState::PushSent(_)) {
                // Only errors when nothing is in flight, which was just checked.
                let _ = mm.abandon();
            }
        }
        let order = settler.order().clone();
        tracing::info!(order_number = %order.order_number, "sale cancelled; order left pending");
        Some(order)
    }

    /// Starts the next sale after a settled one, handing back its receipt.
    pub fn next_sale(&mut self) -> Result<Receipt> {
        match mem::replace(&mut self.state, SessionState::Building) {
            SessionState::Settled(receipt) => Ok(receipt),
            other => {
                self.state = other;
                Err(self.invalid("start the next sale"))
            }
        }
    }

    fn finish_sale(&mut self, receipt: Receipt) {
        tracing::info!(
            order_number = %receipt.order_number,
            total = %receipt.total,
            method = %receipt.method,
            "sale settled"
        );
        self.cart.clear();
        self.state = SessionState::Settled(receipt);
    }
}

fn abandoned_ref(settler: &PaymentSettler) -> String {
    match settler {
        PaymentSettler::MobileMoney(mm) => mm
            .state()
            .external_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        PaymentSettler::Cash(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::{InMemoryBackend, InMemoryGateway, ScriptStep};
    use std::sync::Arc;
    use std::time::Duration;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::with_catalog(vec![
            Product::new("P1", "Maize flour 2kg", Money::from_minor(10_000), 5),
            Product::new("P2", "Sugar 1kg", Money::from_minor(5_000), 5),
        ])
    }

    async fn session_with(steps: Vec<ScriptStep>) -> (CheckoutSession, InMemoryBackend, InMemoryGateway) {
        let backend = backend();
        let gateway = InMemoryGateway::scripted(steps);
        let mut session = CheckoutSession::new(Arc::new(backend.clone()), Arc::new(gateway.clone()));
        let flour = backend.product(&ProductId::new("P1")).await.unwrap();
        let sugar = backend.product(&ProductId::new("P2")).await.unwrap();
        session.add_item(&flour).unwrap();
        session.set_quantity(&flour.id, 2).unwrap();
        session.add_item(&sugar).unwrap();
        (session, backend, gateway)
    }

    #[tokio::test]
    async fn test_cash_sale_end_to_end() {
        let (mut session, backend, _) = session_with(vec![]).await;
        assert_eq!(session.totals().total, Money::from_minor(29_000));

        let order = session.checkout(PaymentMethod::Cash).await.unwrap();
        assert_eq!(session.state().name(), "awaiting payment");
        assert_eq!(backend.stock_of(&ProductId::new("P1")).await, Some(3));

        let receipt = session.pay_cash(Money::from_minor(30_000)).await.unwrap();
        assert_eq!(receipt.order_id, order.id);
        assert_eq!(receipt.change, Some(Money::from_minor(1_000)));
        assert!(session.cart().is_empty());
        assert_eq!(session.state().name(), "settled");

        let handed_back = session.next_sale().unwrap();
        assert_eq!(handed_back, receipt);
        assert_eq!(session.state().name(), "building");
    }

    #[tokio::test]
    async fn test_cart_is_frozen_after_checkout() {
        let (mut session, backend, _) = session_with(vec![]).await;
        session.checkout(PaymentMethod::Cash).await.unwrap();

        let flour = backend.product(&ProductId::new("P1")).await.unwrap();
        let err = session.add_item(&flour).unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidTransition { .. }));
        assert!(session.set_quantity(&flour.id, 9).is_err());
        assert_eq!(session.cart().line(&flour.id).unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_short_tender_keeps_awaiting_payment() {
        let (mut session, _, _) = session_with(vec![]).await;
        session.checkout(PaymentMethod::Cash).await.unwrap();

        let err = session.pay_cash(Money::from_minor(28_999)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientTender { .. }));
        assert_eq!(session.state().name(), "awaiting payment");
        assert!(!session.cart().is_empty());
    }

    #[tokio::test]
    async fn test_stock_failure_returns_to_building() {
        let (mut session, backend, _) = session_with(vec![]).await;
        session.set_quantity(&ProductId::new("P1"), 6).unwrap();

        let err = session.checkout(PaymentMethod::Cash).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock(_)));
        assert_eq!(session.state().name(), "building");
        assert_eq!(backend.order_count().await, 0);

        // Fix the cart and try again.
        session.set_quantity(&ProductId::new("P1"), 5).unwrap();
        assert!(session.checkout(PaymentMethod::Cash).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_cart_cannot_check_out() {
        let backend = backend();
        let mut session =
            CheckoutSession::new(Arc::new(backend.clone()), Arc::new(InMemoryGateway::new()));
        let err = session.checkout(PaymentMethod::Cash).await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
        assert_eq!(session.state().name(), "building");
    }

    #[tokio::test]
    async fn test_decline_then_retry_push() {
        let (mut session, _, gateway) =
            session_with(vec![ScriptStep::cancelled(), ScriptStep::success()]).await;
        session.checkout(PaymentMethod::MobileMoney).await.unwrap();
        session.send_push("0712345678").await.unwrap();

        let outcome = session.poll_payment().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Declined { .. }));
        match session.state() {
            SessionState::Failed { reason, .. } => assert!(reason.starts_with("1032")),
            other => panic!("expected failed, got {}", other.name()),
        }

        session.send_push("0712345678").await.unwrap();
        assert_eq!(session.state().name(), "awaiting payment");
        let outcome = session.poll_payment().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Confirmed(_)));
        assert_eq!(session.state().name(), "settled");
        assert_eq!(gateway.pushes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_switch_to_cash_after_timeout() {
        let (mut session, _, _) = session_with(vec![ScriptStep::unreachable()]).await;
        let order = session.checkout(PaymentMethod::MobileMoney).await.unwrap();
        session.send_push("0712345678").await.unwrap();
        session.poll_payment().await.unwrap();
        assert_eq!(session.state().name(), "failed");

        session.switch_method(PaymentMethod::Cash).unwrap();
        let receipt = session.pay_cash(Money::from_minor(29_000)).await.unwrap();
        assert_eq!(receipt.order_id, order.id);
        assert_eq!(receipt.method, PaymentMethod::Cash);
    }

    #[tokio::test]
    async fn test_switch_refused_while_push_in_flight() {
        let (mut session, _, _) = session_with(vec![]).await;
        session.checkout(PaymentMethod::MobileMoney).await.unwrap();
        session.send_push("0712345678").await.unwrap();

        let err = session.switch_method(PaymentMethod::Cash).unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidTransition { .. }));
        assert_eq!(session.state().name(), "awaiting payment");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_budget_exhaustion_abandons() {
        let (mut session, backend, gateway) = session_with(vec![]).await;
        let order = session.checkout(PaymentMethod::MobileMoney).await.unwrap();
        session.send_push("0712345678").await.unwrap();

        let policy = PollPolicy::new()
            .with_interval(Duration::from_secs(3))
            .with_backoff_multiplier(1.0)
            .with_max_wait(Duration::from_secs(12));
        let err = session.await_payment(&policy).await.unwrap_err();
        match err {
            CheckoutError::PaymentAbandoned { external_ref, order_number } => {
                assert_eq!(external_ref, "ws_1");
                assert_eq!(order_number, order.order_number);
            }
            other => panic!("expected PaymentAbandoned, got {other:?}"),
        }
        assert_eq!(gateway.queries_made().await, 4);
        assert_eq!(session.state().name(), "payment abandoned");
        // The order stays pending for reconciliation.
        assert_eq!(
            backend.order(order.id).await.unwrap().status,
            crate::domain::order::OrderStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_cancel_sale_returns_pending_order() {
        let (mut session, _, _) = session_with(vec![]).await;
        let order = session.checkout(PaymentMethod::MobileMoney).await.unwrap();
        session.send_push("0712345678").await.unwrap();

        let cancelled = session.cancel_sale().unwrap();
        assert_eq!(cancelled.id, order.id);
        assert!(session.cart().is_empty());
        assert_eq!(session.state().name(), "building");
    }

    #[tokio::test]
    async fn test_next_sale_requires_settlement() {
        let (mut session, _, _) = session_with(vec![]).await;
        assert!(session.next_sale().is_err());
        assert_eq!(session.state().name(), "building");
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_after_abandon_needs_confirmation() {
        let (mut session, backend, _) = session_with(vec![]).await;
        let order = session.checkout(PaymentMethod::MobileMoney).await.unwrap();
        session.send_push("0712345678").await.unwrap();
        session.abandon_payment().unwrap();

        let err = session.switch_method(PaymentMethod::Cash).unwrap_err();
        match err {
            CheckoutError::UnconfirmedAbandonedPush { external_ref } => {
                assert_eq!(external_ref, "ws_1")
            }
            other => panic!("expected UnconfirmedAbandonedPush, got {other:?}"),
        }
        assert_eq!(session.state().name(), "payment abandoned");

        session.confirm_unpaid().unwrap();
        assert_eq!(session.state().name(), "failed");
        session.switch_method(PaymentMethod::Cash).unwrap();
        let receipt = session.pay_cash(Money::from_minor(29_000)).await.unwrap();
        assert_eq!(receipt.order_id, order.id);
        assert_eq!(backend.cash_payment_count().await, 1);
    }

    #[tokio::test]
    async fn test_confirm_unpaid_only_after_abandon() {
        let (mut session, _, _) = session_with(vec![]).await;
        assert!(matches!(
            session.confirm_unpaid(),
            Err(CheckoutError::InvalidTransition { .. })
        ));
        assert_eq!(session.state().name(), "building");
    }
}
