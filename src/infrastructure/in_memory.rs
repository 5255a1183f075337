use crate::domain::cart::{LineItem, Product, ProductId, Totals};
use crate::domain::money::Money;
use crate::domain::order::{CustomerRef, Order, OrderId, OrderStatus};
use crate::domain::payment::{ExternalRef, GatewayStatus, PhoneNumber};
use crate::domain::ports::{CashSettlement, MobileMoneyGateway, OrderBackend};
use crate::error::{CheckoutError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One change to a product's stock count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub product_id: ProductId,
    /// Negative for sales.
    pub quantity: i64,
    pub previous_stock: u32,
    pub new_stock: u32,
    /// Order number that caused the movement.
    pub reference: String,
}

#[derive(Default)]
struct BackendState {
    catalog: BTreeMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    movements: Vec<StockMovement>,
    cash_payments: Vec<(OrderId, Money)>,
    mobile_payments: Vec<(OrderId, ExternalRef, Money)>,
    next_order_id: u64,
    unavailable: bool,
}

/// A thread-safe in-memory order backend.
///
/// Every order creation runs under a single write lock, which is what makes
/// the stock reservation all-or-nothing across concurrent terminals.
#[derive(Default, Clone)]
pub struct InMemoryBackend {
    state: Arc<RwLock<BackendState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = products.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            state: Arc::new(RwLock::new(BackendState {
                catalog,
                ..Default::default()
            })),
        }
    }

    pub async fn add_product(&self, product: Product) {
        let mut state = self.state.write().await;
        state.catalog.insert(product.id.clone(), product);
    }

    pub async fn product(&self, id: &ProductId) -> Option<Product> {
        self.state.read().await.catalog.get(id).cloned()
    }

    pub async fn stock_of(&self, id: &ProductId) -> Option<u32> {
        self.state.read().await.catalog.get(id).map(|p| p.stock)
    }

    pub async fn order(&self, id: OrderId) -> Option<Order> {
        self.state.read().await.orders.get(&id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn stock_movements(&self) -> Vec<StockMovement> {
        self.state.read().await.movements.clone()
    }

    pub async fn cash_payment_count(&self) -> usize {
        self.state.read().await.cash_payments.len()
    }

    pub async fn mobile_payment_count(&self) -> usize {
        self.state.read().await.mobile_payments.len()
    }

    /// Makes every following request fail as if the network were down.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }
}

#[async_trait]
impl OrderBackend for InMemoryBackend {
    async fn create_order(
        &self,
        lines: Vec<LineItem>,
        customer: Option<CustomerRef>,
    ) -> Result<Order> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.unavailable {
            return Err(CheckoutError::BackendUnavailable(
                "order service unreachable".into(),
            ));
        }

        let totals = Totals::try_of_lines(&lines)?;

        // Lines for the same product draw on the same stock.
        let mut wanted: Vec<(&ProductId, u64)> = Vec::new();
        for line in &lines {
            match wanted.iter_mut().find(|(id, _)| *id == &line.product_id) {
                Some((_, qty)) => *qty += u64::from(line.quantity),
                None => wanted.push((&line.product_id, u64::from(line.quantity))),
            }
        }
        let mut short = Vec::new();
        for (product_id, qty) in &wanted {
            let product = state.catalog.get(*product_id).ok_or_else(|| {
                CheckoutError::InvalidProduct(format!("{product_id} is not in the catalog"))
            })?;
            if u64::from(product.stock) < *qty {
                short.push((*product_id).clone());
            }
        }
        if !short.is_empty() {
            return Err(CheckoutError::InsufficientStock(short));
        }

        state.next_order_id += 1;
        let id = OrderId(state.next_order_id);
        let now = Utc::now();
        let order_number = format!("MNG{}{:05}", now.format("%Y%m%d%H%M%S"), id.0 % 100_000);

        for line in &lines {
            if let Some(product) = state.catalog.get_mut(&line.product_id) {
                let previous_stock = product.stock;
                product.stock -= line.quantity;
                let movement = StockMovement {
                    product_id: line.product_id.clone(),
                    quantity: -i64::from(line.quantity),
                    previous_stock,
                    new_stock: product.stock,
                    reference: order_number.clone(),
                };
                state.movements.push(movement);
            }
        }

        let order = Order {
            id,
            order_number,
            customer,
            lines,
            subtotal: totals.subtotal,
            tax: totals.tax,
            total: totals.total,
            status: OrderStatus::Pending,
            created_at: now,
        };
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn settle_cash(&self, order_id: OrderId, tendered: Money) -> Result<CashSettlement> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.unavailable {
            return Err(CheckoutError::BackendUnavailable(
                "payment service unreachable".into(),
            ));
        }

        let order = state.orders.get_mut(&order_id).ok_or_else(|| {
            CheckoutError::FatalInconsistency(format!("order {order_id} does not exist"))
        })?;
        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::AlreadySettled(order.order_number.clone()));
        }
        if tendered < order.total {
            return Err(CheckoutError::InsufficientTender {
                tendered,
                total: order.total,
            });
        }

        order.status = OrderStatus::Completed;
        let settlement = CashSettlement {
            order: order.clone(),
            change: tendered - order.total,
        };
        state.cash_payments.push((order_id, tendered));
        Ok(settlement)
    }

    async fn record_mobile_payment(
        &self,
        order_id: OrderId,
        external_ref: &ExternalRef,
        amount: Money,
    ) -> Result<Order> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.unavailable {
            return Err(CheckoutError::BackendUnavailable(
                "payment service unreachable".into(),
            ));
        }

        let order = state.orders.get_mut(&order_id).ok_or_else(|| {
            CheckoutError::FatalInconsistency(format!("order {order_id} does not exist"))
        })?;
        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::AlreadySettled(order.order_number.clone()));
        }
        if amount != order.total {
            return Err(CheckoutError::FatalInconsistency(format!(
                "mobile payment {external_ref} of {amount} does not match order {} total {}",
                order.order_number, order.total
            )));
        }

        order.status = OrderStatus::Completed;
        let completed = order.clone();
        state
            .mobile_payments
            .push((order_id, external_ref.clone(), amount));
        Ok(completed)
    }
}

/// One scripted answer to a status query.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Status(GatewayStatus),
    TransportError(String),
}

impl ScriptStep {
    pub fn success() -> Self {
        Self::Status(GatewayStatus::new(
            "0",
            "The service request is processed successfully.",
        ))
    }

    pub fn pending() -> Self {
        Self::Status(still_processing())
    }

    pub fn cancelled() -> Self {
        Self::Status(GatewayStatus::new("1032", "Request cancelled by user"))
    }

    pub fn unreachable() -> Self {
        Self::Status(GatewayStatus::new("1037", "DS timeout user cannot be reached"))
    }

    pub fn transport_error() -> Self {
        Self::TransportError("connection reset by peer".into())
    }
}

/// Parses `pending`, `error`, or a bare result code such as `0` or `1032`.
impl FromStr for ScriptStep {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "pending" => Ok(Self::pending()),
            "error" => Ok(Self::transport_error()),
            "0" => Ok(Self::success()),
            "1032" => Ok(Self::cancelled()),
            "1037" => Ok(Self::unreachable()),
            "" => Err(CheckoutError::InvalidArgument(
                "empty gateway script step".into(),
            )),
            code => Ok(Self::Status(GatewayStatus::new(code, "Scripted result"))),
        }
    }
}

fn still_processing() -> GatewayStatus {
    GatewayStatus::new("4999", "The transaction is still under processing")
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushRecord {
    pub order_id: OrderId,
    pub phone: PhoneNumber,
    pub amount: Money,
    pub external_ref: ExternalRef,
}

#[derive(Default)]
struct GatewayState {
    script: VecDeque<ScriptStep>,
    pushes: Vec<PushRecord>,
    queries: usize,
    reject_pushes: bool,
}

/// A mobile-money gateway that answers status queries from a script.
///
/// Push references are `ws_1`, `ws_2`, ... in order. When the script runs
/// out, queries report the push as still pending.
#[derive(Default, Clone)]
pub struct InMemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState {
                script: steps.into_iter().collect(),
                ..Default::default()
            })),
        }
    }

    pub async fn push_script(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.state.lock().await.script.extend(steps);
    }

    pub async fn pushes(&self) -> Vec<PushRecord> {
        self.state.lock().await.pushes.clone()
    }

    pub async fn queries_made(&self) -> usize {
        self.state.lock().await.queries
    }

    /// Makes push initiation fail as if the gateway were down.
    pub async fn set_reject_pushes(&self, reject: bool) {
        self.state.lock().await.reject_pushes = reject;
    }
}

#[async_trait]
impl MobileMoneyGateway for InMemoryGateway {
    async fn initiate_push(
        &self,
        order_id: OrderId,
        phone: &PhoneNumber,
        amount: Money,
    ) -> Result<ExternalRef> {
        let mut state = self.state.lock().await;
        if state.reject_pushes {
            return Err(CheckoutError::BackendUnavailable(
                "mobile-money gateway unreachable".into(),
            ));
        }
        let external_ref = ExternalRef::new(format!("ws_{}", state.pushes.len() + 1));
        state.pushes.push(PushRecord {
            order_id,
            phone: phone.clone(),
            amount,
            external_ref: external_ref.clone(),
        });
        Ok(external_ref)
    }

    async fn query_status(&self, external_ref: &ExternalRef) -> Result<GatewayStatus> {
        let mut state = self.state.lock().await;
        state.queries += 1;
        if !state.pushes.iter().any(|p| &p.external_ref == external_ref) {
            return Err(CheckoutError::BackendUnavailable(format!(
                "unknown checkout request {external_ref}"
            )));
        }
        match state.script.pop_front() {
            Some(ScriptStep::Status(status)) => Ok(status),
            Some(ScriptStep::TransportError(message)) => {
                Err(CheckoutError::BackendUnavailable(message))
            }
            None => Ok(still_processing()),
        }
    }
}
