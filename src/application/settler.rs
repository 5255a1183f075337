//! Payment settlement for one order.
//!
//! Cash settles in a single backend call. Mobile money is a push followed by
//! caller-driven status queries: [`MobileMoneySettler::poll`] issues exactly
//! one query per call and never schedules anything itself, so the wait and
//! backoff policy lives with the caller (see [`crate::application::poller`]).
//!
//! A failed query ("we could not ask the gateway") is reported as
//! [`CheckoutError::QueryError`] and leaves the push in flight. Only an
//! answer from the gateway can end a push.

use crate::domain::money::Money;
use crate::domain::order::Order;
use crate::domain::payment::{
    AttemptState, ExternalRef, GatewayStatus, PaymentAttempt, PaymentMethod, PhoneNumber, Tender,
    Verdict,
};
use crate::domain::ports::{GatewayHandle, OrderBackendHandle};
use crate::domain::receipt::Receipt;
use crate::error::{CheckoutError, Result};
use chrono::{DateTime, Utc};

/// Terminal status shared by both payment protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStatus {
    Settled,
    Failed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementResult {
    pub status: SettlementStatus,
    pub receipt: Option<Receipt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CashState {
    AwaitingTender,
    Settled { attempt: PaymentAttempt, receipt: Receipt },
    /// Last tender was short. Another tender may be offered.
    Rejected { tendered: Money },
}

pub struct CashSettler {
    order: Order,
    backend: OrderBackendHandle,
    state: CashState,
}

impl CashSettler {
    pub fn new(order: Order, backend: OrderBackendHandle) -> Self {
        Self {
            order,
            backend,
            state: CashState::AwaitingTender,
        }
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn state(&self) -> &CashState {
        &self.state
    }

    /// Records `tendered` against the order and returns the receipt.
    pub async fn settle(&mut self, tendered: Money) -> Result<Receipt> {
        if let CashState::Settled { .. } = self.state {
            return Err(CheckoutError::AlreadySettled(self.order.order_number.clone()));
        }
        if tendered.is_negative() {
            return Err(CheckoutError::InvalidAmount(format!(
                "tendered amount {tendered} is negative"
            )));
        }
        let total = self.order.total;
        if tendered < total {
            tracing::warn!(order_number = %self.order.order_number, %tendered, %total, "cash tender rejected");
            self.state = CashState::Rejected { tendered };
            return Err(CheckoutError::InsufficientTender { tendered, total });
        }

        let settlement = self.backend.settle_cash(self.order.id, tendered).await?;
        let change = tendered - total;
        if settlement.change != change {
            tracing::warn!(
                order_number = %self.order.order_number,
                expected = %change,
                recorded = %settlement.change,
                "backend recorded different change"
            );
        }

        let attempt = PaymentAttempt {
            order_id: self.order.id,
            amount: total,
            tender: Tender::Cash { tendered, change },
            state: AttemptState::Settled,
            started_at: Utc::now(),
            last_polled_at: None,
        };
        let receipt = Receipt::build(&settlement.order, &attempt)?;
        tracing::info!(order_number = %self.order.order_number, %tendered, %change, "cash payment settled");

        self.order = settlement.order;
        self.state = CashState::Settled {
            attempt,
            receipt: receipt.clone(),
        };
        Ok(receipt)
    }
}

/// A push the gateway accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Push {
    pub external_ref: ExternalRef,
    pub phone: PhoneNumber,
    pub amount: Money,
    pub started_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl Push {
    fn attempt(&self, order: &Order, state: AttemptState) -> PaymentAttempt {
        PaymentAttempt {
            order_id: order.id,
            amount: self.amount,
            tender: Tender::MobileMoney {
                phone: self.phone.clone(),
                external_ref: self.external_ref.clone(),
            },
            state,
            started_at: self.started_at,
            last_polled_at: self.last_polled_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MobileMoneyState {
    Idle,
    PushSent(Push),
    Confirmed { push: Push, receipt: Receipt },
    Declined { push: Push, status: GatewayStatus },
    TimedOut { push: Push, status: GatewayStatus },
    /// Polling stopped locally. The push itself was not cancelled.
    Abandoned(Push),
}

impl MobileMoneyState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PushSent(_) => "push sent",
            Self::Confirmed { .. } => "confirmed",
            Self::Declined { .. } => "declined",
            Self::TimedOut { .. } => "timed out",
            Self::Abandoned(_) => "abandoned",
        }
    }

    pub fn push(&self) -> Option<&Push> {
        match self {
            Self::Idle => None,
            Self::PushSent(push)
            | Self::Abandoned(push)
            | Self::Confirmed { push, .. }
            | Self::Declined { push, .. }
            | Self::TimedOut { push, .. } => Some(push),
        }
    }

    pub fn external_ref(&self) -> Option<&ExternalRef> {
        self.push().map(|p| &p.external_ref)
    }

    fn attempt_state(&self) -> Option<AttemptState> {
        match self {
            Self::Idle => None,
            Self::PushSent(_) => Some(AttemptState::Pending),
            Self::Confirmed { .. } => Some(AttemptState::Settled),
            Self::Declined { .. } | Self::TimedOut { .. } => Some(AttemptState::Failed),
            Self::Abandoned(_) => Some(AttemptState::Abandoned),
        }
    }
}

/// What one poll learned.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending { message: String },
    Confirmed(Receipt),
    Declined { code: String, description: String },
    TimedOut { code: String, description: String },
}

impl PollOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

pub struct MobileMoneySettler {
    order: Order,
    backend: OrderBackendHandle,
    gateway: GatewayHandle,
    country_code: String,
    state: MobileMoneyState,
    history: Vec<PaymentAttempt>,
}

impl MobileMoneySettler {
    pub fn new(
        order: Order,
        backend: OrderBackendHandle,
        gateway: GatewayHandle,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            order,
            backend,
            gateway,
            country_code: country_code.into(),
            state: MobileMoneyState::Idle,
            history: Vec::new(),
        }
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn state(&self) -> &MobileMoneyState {
        &self.state
    }

    /// Every attempt made for this order, oldest first.
    pub fn attempts(&self) -> Vec<PaymentAttempt> {
        let mut attempts = self.history.clone();
        if let (Some(push), Some(state)) = (self.state.push(), self.state.attempt_state()) {
            attempts.push(push.attempt(&self.order, state));
        }
        attempts
    }

    /// Sends a payment prompt for the order total to `phone`.
    ///
    /// Refused while an earlier push is still in flight.
    pub async fn initiate(&mut self, phone: &str) -> Result<ExternalRef> {
        match &self.state {
            MobileMoneyState::PushSent(push) => {
                tracing::warn!(
                    order_number = %self.order.order_number,
                    external_ref = %push.external_ref,
                    "push already in flight"
                );
                return Err(CheckoutError::PushAlreadyInFlight(
                    self.order.order_number.clone(),
                ));
            }
            MobileMoneyState::Confirmed { .. } => {
                return Err(CheckoutError::AlreadySettled(self.order.order_number.clone()));
            }
            _ => {}
        }

        let phone = PhoneNumber::parse(phone, &self.country_code)?;
        let amount = self.order.total;
        let external_ref = self
            .gateway
            .initiate_push(self.order.id, &phone, amount)
            .await?;
        tracing::info!(
            order_number = %self.order.order_number,
            %external_ref,
            %amount,
            "mobile-money push sent"
        );

        if let (Some(previous), Some(state)) = (self.state.push(), self.state.attempt_state()) {
            self.history.push(previous.attempt(&self.order, state));
        }
        self.state = MobileMoneyState::PushSent(Push {
            external_ref: external_ref.clone(),
            phone,
            amount,
            started_at: Utc::now(),
            last_polled_at: None,
        });
        Ok(external_ref)
    }

    /// Queries the gateway once for the in-flight push.
    ///
    /// On a success code the payment is recorded with the backend, which
    /// completes the order. If recording fails the push stays in flight and
    /// the next poll tries again.
    pub async fn poll(&mut self) -> Result<PollOutcome> {
        let external_ref = match &self.state {
            MobileMoneyState::PushSent(push) => push.external_ref.clone(),
            MobileMoneyState::Confirmed { receipt, .. } => {
                tracing::debug!(order_number = %self.order.order_number, "payment already confirmed");
                return Ok(PollOutcome::Confirmed(receipt.clone()));
            }
            _ => return Err(CheckoutError::NoPushInFlight),
        };

        let status = match self.gateway.query_status(&external_ref).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(%external_ref, error = %e, "status query failed, push still in flight");
                let reason = match e {
                    CheckoutError::BackendUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                return Err(CheckoutError::QueryError(reason));
            }
        };
        tracing::debug!(
            %external_ref,
            code = %status.result_code,
            description = %status.result_description,
            "status query answered"
        );

        let MobileMoneyState::PushSent(push) = &mut self.state else {
            return Err(CheckoutError::NoPushInFlight);
        };
        push.last_polled_at = Some(Utc::now());

        match status.result_code.verdict() {
            Verdict::Success => {
                let push = push.clone();
                let completed = self
                    .backend
                    .record_mobile_payment(self.order.id, &external_ref, push.amount)
                    .await
                    .inspect_err(|e| {
                        tracing::warn!(
                            order_number = %self.order.order_number,
                            %external_ref,
                            error = %e,
                            "gateway confirmed payment but the backend did not record it"
                        );
                    })?;
                let attempt = push.attempt(&completed, AttemptState::Settled);
                let receipt = Receipt::build(&completed, &attempt)?;
                tracing::info!(order_number = %self.order.order_number, %external_ref, "mobile-money payment confirmed");
                self.order = completed;
                self.state = MobileMoneyState::Confirmed {
                    push,
                    receipt: receipt.clone(),
                };
                Ok(PollOutcome::Confirmed(receipt))
            }
            verdict @ (Verdict::Pending | Verdict::Unrecognised) => {
                if verdict == Verdict::Unrecognised {
                    tracing::warn!(
                        %external_ref,
                        code = %status.result_code,
                        "unrecognised result code, treating as pending"
                    );
                }
                Ok(PollOutcome::Pending {
                    message: format!(
                        "Still pending, ask the customer to check their phone ({})",
                        status.result_description
                    ),
                })
            }
            Verdict::Declined => {
                let push = push.clone();
                tracing::warn!(
                    order_number = %self.order.order_number,
                    %external_ref,
                    code = %status.result_code,
                    "mobile-money payment declined"
                );
                let outcome = PollOutcome::Declined {
                    code: status.result_code.to_string(),
                    description: status.result_description.clone(),
                };
                self.state = MobileMoneyState::Declined { push, status };
                Ok(outcome)
            }
            Verdict::TimedOut => {
                let push = push.clone();
                tracing::warn!(
                    order_number = %self.order.order_number,
                    %external_ref,
                    code = %status.result_code,
                    "customer did not respond to the push"
                );
                let outcome = PollOutcome::TimedOut {
                    code: status.result_code.to_string(),
                    description: status.result_description.clone(),
                };
                self.state = MobileMoneyState::TimedOut { push, status };
                Ok(outcome)
            }
        }
    }

    /// Stops waiting for the in-flight push. Nothing is sent to the gateway;
    /// the order stays pending for manual reconciliation.
    pub fn abandon(&mut self) -> Result<ExternalRef> {
        let state = std::mem::replace(&mut self.state, MobileMoneyState::Idle);
        match state {
            MobileMoneyState::PushSent(push) => {
                tracing::info!(
                    order_number = %self.order.order_number,
                    external_ref = %push.external_ref,
                    "stopped polling push; order left pending"
                );
                let external_ref = push.external_ref.clone();
                self.state = MobileMoneyState::Abandoned(push);
                Ok(external_ref)
            }
            other => {
                self.state = other;
                Err(CheckoutError::NoPushInFlight)
            }
        }
    }
}

/// The settler for whichever method the cashier picked.
pub enum PaymentSettler {
    Cash(CashSettler),
    MobileMoney(MobileMoneySettler),
}

impl PaymentSettler {
    pub fn new(
        method: PaymentMethod,
        order: Order,
        backend: OrderBackendHandle,
        gateway: GatewayHandle,
        country_code: &str,
    ) -> Self {
        match method {
            PaymentMethod::Cash => Self::Cash(CashSettler::new(order, backend)),
            PaymentMethod::MobileMoney => {
                Self::MobileMoney(MobileMoneySettler::new(order, backend, gateway, country_code))
            }
        }
    }

    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::Cash(_) => PaymentMethod::Cash,
            Self::MobileMoney(_) => PaymentMethod::MobileMoney,
        }
    }

    pub fn order(&self) -> &Order {
        match self {
            Self::Cash(s) => s.order(),
            Self::MobileMoney(s) => s.order(),
        }
    }

    /// True while a mobile-money push awaits an answer.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::MobileMoney(s) if matches!(s.state(), MobileMoneyState::PushSent(_)))
    }

    /// The terminal result, once there is one.
    pub fn result(&self) -> Option<SettlementResult> {
        match self {
            Self::Cash(s) => match s.state() {
                CashState::Settled { receipt, .. } => Some(SettlementResult {
                    status: SettlementStatus::Settled,
                    receipt: Some(receipt.clone()),
                }),
                CashState::AwaitingTender | CashState::Rejected { .. } => None,
            },
            Self::MobileMoney(s) => match s.state() {
                MobileMoneyState::Confirmed { receipt, .. } => Some(SettlementResult {
                    status: SettlementStatus::Settled,
                    receipt: Some(receipt.clone()),
                }),
                MobileMoneyState::Declined { .. } | MobileMoneyState::TimedOut { .. } => {
                    Some(SettlementResult {
                        status: SettlementStatus::Failed,
                        receipt: None,
                    })
                }
                MobileMoneyState::Abandoned(_) => Some(SettlementResult {
                    status: SettlementStatus::Abandoned,
                    receipt: None,
                }),
                MobileMoneyState::Idle | MobileMoneyState::PushSent(_) => None,
            },
        }
    }
}
