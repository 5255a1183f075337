use crate::domain::cart::ProductId;
use crate::domain::money::Money;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Broad classes of failure a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any network call. Nothing changed.
    Validation,
    /// Terminal for the current attempt; the cashier has to act.
    BusinessRule,
    /// Safe to retry the same operation. Never a verdict.
    Transient,
    /// A contract between components was broken.
    FatalInconsistency,
}

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid product: {0}")]
    InvalidProduct(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid phone number '{0}': expected 0XXXXXXXXX or +<country><number>")]
    InvalidPhoneNumber(String),
    #[error("Product {0} is not in the cart")]
    LineNotFound(ProductId),
    #[error("Cart is empty")]
    EmptyCart,
    #[error("Cannot {action} while the sale is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error("No mobile-money push is in flight")]
    NoPushInFlight,

    #[error("Insufficient stock for {}; no stock was reserved, edit the cart", display_ids(.0))]
    InsufficientStock(Vec<ProductId>),
    #[error("Tendered {tendered} is less than the total {total}; no payment was recorded")]
    InsufficientTender { tendered: Money, total: Money },
    #[error("Payment declined by the gateway ({code}: {description}); the customer was not charged")]
    PaymentDeclined { code: String, description: String },
    #[error("Customer did not respond to the push ({code}: {description}); the customer was not charged")]
    PaymentTimedOut { code: String, description: String },
    #[error(
        "Stopped waiting for payment {external_ref}; the customer may still approve it, reconcile order {order_number} before taking payment again"
    )]
    PaymentAbandoned {
        external_ref: String,
        order_number: String,
    },
    #[error(
        "Push {external_ref} was abandoned and may still be approved; confirm it was not paid before taking payment another way"
    )]
    UnconfirmedAbandonedPush { external_ref: String },
    #[error("A push is already in flight for order {0}; wait for it or abandon it first")]
    PushAlreadyInFlight(String),
    #[error("Order {0} is already paid")]
    AlreadySettled(String),

    #[error(
        "Could not query the payment gateway: {0}; payment status is unknown, the push is still in flight"
    )]
    QueryError(String),
    #[error("Service unavailable: {0}; nothing was recorded, the request can be retried")]
    BackendUnavailable(String),

    #[error("Inconsistent state: {0}")]
    FatalInconsistency(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ::config::ConfigError),
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::InvalidProduct(_)
            | Self::InvalidAmount(_)
            | Self::InvalidPhoneNumber(_)
            | Self::LineNotFound(_)
            | Self::EmptyCart
            | Self::InvalidTransition { .. }
            | Self::NoPushInFlight
            | Self::CsvError(_)
            | Self::ConfigError(_) => ErrorKind::Validation,
            Self::InsufficientStock(_)
            | Self::InsufficientTender { .. }
            | Self::PaymentDeclined { .. }
            | Self::PaymentTimedOut { .. }
            | Self::PaymentAbandoned { .. }
            | Self::UnconfirmedAbandonedPush { .. }
            | Self::PushAlreadyInFlight(_)
            | Self::AlreadySettled(_) => ErrorKind::BusinessRule,
            Self::QueryError(_) | Self::BackendUnavailable(_) | Self::IoError(_) => {
                ErrorKind::Transient
            }
            Self::FatalInconsistency(_) => ErrorKind::FatalInconsistency,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

fn display_ids(ids: &[ProductId]) -> String {
    ids.iter()
        .map(ProductId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
