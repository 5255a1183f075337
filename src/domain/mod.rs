//! Sale data model: money, cart, orders, payment attempts, receipts, and the
//! contracts of the services the terminal talks to.

pub mod cart;
pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod receipt;
