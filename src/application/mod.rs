//! Checkout orchestration.
//!
//! [`session::CheckoutSession`] drives one sale at a time through order
//! submission and settlement. The submitter and settlers talk to the backend
//! and gateway only through the ports in [`crate::domain::ports`].

pub mod poller;
pub mod session;
pub mod settler;
pub mod submitter;
