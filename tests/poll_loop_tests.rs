mod common;

use common::{ring_up_standard_basket, till};
use std::time::Duration;
use till::application::poller::PollPolicy;
use till::application::settler::{MobileMoneyState, PaymentSettler};
use till::application::session::SessionState;
use till::domain::money::Money;
use till::domain::payment::PaymentMethod;
use till::error::CheckoutError;
use till::infrastructure::in_memory::ScriptStep;
use tokio::time::Instant;

fn fixed(interval_secs: u64, max_wait_secs: u64) -> PollPolicy {
    PollPolicy::new()
        .with_interval(Duration::from_secs(interval_secs))
        .with_backoff_multiplier(1.0)
        .with_max_wait(Duration::from_secs(max_wait_secs))
}

async fn pushed(script: Vec<ScriptStep>) -> common::Till {
    let mut till = till(script);
    ring_up_standard_basket(&mut till).await;
    till.session.checkout(PaymentMethod::MobileMoney).await.unwrap();
    till.session.send_push("0712345678").await.unwrap();
    till
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_after_pending_polls() {
    let mut till = pushed(vec![
        ScriptStep::pending(),
        ScriptStep::pending(),
        ScriptStep::success(),
    ])
    .await;
    let start = Instant::now();

    let receipt = till.session.await_payment(&fixed(3, 120)).await.unwrap();
    assert_eq!(receipt.total, Money::from_minor(29_000));
    assert_eq!(till.gateway.queries_made().await, 3);
    assert_eq!(start.elapsed(), Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn test_query_errors_do_not_end_the_wait() {
    let mut till = pushed(vec![
        ScriptStep::transport_error(),
        ScriptStep::pending(),
        ScriptStep::transport_error(),
        ScriptStep::success(),
    ])
    .await;

    let receipt = till.session.await_payment(&fixed(2, 60)).await.unwrap();
    assert_eq!(receipt.external_ref.unwrap().as_str(), "ws_1");
    assert_eq!(till.gateway.queries_made().await, 4);
}

#[tokio::test(start_paused = true)]
async fn test_decline_ends_the_wait() {
    let mut till = pushed(vec![ScriptStep::pending(), ScriptStep::cancelled()]).await;

    let err = till.session.await_payment(&fixed(3, 120)).await.unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentDeclined { ref code, .. } if code == "1032"));
    assert!(matches!(till.session.state(), SessionState::Failed { .. }));
    assert_eq!(till.gateway.queries_made().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_customer_ends_the_wait() {
    let mut till = pushed(vec![ScriptStep::unreachable()]).await;

    let err = till.session.await_payment(&fixed(3, 120)).await.unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentTimedOut { .. }));
    assert_eq!(till.session.state().name(), "failed");
}

#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_abandons_push() {
    let mut till = pushed(vec![]).await;
    let start = Instant::now();

    let policy = PollPolicy::new()
        .with_interval(Duration::from_secs(2))
        .with_backoff_multiplier(2.0)
        .with_max_interval(Duration::from_secs(5))
        .with_max_wait(Duration::from_secs(20));
    let err = till.session.await_payment(&policy).await.unwrap_err();

    assert!(matches!(err, CheckoutError::PaymentAbandoned { .. }));
    // Delays 2, 4, 5, 5, 4.
    assert_eq!(till.gateway.queries_made().await, 5);
    assert_eq!(start.elapsed(), Duration::from_secs(20));

    match till.session.state() {
        SessionState::PaymentAbandoned(PaymentSettler::MobileMoney(settler)) => {
            assert!(matches!(settler.state(), MobileMoneyState::Abandoned(_)));
        }
        other => panic!("expected payment abandoned, got {}", other.name()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_new_push_after_abandon() {
    let mut till = pushed(vec![]).await;
    let err = till.session.await_payment(&fixed(5, 10)).await.unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentAbandoned { .. }));

    till.gateway.push_script(vec![ScriptStep::success()]).await;
    let second = till.session.send_push("0712345678").await.unwrap();
    assert_eq!(second.as_str(), "ws_2");

    let receipt = till.session.await_payment(&fixed(5, 10)).await.unwrap();
    assert_eq!(receipt.external_ref, Some(second));
}

#[tokio::test]
async fn test_await_without_push_is_refused() {
    let mut till = till(vec![]);
    ring_up_standard_basket(&mut till).await;
    till.session.checkout(PaymentMethod::MobileMoney).await.unwrap();

    let err = till.session.await_payment(&fixed(1, 5)).await.unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidTransition { .. }));
    assert_eq!(till.gateway.queries_made().await, 0);
}
