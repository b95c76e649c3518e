mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use support::TestApp;
use vpnshop_db::PurchaseStore;
use vpnshop_db::models::purchase::{InvoiceType, PurchaseStatus};
use vpnshop_panel::error::ShopError;
use vpnshop_panel::services::pay_service::{BalancePurchase, ProcessOutcome};

async fn purchase_status(app: &TestApp, id: i64) -> PurchaseStatus {
    PurchaseStore::find_by_id(app.store.as_ref(), id)
        .await
        .expect("lookup")
        .expect("purchase")
        .status
}

#[tokio::test]
async fn crypto_purchase_settles_once() {
    let app = TestApp::new();
    let customer = app.customer(500).await;
    let pay = &app.state.pay_service;

    let invoice = pay
        .create_purchase(500, 3, &customer, InvoiceType::Crypto, None)
        .await
        .expect("invoice");
    assert_eq!(purchase_status(&app, invoice.purchase_id).await, PurchaseStatus::Pending);
    assert!(invoice.payment_url.contains(&invoice.purchase_id.to_string()));

    let first = pay.process_purchase_by_id(invoice.purchase_id).await.expect("process");
    assert!(matches!(first, ProcessOutcome::Completed(ref p) if p.amount == 500));
    assert_eq!(app.balance(500).await, 500);
    assert_eq!(purchase_status(&app, invoice.purchase_id).await, PurchaseStatus::Paid);

    let again = pay.process_purchase_by_id(invoice.purchase_id).await.expect("reprocess");
    assert_eq!(again, ProcessOutcome::AlreadyPaid);
    assert_eq!(app.balance(500).await, 500);
}

#[tokio::test]
async fn concurrent_completions_credit_exactly_once() {
    let app = TestApp::new();
    let customer = app.customer(501).await;
    let invoice = app
        .state
        .pay_service
        .create_purchase(700, 1, &customer, InvoiceType::Crypto, None)
        .await
        .expect("invoice");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pay = app.state.pay_service.clone();
        let id = invoice.purchase_id;
        tasks.push(tokio::spawn(async move { pay.process_purchase_by_id(id).await }));
    }
    let mut completed = 0;
    for task in tasks {
        if let ProcessOutcome::Completed(_) = task.await.expect("join").expect("process") {
            completed += 1;
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(app.balance(501).await, 700);
}

#[tokio::test]
async fn unknown_purchase_is_not_found() {
    let app = TestApp::new();
    let err = app.state.pay_service.process_purchase_by_id(999).await.unwrap_err();
    assert!(matches!(err, ShopError::NotFound(_)));
}

#[tokio::test]
async fn disabled_provider_is_rejected() {
    let mut config = support::test_config();
    config.stars_enabled = false;
    let app = TestApp::with_config(config);
    let customer = app.customer(502).await;

    let err = app
        .state
        .pay_service
        .create_purchase(100, 1, &customer, InvoiceType::Stars, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShopError::ProviderDisabled(InvoiceType::Stars)));
}

#[tokio::test]
async fn failed_invoice_mint_leaves_purchase_unpaid() {
    let app = TestApp::new();
    app.crypto.fail.store(true, Ordering::SeqCst);
    let customer = app.customer(503).await;

    let err = app
        .state
        .pay_service
        .create_purchase(100, 1, &customer, InvoiceType::Crypto, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShopError::External(_)));
    assert_eq!(app.balance(503).await, 0);
}

#[tokio::test]
async fn cancelled_purchase_is_never_paid() {
    let app = TestApp::new();
    let customer = app.customer(504).await;
    let pay = &app.state.pay_service;
    let invoice = pay
        .create_purchase(300, 1, &customer, InvoiceType::Crypto, None)
        .await
        .expect("invoice");

    assert!(pay.cancel_payment(invoice.purchase_id).await.expect("cancel"));
    assert!(!pay.cancel_payment(invoice.purchase_id).await.expect("cancel again"));

    let outcome = pay.process_purchase_by_id(invoice.purchase_id).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Cancelled);
    assert_eq!(app.balance(504).await, 0);
}

#[tokio::test]
async fn stars_payment_deletes_the_prompt() {
    let app = TestApp::new();
    let customer = app.customer(505).await;
    let pay = &app.state.pay_service;

    let invoice = pay
        .create_purchase(10_000, 1, &customer, InvoiceType::Stars, Some("bob".into()))
        .await
        .expect("invoice");
    let payload = app.messenger.invoices.lock().await[0].clone();
    assert_eq!(payload, format!("{}&bob", invoice.purchase_id));

    pay.remember_payment_prompt(invoice.purchase_id, 505, 77);
    let outcome = pay.handle_successful_payment(&payload).await.expect("payment");

    assert!(matches!(outcome, ProcessOutcome::Completed(_)));
    assert_eq!(app.balance(505).await, 10_000);
    assert_eq!(*app.messenger.deleted.lock().await, vec![(505, 77)]);
    assert!(app.state.message_cache.get(invoice.purchase_id).is_none());
    assert_eq!(app.messenger.sent_to(505).await.len(), 1);
}

#[tokio::test]
async fn balance_purchase_activates_subscription() {
    let app = TestApp::new();
    let customer = app.fund(506, 30_000).await;

    let outcome = app
        .state
        .pay_service
        .purchase_from_balance(customer.id, 3)
        .await
        .expect("purchase");

    let BalancePurchase::Activated(access) = outcome else {
        panic!("expected activation");
    };
    assert!(access.expires_at > Utc::now() + chrono::Duration::days(89));
    assert_eq!(app.balance(506).await, 3_000);
    assert_eq!(*app.provisioner.granted_days.lock().await, vec![90]);
}

#[tokio::test]
async fn insufficient_balance_is_a_soft_failure() {
    let app = TestApp::new();
    let customer = app.fund(507, 500).await;

    let outcome = app
        .state
        .pay_service
        .purchase_from_balance(customer.id, 1)
        .await
        .expect("soft failure");

    assert_eq!(
        outcome,
        BalancePurchase::InsufficientBalance {
            price: 10_000,
            balance: 500
        }
    );
    assert_eq!(app.balance(507).await, 500);
    assert_eq!(app.provisioner.calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.messenger.sent_to(507).await.len(), 1);
}

#[tokio::test]
async fn failed_provisioning_refunds_the_debit() {
    let app = TestApp::new();
    let customer = app.fund(508, 20_000).await;
    app.provisioner.fail.store(true, Ordering::SeqCst);

    let err = app
        .state
        .pay_service
        .purchase_from_balance(customer.id, 1)
        .await
        .unwrap_err();

    assert!(matches!(err, ShopError::External(_)));
    assert_eq!(app.balance(508).await, 20_000);
}

#[tokio::test]
async fn stale_purchases_are_cancelled() {
    let app = TestApp::new();
    let customer = app.customer(509).await;
    let pay = &app.state.pay_service;
    let old = pay
        .create_purchase(100, 1, &customer, InvoiceType::Crypto, None)
        .await
        .expect("old");
    let fresh = pay
        .create_purchase(100, 1, &customer, InvoiceType::Crypto, None)
        .await
        .expect("fresh");
    app.store
        .set_purchase_created_at(old.purchase_id, Utc::now() - chrono::Duration::hours(3))
        .await;

    let cancelled = pay
        .cancel_stale_purchases(Duration::from_secs(3600))
        .await
        .expect("sweep");

    assert_eq!(cancelled, 1);
    assert_eq!(purchase_status(&app, old.purchase_id).await, PurchaseStatus::Cancel);
    assert_eq!(purchase_status(&app, fresh.purchase_id).await, PurchaseStatus::Pending);
}
