mod support;

use support::TestApp;
use vpnshop_db::ReferralStore;
use vpnshop_db::models::purchase::InvoiceType;
use vpnshop_panel::bot::{Sender, handle_text};

fn sender(telegram_id: i64) -> Sender {
    Sender {
        telegram_id,
        language: "en".into(),
        username: None,
    }
}

async fn paid_purchase(app: &TestApp, telegram_id: i64, amount: i64) -> i64 {
    let customer = app.customer(telegram_id).await;
    let invoice = app
        .state
        .pay_service
        .create_purchase(amount, 1, &customer, InvoiceType::Crypto, None)
        .await
        .expect("invoice");
    invoice.purchase_id
}

#[tokio::test]
async fn start_payload_registers_referral_and_bonus_is_paid_once() {
    let app = TestApp::new();
    app.customer(42).await;

    let reply = handle_text(&app.state, &sender(4200), "/start ref_42").await;
    assert!(reply.is_some());
    let referral = ReferralStore::find_by_referee(app.store.as_ref(), 4200)
        .await
        .expect("lookup")
        .expect("referral");
    assert_eq!(referral.referrer_id, 42);
    assert!(!referral.bonus_granted);

    let purchase_id = paid_purchase(&app, 4200, 10_000).await;
    let pay = &app.state.pay_service;
    pay.process_purchase_by_id(purchase_id).await.expect("process");
    pay.process_purchase_by_id(purchase_id).await.expect("retry");

    let second = paid_purchase(&app, 4200, 5_000).await;
    pay.process_purchase_by_id(second).await.expect("second purchase");

    assert_eq!(app.balance(42).await, 15_000);
    assert_eq!(app.messenger.sent_to(42).await.len(), 1);
    assert!(
        ReferralStore::find_by_referee(app.store.as_ref(), 4200)
            .await
            .expect("lookup")
            .expect("referral")
            .bonus_granted
    );
    assert_eq!(
        app.state.referral_service.referral_count(42).await.expect("count"),
        1
    );
}

#[tokio::test]
async fn concurrent_completions_pay_the_referrer_once() {
    let app = TestApp::new();
    let referrer = app.customer(43).await;
    let (referee, created) = vpnshop_db::CustomerStore::get_or_create(app.store.as_ref(), 4300, "en")
        .await
        .expect("referee");
    app.state
        .referral_service
        .register_from_start(&referee, created, "ref_43")
        .await
        .expect("register")
        .expect("referral");

    let mut purchases = Vec::new();
    for _ in 0..4 {
        purchases.push(paid_purchase(&app, 4300, 1_000).await);
    }
    let mut tasks = Vec::new();
    for id in purchases {
        let pay = app.state.pay_service.clone();
        tasks.push(tokio::spawn(async move { pay.process_purchase_by_id(id).await }));
    }
    for task in tasks {
        task.await.expect("join").expect("process");
    }

    assert_eq!(app.balance(referrer.telegram_id).await, 15_000);
    assert_eq!(app.balance(4300).await, 4_000);
}

#[tokio::test]
async fn referral_is_ignored_for_existing_self_or_unknown() {
    let app = TestApp::new();
    app.customer(44).await;

    // Existing customer: the first /start already created them.
    handle_text(&app.state, &sender(4400), "/start").await;
    handle_text(&app.state, &sender(4400), "/start ref_44").await;
    // Self referral and unknown referrer.
    handle_text(&app.state, &sender(4401), "/start ref_4401").await;
    handle_text(&app.state, &sender(4402), "/start ref_999999").await;

    for referee in [4400, 4401, 4402] {
        assert!(
            ReferralStore::find_by_referee(app.store.as_ref(), referee)
                .await
                .expect("lookup")
                .is_none()
        );
    }
}

#[tokio::test]
async fn promo_command_reports_user_mistakes() {
    let app = TestApp::new();
    let reply = handle_text(&app.state, &sender(45), "/promo NOPE-NOPE-NOPE")
        .await
        .expect("reply");
    assert!(reply.text.contains("invalid"));
}
