#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use tokio::sync::Mutex;
use tower::ServiceExt;
use vpnshop_db::models::customer::Customer;
use vpnshop_db::models::purchase::{InvoiceType, NewPurchase, Purchase, SettleOutcome};
use vpnshop_db::error::StoreResult;
use vpnshop_db::{CustomerStore, MemoryStore, PurchaseStore, StoreError, Stores};

use vpnshop_panel::AppState;
use vpnshop_panel::config::{Config, CryptoPayConfig, TributeConfig};
use vpnshop_panel::services::messenger::Messenger;
use vpnshop_panel::services::payment::crypto_pay::{CryptoInvoice, CryptoInvoiceApi};
use vpnshop_panel::services::provisioning::{ProvisionedAccess, Provisioner};

pub const TRIBUTE_SECRET: &str = "tribute-secret";
pub const CRYPTO_TOKEN: &str = "crypto-token";
pub const ADMIN_ID: i64 = 1;

#[derive(Default)]
pub struct FakeMessenger {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub deleted: Mutex<Vec<(i64, i32)>>,
    pub invoices: Mutex<Vec<String>>,
    next_id: AtomicI64,
}

impl FakeMessenger {
    pub async fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32> {
        self.sent.lock().await.push((chat_id, text.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) as i32 + 1)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.deleted.lock().await.push((chat_id, message_id));
        Ok(())
    }

    async fn create_invoice_link(
        &self,
        _title: &str,
        _description: &str,
        payload: &str,
        _stars_amount: u32,
    ) -> Result<String> {
        self.invoices.lock().await.push(payload.to_string());
        Ok(format!("https://t.me/invoice/{payload}"))
    }
}

#[derive(Default)]
pub struct FakeProvisioner {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub granted_days: Mutex<Vec<i32>>,
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn create_or_update_user(
        &self,
        telegram_id: i64,
        _traffic_limit_bytes: i64,
        days: i32,
    ) -> Result<ProvisionedAccess> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("provisioning unavailable");
        }
        self.granted_days.lock().await.push(days);
        Ok(ProvisionedAccess {
            link: format!("https://vpn.example/sub/{telegram_id}"),
            expires_at: Utc::now() + chrono::Duration::days(i64::from(days)),
        })
    }

    async fn get_usage(
        &self,
        _user_ref: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<i64> {
        Ok(0)
    }
}

#[derive(Default)]
pub struct FakeCryptoApi {
    pub created: AtomicI64,
    pub fail: AtomicBool,
}

#[async_trait]
impl CryptoInvoiceApi for FakeCryptoApi {
    async fn create_invoice(
        &self,
        _amount: i64,
        _currency: &str,
        payload: &str,
        _description: &str,
    ) -> Result<CryptoInvoice> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("crypto api down");
        }
        let invoice_id = self.created.fetch_add(1, Ordering::SeqCst) + 1000;
        Ok(CryptoInvoice {
            invoice_id,
            pay_url: format!("https://t.me/CryptoBot?start={payload}"),
        })
    }
}

/// Purchase store whose `settle` can commit and then report a failure, as when
/// the connection drops before the commit is acknowledged.
pub struct FlakyPurchases {
    inner: Arc<MemoryStore>,
    pub fail_after_settle: AtomicBool,
}

impl FlakyPurchases {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_after_settle: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PurchaseStore for FlakyPurchases {
    async fn create(&self, purchase: NewPurchase) -> StoreResult<Purchase> {
        PurchaseStore::create(self.inner.as_ref(), purchase).await
    }

    async fn create_external(
        &self,
        purchase: NewPurchase,
        external_id: &str,
    ) -> StoreResult<Purchase> {
        self.inner.create_external(purchase, external_id).await
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Purchase>> {
        PurchaseStore::find_by_id(self.inner.as_ref(), id).await
    }

    async fn set_invoice(&self, id: i64, external_id: &str, payment_url: &str) -> StoreResult<()> {
        self.inner.set_invoice(id, external_id, payment_url).await
    }

    async fn settle(&self, id: i64) -> StoreResult<SettleOutcome> {
        let outcome = self.inner.settle(id).await?;
        if self.fail_after_settle.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict("connection reset after commit".into()));
        }
        Ok(outcome)
    }

    async fn cancel(&self, id: i64) -> StoreResult<bool> {
        self.inner.cancel(id).await
    }

    async fn find_stale_pending(&self, created_before: DateTime<Utc>) -> StoreResult<Vec<Purchase>> {
        self.inner.find_stale_pending(created_before).await
    }

    async fn find_pending_by_customer(
        &self,
        customer_id: i64,
        invoice_type: InvoiceType,
    ) -> StoreResult<Vec<Purchase>> {
        self.inner.find_pending_by_customer(customer_id, invoice_type).await
    }
}

pub fn test_config() -> Config {
    Config {
        admin_telegram_id: ADMIN_ID,
        referral_bonus: 15_000,
        crypto_pay: Some(CryptoPayConfig {
            token: CRYPTO_TOKEN.into(),
            url: "https://pay.invalid".into(),
        }),
        stars_enabled: true,
        tribute: Some(TributeConfig {
            api_key: TRIBUTE_SECRET.into(),
            payment_url: "https://t.me/tribute/app".into(),
        }),
        message_cache_ttl: Duration::from_secs(60),
        ..Config::default()
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub purchases: Arc<FlakyPurchases>,
    pub messenger: Arc<FakeMessenger>,
    pub provisioner: Arc<FakeProvisioner>,
    pub crypto: Arc<FakeCryptoApi>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let purchases = Arc::new(FlakyPurchases::new(store.clone()));
        let messenger = Arc::new(FakeMessenger::default());
        let provisioner = Arc::new(FakeProvisioner::default());
        let crypto = Arc::new(FakeCryptoApi::default());
        let state = AppState::new(
            config,
            Stores {
                purchases: purchases.clone() as Arc<dyn PurchaseStore>,
                ..Stores::memory(store.clone())
            },
            provisioner.clone(),
            messenger.clone(),
            Some(crypto.clone() as Arc<dyn CryptoInvoiceApi>),
        );
        Self {
            state,
            store,
            purchases,
            messenger,
            provisioner,
            crypto,
        }
    }

    pub async fn customer(&self, telegram_id: i64) -> Customer {
        CustomerStore::get_or_create(self.store.as_ref(), telegram_id, "en")
            .await
            .expect("customer")
            .0
    }

    pub async fn balance(&self, telegram_id: i64) -> i64 {
        CustomerStore::find_by_telegram_id(self.store.as_ref(), telegram_id)
            .await
            .expect("lookup")
            .map(|c| c.balance)
            .unwrap_or_default()
    }

    pub async fn fund(&self, telegram_id: i64, amount: i64) -> Customer {
        let customer = self.customer(telegram_id).await;
        CustomerStore::add_balance(self.store.as_ref(), customer.id, amount)
            .await
            .expect("fund");
        customer
    }

    pub async fn post(&self, uri: &str, headers: &[(&str, &str)], body: &[u8]) -> (StatusCode, String) {
        let mut request = Request::builder().method("POST").uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let request = request.body(Body::from(body.to_vec())).expect("request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = vpnshop_panel::router(self.state.clone())
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub fn sign(secret: &[u8], body: &[u8]) -> String {
    vpnshop_panel::webhook::sign(secret, body)
}
