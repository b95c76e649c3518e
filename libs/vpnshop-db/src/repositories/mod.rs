//! Persistence interface used by the shop services.
//!
//! Every method that mutates money or counters is atomic at the storage layer:
//! balances move with relative `balance = balance + $n` updates, status changes and
//! use counters are compare-and-swap updates checked through affected rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::customer::Customer;
use crate::models::promo::{ClaimOutcome, NewPromocode, Promocode};
use crate::models::purchase::{InvoiceType, NewPurchase, Purchase, SettleOutcome};
use crate::models::referral::Referral;

pub mod customer_repo;
pub mod promo_repo;
pub mod purchase_repo;
pub mod referral_repo;

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Customer>>;

    async fn find_by_telegram_id(&self, telegram_id: i64) -> StoreResult<Option<Customer>>;

    /// Returns the customer and whether this call created it.
    async fn get_or_create(&self, telegram_id: i64, language: &str)
    -> StoreResult<(Customer, bool)>;

    async fn add_balance(&self, id: i64, delta: i64) -> StoreResult<()>;

    /// Debits `amount` only if the balance covers it. `false` means nothing changed.
    /// Non-positive amounts are rejected with `Conflict`.
    async fn try_debit(&self, id: i64, amount: i64) -> StoreResult<bool>;

    async fn update_subscription(
        &self,
        id: i64,
        expire_at: DateTime<Utc>,
        link: &str,
    ) -> StoreResult<()>;

    async fn update_language(&self, id: i64, language: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn create(&self, purchase: NewPurchase) -> StoreResult<Purchase>;

    /// Creates a purchase keyed by a provider delivery. When a purchase with the
    /// same invoice type and `external_id` already exists, that row is returned
    /// unchanged.
    async fn create_external(&self, purchase: NewPurchase, external_id: &str)
    -> StoreResult<Purchase>;

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Purchase>>;

    /// Stores provider correlation and moves a non-terminal purchase to `pending`.
    async fn set_invoice(&self, id: i64, external_id: &str, payment_url: &str)
    -> StoreResult<()>;

    /// Flips the purchase to `paid` and credits its owner in one transaction.
    async fn settle(&self, id: i64) -> StoreResult<SettleOutcome>;

    /// `false` if the purchase was already terminal.
    async fn cancel(&self, id: i64) -> StoreResult<bool>;

    async fn find_stale_pending(&self, created_before: DateTime<Utc>)
    -> StoreResult<Vec<Purchase>>;

    async fn find_pending_by_customer(
        &self,
        customer_id: i64,
        invoice_type: InvoiceType,
    ) -> StoreResult<Vec<Purchase>>;
}

#[async_trait]
pub trait PromoStore: Send + Sync {
    async fn create(&self, promo: NewPromocode) -> StoreResult<Promocode>;

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Promocode>>;

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Promocode>>;

    async fn list(&self, include_deleted: bool) -> StoreResult<Vec<Promocode>>;

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<bool>;

    async fn soft_delete(&self, id: i64) -> StoreResult<bool>;

    /// Reserves one use and appends the usage row in a single transaction.
    async fn claim_use(&self, promocode_id: i64, customer_id: i64) -> StoreResult<ClaimOutcome>;

    /// Undoes a claim whose grant could not be applied.
    async fn release_use(&self, usage_id: i64) -> StoreResult<()>;

    async fn usage_count(&self, promocode_id: i64) -> StoreResult<i64>;
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// `None` when the referee already has a referrer.
    async fn create(&self, referrer_id: i64, referee_id: i64) -> StoreResult<Option<Referral>>;

    async fn find_by_referee(&self, referee_id: i64) -> StoreResult<Option<Referral>>;

    /// Flips `bonus_granted` and credits the referrer. `None` if there is no
    /// referral for this referee or the bonus was already granted.
    async fn grant_bonus(&self, referee_id: i64, amount: i64) -> StoreResult<Option<Referral>>;

    async fn count_by_referrer(&self, referrer_id: i64) -> StoreResult<i64>;
}
