//! In-process store with the same atomicity guarantees as the Postgres
//! repositories. Used by tests and by local runs without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::models::customer::Customer;
use crate::models::promo::{ClaimOutcome, NewPromocode, Promocode, PromocodeUsage, PromoUses};
use crate::models::purchase::{
    InvoiceType, NewPurchase, Purchase, PurchaseStatus, SettleOutcome,
};
use crate::models::referral::Referral;
use crate::repositories::{CustomerStore, PromoStore, PurchaseStore, ReferralStore};

#[derive(Default)]
struct Tables {
    next_id: i64,
    customers: HashMap<i64, Customer>,
    purchases: HashMap<i64, Purchase>,
    promocodes: HashMap<i64, Promocode>,
    usages: HashMap<i64, PromocodeUsage>,
    referrals: HashMap<i64, Referral>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_purchase(
        &mut self,
        purchase: NewPurchase,
        external_id: Option<String>,
    ) -> StoreResult<Purchase> {
        if !self.customers.contains_key(&purchase.customer_id) {
            return Err(StoreError::not_found("customer", purchase.customer_id));
        }
        let id = self.next_id();
        let row = Purchase {
            id,
            amount: purchase.amount,
            currency: purchase.currency,
            customer_id: purchase.customer_id,
            month: purchase.month,
            invoice_type: purchase.invoice_type,
            status: purchase.status,
            created_at: Utc::now(),
            paid_at: None,
            external_id,
            payment_url: None,
        };
        self.purchases.insert(id, row.clone());
        Ok(row)
    }

    fn customer_by_telegram_mut(&mut self, telegram_id: i64) -> Option<&mut Customer> {
        self.customers
            .values_mut()
            .find(|c| c.telegram_id == telegram_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All usage rows for a promocode, oldest first.
    pub async fn usages_of(&self, promocode_id: i64) -> Vec<PromocodeUsage> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .usages
            .values()
            .filter(|u| u.promocode_id == promocode_id)
            .cloned()
            .collect();
        rows.sort_by_key(|u| u.id);
        rows
    }

    /// Test hook for backdating purchases.
    pub async fn set_purchase_created_at(&self, id: i64, created_at: DateTime<Utc>) {
        if let Some(p) = self.tables.lock().await.purchases.get_mut(&id) {
            p.created_at = created_at;
        }
    }
}

#[async_trait]
impl CustomerStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Customer>> {
        Ok(self.tables.lock().await.customers.get(&id).cloned())
    }

    async fn find_by_telegram_id(&self, telegram_id: i64) -> StoreResult<Option<Customer>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .customers
            .values()
            .find(|c| c.telegram_id == telegram_id)
            .cloned())
    }

    async fn get_or_create(
        &self,
        telegram_id: i64,
        language: &str,
    ) -> StoreResult<(Customer, bool)> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.customer_by_telegram_mut(telegram_id) {
            return Ok((existing.clone(), false));
        }
        let id = tables.next_id();
        let customer = Customer {
            id,
            telegram_id,
            language: language.to_string(),
            balance: 0,
            expire_at: None,
            subscription_link: None,
            created_at: Utc::now(),
        };
        tables.customers.insert(id, customer.clone());
        Ok((customer, true))
    }

    async fn add_balance(&self, id: i64, delta: i64) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let customer = tables
            .customers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("customer", id))?;
        if customer.balance + delta < 0 {
            return Err(StoreError::Conflict(format!(
                "balance of customer {id} would become negative"
            )));
        }
        customer.balance += delta;
        Ok(())
    }

    async fn try_debit(&self, id: i64, amount: i64) -> StoreResult<bool> {
        if amount <= 0 {
            return Err(StoreError::Conflict(format!("debit amount {amount} must be positive")));
        }
        let mut tables = self.tables.lock().await;
        match tables.customers.get_mut(&id) {
            Some(c) if c.balance >= amount => {
                c.balance -= amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_subscription(
        &self,
        id: i64,
        expire_at: DateTime<Utc>,
        link: &str,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(c) = tables.customers.get_mut(&id) {
            c.expire_at = Some(expire_at);
            c.subscription_link = Some(link.to_string());
        }
        Ok(())
    }

    async fn update_language(&self, id: i64, language: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(c) = tables.customers.get_mut(&id) {
            c.language = language.to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl PurchaseStore for MemoryStore {
    async fn create(&self, purchase: NewPurchase) -> StoreResult<Purchase> {
        let mut tables = self.tables.lock().await;
        tables.insert_purchase(purchase, None)
    }

    async fn create_external(
        &self,
        purchase: NewPurchase,
        external_id: &str,
    ) -> StoreResult<Purchase> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.purchases.values().find(|p| {
            p.invoice_type == purchase.invoice_type && p.external_id.as_deref() == Some(external_id)
        }) {
            return Ok(existing.clone());
        }
        tables.insert_purchase(purchase, Some(external_id.to_string()))
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Purchase>> {
        Ok(self.tables.lock().await.purchases.get(&id).cloned())
    }

    async fn set_invoice(
        &self,
        id: i64,
        external_id: &str,
        payment_url: &str,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let purchase = tables
            .purchases
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("purchase", id))?;
        if purchase.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "purchase {} is already {}",
                id,
                purchase.status.as_str()
            )));
        }
        purchase.external_id = Some(external_id.to_string());
        purchase.payment_url = Some(payment_url.to_string());
        purchase.status = PurchaseStatus::Pending;
        Ok(())
    }

    async fn settle(&self, id: i64) -> StoreResult<SettleOutcome> {
        let mut tables = self.tables.lock().await;
        let purchase = tables
            .purchases
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("purchase", id))?;
        match purchase.status {
            PurchaseStatus::Paid => return Ok(SettleOutcome::AlreadyPaid(purchase)),
            PurchaseStatus::Cancel => return Ok(SettleOutcome::Cancelled(purchase)),
            PurchaseStatus::New | PurchaseStatus::Pending => {}
        }

        let customer = tables
            .customers
            .get_mut(&purchase.customer_id)
            .ok_or_else(|| StoreError::not_found("customer", purchase.customer_id))?;
        customer.balance += purchase.amount;

        let row = tables
            .purchases
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("purchase", id))?;
        row.status = PurchaseStatus::Paid;
        row.paid_at = Some(Utc::now());
        Ok(SettleOutcome::Settled(row.clone()))
    }

    async fn cancel(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let purchase = tables
            .purchases
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("purchase", id))?;
        if purchase.status.is_terminal() {
            return Ok(false);
        }
        purchase.status = PurchaseStatus::Cancel;
        Ok(true)
    }

    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Purchase>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .purchases
            .values()
            .filter(|p| !p.status.is_terminal() && p.created_at < created_before)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_at);
        Ok(rows)
    }

    async fn find_pending_by_customer(
        &self,
        customer_id: i64,
        invoice_type: InvoiceType,
    ) -> StoreResult<Vec<Purchase>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .purchases
            .values()
            .filter(|p| {
                p.customer_id == customer_id
                    && p.invoice_type == invoice_type
                    && !p.status.is_terminal()
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl PromoStore for MemoryStore {
    async fn create(&self, promo: NewPromocode) -> StoreResult<Promocode> {
        let mut tables = self.tables.lock().await;
        if tables.promocodes.values().any(|p| p.code == promo.code) {
            return Err(StoreError::Conflict(format!(
                "promocode {} already exists",
                promo.code
            )));
        }
        let id = tables.next_id();
        let row = Promocode {
            id,
            code: promo.code,
            kind: promo.kind,
            days: promo.days,
            months: promo.months,
            amount: promo.amount,
            uses: promo.uses,
            created_by: promo.created_by,
            active: true,
            deleted: false,
            created_at: Utc::now(),
        };
        tables.promocodes.insert(id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Promocode>> {
        Ok(self.tables.lock().await.promocodes.get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Promocode>> {
        let tables = self.tables.lock().await;
        Ok(tables.promocodes.values().find(|p| p.code == code).cloned())
    }

    async fn list(&self, include_deleted: bool) -> StoreResult<Vec<Promocode>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .promocodes
            .values()
            .filter(|p| include_deleted || !p.deleted)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.promocodes.get_mut(&id) {
            Some(p) if !p.deleted => {
                p.active = active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.promocodes.get_mut(&id) {
            Some(p) if !p.deleted => {
                p.deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_use(&self, promocode_id: i64, customer_id: i64) -> StoreResult<ClaimOutcome> {
        let mut tables = self.tables.lock().await;
        match tables.promocodes.get(&promocode_id) {
            Some(p) if p.is_redeemable() => {}
            _ => return Ok(ClaimOutcome::Unavailable),
        }
        if tables
            .usages
            .values()
            .any(|u| u.promocode_id == promocode_id && u.customer_id == customer_id)
        {
            return Ok(ClaimOutcome::AlreadyUsed);
        }

        let usage_id = tables.next_id();
        if let Some(p) = tables.promocodes.get_mut(&promocode_id) {
            if let PromoUses::Limited(left) = p.uses {
                p.uses = PromoUses::Limited(left - 1);
            }
        }
        tables.usages.insert(
            usage_id,
            PromocodeUsage {
                id: usage_id,
                promocode_id,
                customer_id,
                used_at: Utc::now(),
            },
        );
        Ok(ClaimOutcome::Claimed(usage_id))
    }

    async fn release_use(&self, usage_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let usage = tables
            .usages
            .remove(&usage_id)
            .ok_or_else(|| StoreError::not_found("promocode usage", usage_id))?;
        if let Some(p) = tables.promocodes.get_mut(&usage.promocode_id) {
            if let PromoUses::Limited(left) = p.uses {
                p.uses = PromoUses::Limited(left + 1);
            }
        }
        Ok(())
    }

    async fn usage_count(&self, promocode_id: i64) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .usages
            .values()
            .filter(|u| u.promocode_id == promocode_id)
            .count() as i64)
    }
}

#[async_trait]
impl ReferralStore for MemoryStore {
    async fn create(&self, referrer_id: i64, referee_id: i64) -> StoreResult<Option<Referral>> {
        let mut tables = self.tables.lock().await;
        if tables.referrals.values().any(|r| r.referee_id == referee_id) {
            return Ok(None);
        }
        let id = tables.next_id();
        let referral = Referral {
            id,
            referrer_id,
            referee_id,
            bonus_granted: false,
            created_at: Utc::now(),
        };
        tables.referrals.insert(id, referral.clone());
        Ok(Some(referral))
    }

    async fn find_by_referee(&self, referee_id: i64) -> StoreResult<Option<Referral>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .referrals
            .values()
            .find(|r| r.referee_id == referee_id)
            .cloned())
    }

    async fn grant_bonus(&self, referee_id: i64, amount: i64) -> StoreResult<Option<Referral>> {
        let mut tables = self.tables.lock().await;
        let Some(referral) = tables
            .referrals
            .values()
            .find(|r| r.referee_id == referee_id && !r.bonus_granted)
            .cloned()
        else {
            return Ok(None);
        };

        let referrer = tables
            .customer_by_telegram_mut(referral.referrer_id)
            .ok_or_else(|| StoreError::not_found("referrer", referral.referrer_id))?;
        referrer.balance += amount;

        let row = tables
            .referrals
            .get_mut(&referral.id)
            .ok_or_else(|| StoreError::not_found("referral", referral.id))?;
        row.bonus_granted = true;
        Ok(Some(row.clone()))
    }

    async fn count_by_referrer(&self, referrer_id: i64) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::promo::PromoKind;
    use std::sync::Arc;

    async fn customer(store: &MemoryStore, telegram_id: i64) -> Customer {
        store.get_or_create(telegram_id, "en").await.unwrap().0
    }

    #[tokio::test]
    async fn settle_credits_once() {
        let store = MemoryStore::new();
        let c = customer(&store, 10).await;
        let p = PurchaseStore::create(
            &store,
            NewPurchase {
                amount: 500,
                currency: "RUB".into(),
                customer_id: c.id,
                month: 3,
                invoice_type: InvoiceType::Crypto,
                status: PurchaseStatus::Pending,
            },
        )
        .await
        .unwrap();

        assert!(matches!(store.settle(p.id).await.unwrap(), SettleOutcome::Settled(_)));
        assert!(matches!(store.settle(p.id).await.unwrap(), SettleOutcome::AlreadyPaid(_)));
        let c = CustomerStore::find_by_id(&store, c.id).await.unwrap().unwrap();
        assert_eq!(c.balance, 500);
    }

    #[tokio::test]
    async fn cancelled_purchase_cannot_be_paid() {
        let store = MemoryStore::new();
        let c = customer(&store, 11).await;
        let p = PurchaseStore::create(
            &store,
            NewPurchase {
                amount: 100,
                currency: "RUB".into(),
                customer_id: c.id,
                month: 1,
                invoice_type: InvoiceType::Crypto,
                status: PurchaseStatus::New,
            },
        )
        .await
        .unwrap();

        assert!(store.cancel(p.id).await.unwrap());
        assert!(!store.cancel(p.id).await.unwrap());
        assert!(matches!(store.settle(p.id).await.unwrap(), SettleOutcome::Cancelled(_)));
        assert!(store.set_invoice(p.id, "x", "y").await.is_err());
    }

    #[tokio::test]
    async fn try_debit_never_goes_negative() {
        let store = MemoryStore::new();
        let c = customer(&store, 12).await;
        store.add_balance(c.id, 300).await.unwrap();
        assert!(!store.try_debit(c.id, 301).await.unwrap());
        assert!(store.try_debit(c.id, 300).await.unwrap());
        assert!(!store.try_debit(c.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn try_debit_rejects_non_positive_amounts() {
        let store = MemoryStore::new();
        let c = customer(&store, 14).await;
        store.add_balance(c.id, 100).await.unwrap();
        assert!(store.try_debit(c.id, -500).await.unwrap_err().is_conflict());
        assert!(store.try_debit(c.id, 0).await.unwrap_err().is_conflict());
        let c = CustomerStore::find_by_id(&store, c.id).await.unwrap().unwrap();
        assert_eq!(c.balance, 100);
    }

    #[tokio::test]
    async fn external_purchase_is_created_once_per_delivery() {
        let store = MemoryStore::new();
        let c = customer(&store, 15).await;
        let new = || NewPurchase {
            amount: 10_000,
            currency: "RUB".into(),
            customer_id: c.id,
            month: 1,
            invoice_type: InvoiceType::Tribute,
            status: PurchaseStatus::Pending,
        };

        let first = store.create_external(new(), "abc").await.unwrap();
        assert!(matches!(store.settle(first.id).await.unwrap(), SettleOutcome::Settled(_)));
        let again = store.create_external(new(), "abc").await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, PurchaseStatus::Paid);
        assert_eq!(again.external_id.as_deref(), Some("abc"));

        let other = store.create_external(new(), "def").await.unwrap();
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn concurrent_claims_respect_the_counter() {
        let store = Arc::new(MemoryStore::new());
        let promo = PromoStore::create(
            store.as_ref(),
            NewPromocode {
                code: "ONCE".into(),
                kind: PromoKind::Balance,
                days: 0,
                months: 0,
                amount: 100,
                uses: PromoUses::Limited(1),
                created_by: 1,
            },
        )
        .await
        .unwrap();

        let mut handles = Vec::new();
        for tg in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let c = store.get_or_create(100 + tg, "en").await.unwrap().0;
                store.claim_use(promo.id, c.id).await.unwrap()
            }));
        }
        let mut claimed = 0;
        for h in handles {
            if matches!(h.await.unwrap(), ClaimOutcome::Claimed(_)) {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
        assert_eq!(store.usage_count(promo.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn release_restores_the_use() {
        let store = MemoryStore::new();
        let c = customer(&store, 13).await;
        let promo = PromoStore::create(
            &store,
            NewPromocode {
                code: "BACK".into(),
                kind: PromoKind::Subscription,
                days: 30,
                months: 0,
                amount: 0,
                uses: PromoUses::Limited(1),
                created_by: 1,
            },
        )
        .await
        .unwrap();

        let ClaimOutcome::Claimed(usage) = store.claim_use(promo.id, c.id).await.unwrap() else {
            panic!("expected a claim");
        };
        store.release_use(usage).await.unwrap();
        let promo = PromoStore::find_by_id(&store, promo.id).await.unwrap().unwrap();
        assert_eq!(promo.uses, PromoUses::Limited(1));
        assert_eq!(store.usage_count(promo.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn referral_bonus_flag_flips_once() {
        let store = MemoryStore::new();
        customer(&store, 42).await;
        customer(&store, 43).await;
        ReferralStore::create(&store, 42, 43).await.unwrap();

        assert!(store.grant_bonus(43, 150).await.unwrap().is_some());
        assert!(store.grant_bonus(43, 150).await.unwrap().is_none());
        let referrer = store.find_by_telegram_id(42).await.unwrap().unwrap();
        assert_eq!(referrer.balance, 150);
    }
}
