use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::debug;

use super::PurchaseStore;
use crate::error::{StoreError, StoreResult};
use crate::models::purchase::{
    InvoiceType, NewPurchase, Purchase, PurchaseStatus, SettleOutcome,
};

const PURCHASE_COLUMNS: &str = "id, amount, currency, customer_id, month, invoice_type, status, \
     created_at, paid_at, external_id, payment_url";

#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    pool: PgPool,
}

impl PurchaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_purchase(row: &PgRow) -> StoreResult<Purchase> {
        let invoice_type: String = row.try_get("invoice_type")?;
        let status: String = row.try_get("status")?;
        Ok(Purchase {
            id: row.try_get("id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            customer_id: row.try_get("customer_id")?,
            month: row.try_get("month")?,
            invoice_type: invoice_type.parse()?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            paid_at: row.try_get("paid_at")?,
            external_id: row.try_get("external_id")?,
            payment_url: row.try_get("payment_url")?,
        })
    }
}

#[async_trait]
impl PurchaseStore for PurchaseRepository {
    async fn create(&self, purchase: NewPurchase) -> StoreResult<Purchase> {
        let row = sqlx::query(&format!(
            "INSERT INTO purchases (amount, currency, customer_id, month, invoice_type, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(purchase.amount)
        .bind(&purchase.currency)
        .bind(purchase.customer_id)
        .bind(purchase.month)
        .bind(purchase.invoice_type.as_str())
        .bind(purchase.status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_purchase(&row)
    }

    async fn create_external(
        &self,
        purchase: NewPurchase,
        external_id: &str,
    ) -> StoreResult<Purchase> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO purchases
                 (amount, currency, customer_id, month, invoice_type, status, external_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (invoice_type, external_id) WHERE external_id IS NOT NULL DO NOTHING
             RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(purchase.amount)
        .bind(&purchase.currency)
        .bind(purchase.customer_id)
        .bind(purchase.month)
        .bind(purchase.invoice_type.as_str())
        .bind(purchase.status.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Self::row_to_purchase(&row);
        }

        debug!("Purchase for delivery {} already recorded", external_id);
        let row = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE invoice_type = $1 AND external_id = $2"
        ))
        .bind(purchase.invoice_type.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("purchase for delivery", external_id))?;
        Self::row_to_purchase(&row)
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Purchase>> {
        let row = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_purchase).transpose()
    }

    async fn set_invoice(
        &self,
        id: i64,
        external_id: &str,
        payment_url: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE purchases SET external_id = $1, payment_url = $2, status = 'pending'
             WHERE id = $3 AND status IN ('new', 'pending')",
        )
        .bind(external_id)
        .bind(payment_url)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(id).await? {
                Some(p) => Err(StoreError::Conflict(format!(
                    "purchase {} is already {}",
                    id,
                    p.status.as_str()
                ))),
                None => Err(StoreError::not_found("purchase", id)),
            };
        }
        Ok(())
    }

    async fn settle(&self, id: i64) -> StoreResult<SettleOutcome> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(&format!(
            "UPDATE purchases SET status = 'paid', paid_at = CURRENT_TIMESTAMP
             WHERE id = $1 AND status IN ('new', 'pending')
             RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = flipped else {
            tx.rollback().await?;
            let current = self
                .find_by_id(id)
                .await?
                .ok_or_else(|| StoreError::not_found("purchase", id))?;
            debug!("Purchase {} not settled, current status {}", id, current.status.as_str());
            return match current.status {
                PurchaseStatus::Paid => Ok(SettleOutcome::AlreadyPaid(current)),
                PurchaseStatus::Cancel => Ok(SettleOutcome::Cancelled(current)),
                other => Err(StoreError::Conflict(format!(
                    "purchase {} changed concurrently to {}",
                    id,
                    other.as_str()
                ))),
            };
        };
        let purchase = Self::row_to_purchase(&row)?;

        let credited = sqlx::query("UPDATE customers SET balance = balance + $1 WHERE id = $2")
            .bind(purchase.amount)
            .bind(purchase.customer_id)
            .execute(&mut *tx)
            .await?;
        if credited.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::not_found("customer", purchase.customer_id));
        }

        tx.commit().await?;
        Ok(SettleOutcome::Settled(purchase))
    }

    async fn cancel(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE purchases SET status = 'cancel' WHERE id = $1 AND status IN ('new', 'pending')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.find_by_id(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("purchase", id)),
        }
    }

    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Purchase>> {
        let rows = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases
             WHERE status IN ('new', 'pending') AND created_at < $1
             ORDER BY created_at"
        ))
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_purchase).collect()
    }

    async fn find_pending_by_customer(
        &self,
        customer_id: i64,
        invoice_type: InvoiceType,
    ) -> StoreResult<Vec<Purchase>> {
        let rows = sqlx::query(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases
             WHERE customer_id = $1 AND invoice_type = $2 AND status IN ('new', 'pending')
             ORDER BY created_at DESC"
        ))
        .bind(customer_id)
        .bind(invoice_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_purchase).collect()
    }
}
