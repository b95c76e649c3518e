use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::PromoStore;
use crate::error::{StoreError, StoreResult};
use crate::models::promo::{ClaimOutcome, NewPromocode, Promocode, PromoUses};

const PROMO_COLUMNS: &str =
    "id, code, kind, days, months, amount, uses_left, unlimited, created_by, active, deleted, created_at";

#[derive(Debug, Clone)]
pub struct PromoRepository {
    pool: PgPool,
}

impl PromoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_promo(row: &PgRow) -> StoreResult<Promocode> {
        let kind: String = row.try_get("kind")?;
        Ok(Promocode {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            kind: kind.parse()?,
            days: row.try_get("days")?,
            months: row.try_get("months")?,
            amount: row.try_get("amount")?,
            uses: PromoUses::from_columns(row.try_get("unlimited")?, row.try_get("uses_left")?),
            created_by: row.try_get("created_by")?,
            active: row.try_get("active")?,
            deleted: row.try_get("deleted")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl PromoStore for PromoRepository {
    async fn create(&self, promo: NewPromocode) -> StoreResult<Promocode> {
        let (unlimited, uses_left) = promo.uses.to_columns();
        let row = sqlx::query(&format!(
            "INSERT INTO promocodes (code, kind, days, months, amount, uses_left, unlimited, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {PROMO_COLUMNS}"
        ))
        .bind(&promo.code)
        .bind(promo.kind.as_str())
        .bind(promo.days)
        .bind(promo.months)
        .bind(promo.amount)
        .bind(uses_left)
        .bind(unlimited)
        .bind(promo.created_by)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_promo(&row)
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Promocode>> {
        let row = sqlx::query(&format!("SELECT {PROMO_COLUMNS} FROM promocodes WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_promo).transpose()
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Promocode>> {
        let row = sqlx::query(&format!(
            "SELECT {PROMO_COLUMNS} FROM promocodes WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_promo).transpose()
    }

    async fn list(&self, include_deleted: bool) -> StoreResult<Vec<Promocode>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROMO_COLUMNS} FROM promocodes
             WHERE $1 OR NOT deleted
             ORDER BY created_at DESC"
        ))
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_promo).collect()
    }

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE promocodes SET active = $1 WHERE id = $2 AND NOT deleted")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn soft_delete(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE promocodes SET deleted = TRUE WHERE id = $1 AND NOT deleted")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_use(&self, promocode_id: i64, customer_id: i64) -> StoreResult<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the promocode serializes concurrent claims.
        let reserved = sqlx::query(
            "UPDATE promocodes
             SET uses_left = CASE WHEN unlimited THEN uses_left ELSE uses_left - 1 END
             WHERE id = $1 AND active AND NOT deleted AND (unlimited OR uses_left > 0)
             RETURNING id",
        )
        .bind(promocode_id)
        .fetch_optional(&mut *tx)
        .await?;
        if reserved.is_none() {
            tx.rollback().await?;
            return Ok(ClaimOutcome::Unavailable);
        }

        let usage_id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO promocode_usages (promocode_id, customer_id) VALUES ($1, $2)
             ON CONFLICT (promocode_id, customer_id) DO NOTHING
             RETURNING id",
        )
        .bind(promocode_id)
        .bind(customer_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(usage_id) = usage_id else {
            tx.rollback().await?;
            return Ok(ClaimOutcome::AlreadyUsed);
        };

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed(usage_id))
    }

    async fn release_use(&self, usage_id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let promocode_id: Option<i64> =
            sqlx::query_scalar("DELETE FROM promocode_usages WHERE id = $1 RETURNING promocode_id")
                .bind(usage_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(promocode_id) = promocode_id else {
            tx.rollback().await?;
            return Err(StoreError::not_found("promocode usage", usage_id));
        };

        sqlx::query("UPDATE promocodes SET uses_left = uses_left + 1 WHERE id = $1 AND NOT unlimited")
            .bind(promocode_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn usage_count(&self, promocode_id: i64) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM promocode_usages WHERE promocode_id = $1")
                .bind(promocode_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
