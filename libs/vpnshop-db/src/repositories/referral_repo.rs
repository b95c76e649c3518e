use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;

use super::ReferralStore;
use crate::error::{StoreError, StoreResult};
use crate::models::referral::Referral;

const REFERRAL_COLUMNS: &str = "id, referrer_id, referee_id, bonus_granted, created_at";

#[derive(Debug, Clone)]
pub struct ReferralRepository {
    pool: PgPool,
}

impl ReferralRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_referral(row: &PgRow) -> StoreResult<Referral> {
        Ok(Referral {
            id: row.try_get("id")?,
            referrer_id: row.try_get("referrer_id")?,
            referee_id: row.try_get("referee_id")?,
            bonus_granted: row.try_get("bonus_granted")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ReferralStore for ReferralRepository {
    async fn create(&self, referrer_id: i64, referee_id: i64) -> StoreResult<Option<Referral>> {
        let row = sqlx::query(&format!(
            "INSERT INTO referrals (referrer_id, referee_id) VALUES ($1, $2)
             ON CONFLICT (referee_id) DO NOTHING
             RETURNING {REFERRAL_COLUMNS}"
        ))
        .bind(referrer_id)
        .bind(referee_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_referral).transpose()
    }

    async fn find_by_referee(&self, referee_id: i64) -> StoreResult<Option<Referral>> {
        let row = sqlx::query(&format!(
            "SELECT {REFERRAL_COLUMNS} FROM referrals WHERE referee_id = $1"
        ))
        .bind(referee_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_referral).transpose()
    }

    async fn grant_bonus(&self, referee_id: i64, amount: i64) -> StoreResult<Option<Referral>> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(&format!(
            "UPDATE referrals SET bonus_granted = TRUE
             WHERE referee_id = $1 AND NOT bonus_granted
             RETURNING {REFERRAL_COLUMNS}"
        ))
        .bind(referee_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = flipped else {
            tx.rollback().await?;
            return Ok(None);
        };
        let referral = Self::row_to_referral(&row)?;

        let credited =
            sqlx::query("UPDATE customers SET balance = balance + $1 WHERE telegram_id = $2")
                .bind(amount)
                .bind(referral.referrer_id)
                .execute(&mut *tx)
                .await?;
        if credited.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::not_found("referrer", referral.referrer_id));
        }

        tx.commit().await?;
        info!(
            "Granted referral bonus {} to {} for referee {}",
            amount, referral.referrer_id, referee_id
        );
        Ok(Some(referral))
    }

    async fn count_by_referrer(&self, referrer_id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM referrals WHERE referrer_id = $1")
            .bind(referrer_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
