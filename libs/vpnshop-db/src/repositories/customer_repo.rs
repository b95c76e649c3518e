use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::CustomerStore;
use crate::error::{StoreError, StoreResult};
use crate::models::customer::Customer;

const CUSTOMER_COLUMNS: &str =
    "id, telegram_id, language, balance, expire_at, subscription_link, created_at";

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: PgPool,
}

impl CustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn row_to_customer(row: &PgRow) -> StoreResult<Customer> {
        Ok(Customer {
            id: row.try_get("id")?,
            telegram_id: row.try_get("telegram_id")?,
            language: row.try_get("language")?,
            balance: row.try_get("balance")?,
            expire_at: row.try_get("expire_at")?,
            subscription_link: row.try_get("subscription_link")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl CustomerStore for CustomerRepository {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Customer>> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_customer).transpose()
    }

    async fn find_by_telegram_id(&self, telegram_id: i64) -> StoreResult<Option<Customer>> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE telegram_id = $1"
        ))
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_customer).transpose()
    }

    async fn get_or_create(
        &self,
        telegram_id: i64,
        language: &str,
    ) -> StoreResult<(Customer, bool)> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO customers (telegram_id, language) VALUES ($1, $2)
             ON CONFLICT (telegram_id) DO NOTHING
             RETURNING {CUSTOMER_COLUMNS}"
        ))
        .bind(telegram_id)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((Self::row_to_customer(&row)?, true));
        }

        let existing = self
            .find_by_telegram_id(telegram_id)
            .await?
            .ok_or_else(|| StoreError::not_found("customer", telegram_id))?;
        Ok((existing, false))
    }

    async fn add_balance(&self, id: i64, delta: i64) -> StoreResult<()> {
        let result = sqlx::query("UPDATE customers SET balance = balance + $1 WHERE id = $2")
            .bind(delta)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("customer", id));
        }
        Ok(())
    }

    async fn try_debit(&self, id: i64, amount: i64) -> StoreResult<bool> {
        if amount <= 0 {
            return Err(StoreError::Conflict(format!("debit amount {amount} must be positive")));
        }
        let result = sqlx::query(
            "UPDATE customers SET balance = balance - $1 WHERE id = $2 AND balance >= $1",
        )
        .bind(amount)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_subscription(
        &self,
        id: i64,
        expire_at: DateTime<Utc>,
        link: &str,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE customers SET expire_at = $1, subscription_link = $2 WHERE id = $3")
            .bind(expire_at)
            .bind(link)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_language(&self, id: i64, language: &str) -> StoreResult<()> {
        sqlx::query("UPDATE customers SET language = $1 WHERE id = $2")
            .bind(language)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
