use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bot user and their wallet. Balance is kept in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub telegram_id: i64,
    pub language: String,
    pub balance: i64,
    pub expire_at: Option<DateTime<Utc>>,
    pub subscription_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|exp| exp > now)
    }
}
