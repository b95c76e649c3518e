use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Referrer and referee are telegram identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referee_id: i64,
    pub bonus_granted: bool,
    pub created_at: DateTime<Utc>,
}
