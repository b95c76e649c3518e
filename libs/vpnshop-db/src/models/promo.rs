use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const DAYS_PER_MONTH: i32 = 30;
/// Longest duration a single purchase or code may grant.
pub const MAX_MONTHS: i32 = 120;
pub const MAX_DAYS: i32 = MAX_MONTHS * DAYS_PER_MONTH;
pub const MAX_PROMO_USES: i32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    Subscription,
    Balance,
}

impl PromoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoKind::Subscription => "subscription",
            PromoKind::Balance => "balance",
        }
    }
}

impl FromStr for PromoKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(PromoKind::Subscription),
            "balance" => Ok(PromoKind::Balance),
            other => Err(StoreError::Corrupt(format!("unknown promocode kind '{other}'"))),
        }
    }
}

/// Remaining redemptions. Unlimited codes are flagged explicitly instead of
/// overloading a counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromoUses {
    Unlimited,
    Limited(i32),
}

impl PromoUses {
    pub fn is_exhausted(&self) -> bool {
        match self {
            PromoUses::Unlimited => false,
            PromoUses::Limited(left) => *left <= 0,
        }
    }

    pub fn from_columns(unlimited: bool, uses_left: i32) -> Self {
        if unlimited {
            PromoUses::Unlimited
        } else {
            PromoUses::Limited(uses_left)
        }
    }

    /// `(unlimited, uses_left)` as stored.
    pub fn to_columns(self) -> (bool, i32) {
        match self {
            PromoUses::Unlimited => (true, 0),
            PromoUses::Limited(left) => (false, left),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promocode {
    pub id: i64,
    pub code: String,
    pub kind: PromoKind,
    pub days: i32,
    pub months: i32,
    /// Balance grant in minor units.
    pub amount: i64,
    pub uses: PromoUses,
    pub created_by: i64,
    pub active: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Promocode {
    pub fn is_redeemable(&self) -> bool {
        self.active && !self.deleted && !self.uses.is_exhausted()
    }

    /// Explicit days win; otherwise months are converted at 30 days each.
    /// Capped at `MAX_DAYS`.
    pub fn grant_days(&self) -> i32 {
        let days = if self.days > 0 {
            self.days
        } else {
            self.months.saturating_mul(DAYS_PER_MONTH)
        };
        days.min(MAX_DAYS)
    }
}

#[derive(Debug, Clone)]
pub struct NewPromocode {
    pub code: String,
    pub kind: PromoKind,
    pub days: i32,
    pub months: i32,
    pub amount: i64,
    pub uses: PromoUses,
    pub created_by: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromocodeUsage {
    pub id: i64,
    pub promocode_id: i64,
    pub customer_id: i64,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A use was reserved and the audit row written; carries the usage id.
    Claimed(i64),
    /// Inactive, deleted, exhausted or missing.
    Unavailable,
    AlreadyUsed,
}
