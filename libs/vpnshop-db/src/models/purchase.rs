use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Crypto,
    Stars,
    Tribute,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Crypto => "crypto",
            InvoiceType::Stars => "telegram",
            InvoiceType::Tribute => "tribute",
        }
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crypto" => Ok(InvoiceType::Crypto),
            "telegram" => Ok(InvoiceType::Stars),
            "tribute" => Ok(InvoiceType::Tribute),
            other => Err(StoreError::Corrupt(format!("unknown invoice type '{other}'"))),
        }
    }
}

/// Lifecycle: `new -> pending -> {paid | cancel}`. `paid` and `cancel` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    New,
    Pending,
    Paid,
    Cancel,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::New => "new",
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Paid => "paid",
            PurchaseStatus::Cancel => "cancel",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseStatus::Paid | PurchaseStatus::Cancel)
    }
}

impl FromStr for PurchaseStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(PurchaseStatus::New),
            "pending" => Ok(PurchaseStatus::Pending),
            "paid" => Ok(PurchaseStatus::Paid),
            "cancel" => Ok(PurchaseStatus::Cancel),
            other => Err(StoreError::Corrupt(format!("unknown purchase status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: i64,
    /// Amount credited to the owner's balance on settlement, minor units.
    pub amount: i64,
    pub currency: String,
    pub customer_id: i64,
    pub month: i32,
    pub invoice_type: InvoiceType,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub payment_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub amount: i64,
    pub currency: String,
    pub customer_id: i64,
    pub month: i32,
    pub invoice_type: InvoiceType,
    pub status: PurchaseStatus,
}

/// Result of the compare-and-swap to `paid`.
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// This call flipped the status and credited the owner.
    Settled(Purchase),
    AlreadyPaid(Purchase),
    Cancelled(Purchase),
}
