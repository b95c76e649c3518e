use thiserror::Error;
use vpnshop_db::StoreError;
use vpnshop_db::models::purchase::InvoiceType;

#[derive(Debug, Error)]
pub enum ShopError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: i64, available: i64 },

    #[error("payment provider {0} is not enabled")]
    ProviderDisabled(InvoiceType),

    #[error("promocode is invalid, inactive or exhausted")]
    PromoInvalid,

    #[error("promocode was already redeemed by this customer")]
    PromoAlreadyUsed,

    #[error("external dependency failed: {0:#}")]
    External(#[from] anyhow::Error),

    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ShopError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => ShopError::NotFound(format!("{entity} {id}")),
            other => ShopError::Store(other),
        }
    }
}

impl ShopError {
    /// Conditions caused by the customer that deserve a reply rather than a retry.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ShopError::InsufficientBalance { .. }
                | ShopError::PromoInvalid
                | ShopError::PromoAlreadyUsed
                | ShopError::Validation(_)
        )
    }
}

pub type ShopResult<T> = Result<T, ShopError>;
