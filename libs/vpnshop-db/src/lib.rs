pub mod db;
pub mod error;
pub mod memory;
pub mod models;
pub mod repositories;

use std::sync::Arc;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use repositories::{CustomerStore, PromoStore, PurchaseStore, ReferralStore};
pub use sqlx;

use repositories::{
    customer_repo::CustomerRepository, promo_repo::PromoRepository,
    purchase_repo::PurchaseRepository, referral_repo::ReferralRepository,
};

/// Bundle of every store the services depend on.
#[derive(Clone)]
pub struct Stores {
    pub customers: Arc<dyn CustomerStore>,
    pub purchases: Arc<dyn PurchaseStore>,
    pub promos: Arc<dyn PromoStore>,
    pub referrals: Arc<dyn ReferralStore>,
}

impl Stores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            customers: Arc::new(CustomerRepository::new(pool.clone())),
            purchases: Arc::new(PurchaseRepository::new(pool.clone())),
            promos: Arc::new(PromoRepository::new(pool.clone())),
            referrals: Arc::new(ReferralRepository::new(pool)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            customers: store.clone(),
            purchases: store.clone(),
            promos: store.clone(),
            referrals: store,
        }
    }
}
