use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use vpnshop_db::models::customer::Customer;
use vpnshop_db::models::purchase::InvoiceType;

use crate::error::{ShopError, ShopResult};

pub mod crypto_pay;
pub mod stars;
pub mod tribute;

/// What the customer wants to pay for.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    /// Balance credit on settlement, minor units.
    pub amount: i64,
    pub months: i32,
    pub customer: Customer,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub payment_url: String,
    pub purchase_id: i64,
}

/// A payment method. Implementations create the purchase row, mint the payable
/// link and leave the purchase `pending`.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn invoice_type(&self) -> InvoiceType;

    fn enabled(&self) -> bool;

    async fn create_invoice(&self, request: &PurchaseRequest) -> ShopResult<Invoice>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<InvoiceType, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.invoice_type(), provider);
        self
    }

    pub fn get(&self, invoice_type: InvoiceType) -> ShopResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(&invoice_type)
            .filter(|p| p.enabled())
            .cloned()
            .ok_or(ShopError::ProviderDisabled(invoice_type))
    }

    pub fn enabled_types(&self) -> Vec<InvoiceType> {
        let mut types: Vec<_> = self
            .providers
            .values()
            .filter(|p| p.enabled())
            .map(|p| p.invoice_type())
            .collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(InvoiceType, bool);

    #[async_trait]
    impl PaymentProvider for Dummy {
        fn invoice_type(&self) -> InvoiceType {
            self.0
        }

        fn enabled(&self) -> bool {
            self.1
        }

        async fn create_invoice(&self, _request: &PurchaseRequest) -> ShopResult<Invoice> {
            Ok(Invoice {
                payment_url: "https://pay".into(),
                purchase_id: 1,
            })
        }
    }

    #[test]
    fn disabled_and_unknown_providers_are_rejected() {
        let registry = ProviderRegistry::new()
            .register(Arc::new(Dummy(InvoiceType::Crypto, true)))
            .register(Arc::new(Dummy(InvoiceType::Stars, false)));

        assert!(registry.get(InvoiceType::Crypto).is_ok());
        assert!(matches!(
            registry.get(InvoiceType::Stars),
            Err(ShopError::ProviderDisabled(InvoiceType::Stars))
        ));
        assert!(matches!(
            registry.get(InvoiceType::Tribute),
            Err(ShopError::ProviderDisabled(InvoiceType::Tribute))
        ));
        assert_eq!(registry.enabled_types(), vec![InvoiceType::Crypto]);
    }
}
