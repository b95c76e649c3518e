use std::sync::Arc;

use async_trait::async_trait;
use vpnshop_db::PurchaseStore;
use vpnshop_db::models::purchase::{InvoiceType, NewPurchase, PurchaseStatus};

use super::{Invoice, PaymentProvider, PurchaseRequest};
use crate::config::TributeConfig;
use crate::error::{ShopError, ShopResult};

/// External subscription service. The money moves on its side, so the purchase
/// starts `pending` and the webhook completes it.
pub struct TributeProvider {
    config: Option<TributeConfig>,
    purchases: Arc<dyn PurchaseStore>,
    currency: String,
}

impl TributeProvider {
    pub fn new(
        config: Option<TributeConfig>,
        purchases: Arc<dyn PurchaseStore>,
        currency: String,
    ) -> Self {
        Self {
            config,
            purchases,
            currency,
        }
    }
}

#[async_trait]
impl PaymentProvider for TributeProvider {
    fn invoice_type(&self) -> InvoiceType {
        InvoiceType::Tribute
    }

    fn enabled(&self) -> bool {
        self.config.is_some()
    }

    async fn create_invoice(&self, request: &PurchaseRequest) -> ShopResult<Invoice> {
        let config = self
            .config
            .as_ref()
            .ok_or(ShopError::ProviderDisabled(InvoiceType::Tribute))?;

        let purchase = self
            .purchases
            .create(NewPurchase {
                amount: request.amount,
                currency: self.currency.clone(),
                customer_id: request.customer.id,
                month: request.months,
                invoice_type: InvoiceType::Tribute,
                status: PurchaseStatus::Pending,
            })
            .await?;

        Ok(Invoice {
            payment_url: config.payment_url.clone(),
            purchase_id: purchase.id,
        })
    }
}
