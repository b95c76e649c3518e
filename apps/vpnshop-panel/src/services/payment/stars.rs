use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use vpnshop_db::PurchaseStore;
use vpnshop_db::models::purchase::{InvoiceType, NewPurchase, PurchaseStatus};

use super::{Invoice, PaymentProvider, PurchaseRequest};
use crate::config::Pricing;
use crate::error::{ShopError, ShopResult};
use crate::services::messenger::Messenger;

pub const STARS_CURRENCY: &str = "XTR";

/// Payload carried back by the transport's successful-payment event.
pub fn invoice_payload(purchase_id: i64, username: Option<&str>) -> String {
    format!("{}&{}", purchase_id, username.unwrap_or_default())
}

/// In-app stars: the transport mints the link, settlement arrives as a
/// successful-payment event instead of a webhook.
pub struct StarsProvider {
    enabled: bool,
    messenger: Arc<dyn Messenger>,
    purchases: Arc<dyn PurchaseStore>,
    stars_pricing: Pricing,
}

impl StarsProvider {
    pub fn new(
        enabled: bool,
        messenger: Arc<dyn Messenger>,
        purchases: Arc<dyn PurchaseStore>,
        stars_pricing: Pricing,
    ) -> Self {
        Self {
            enabled,
            messenger,
            purchases,
            stars_pricing,
        }
    }
}

#[async_trait]
impl PaymentProvider for StarsProvider {
    fn invoice_type(&self) -> InvoiceType {
        InvoiceType::Stars
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn create_invoice(&self, request: &PurchaseRequest) -> ShopResult<Invoice> {
        let stars = u32::try_from(self.stars_pricing.price(request.months)).map_err(|_| {
            ShopError::Validation(format!("no stars price for {} months", request.months))
        })?;
        if stars == 0 {
            return Err(ShopError::Validation(format!(
                "no stars price for {} months",
                request.months
            )));
        }

        // Amount stays in shop minor units; only the invoice is priced in stars.
        let purchase = self
            .purchases
            .create(NewPurchase {
                amount: request.amount,
                currency: STARS_CURRENCY.to_string(),
                customer_id: request.customer.id,
                month: request.months,
                invoice_type: InvoiceType::Stars,
                status: PurchaseStatus::New,
            })
            .await?;

        let payload = invoice_payload(purchase.id, request.username.as_deref());
        let link = self
            .messenger
            .create_invoice_link(
                "VPN subscription",
                &format!("{} month(s) of access", request.months),
                &payload,
                stars,
            )
            .await?;

        self.purchases.set_invoice(purchase.id, &payload, &link).await?;
        info!("Stars invoice for purchase {} costs {} XTR", purchase.id, stars);

        Ok(Invoice {
            payment_url: link,
            purchase_id: purchase.id,
        })
    }
}
