use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use vpnshop_db::PurchaseStore;
use vpnshop_db::models::purchase::{InvoiceType, NewPurchase, PurchaseStatus};

use super::{Invoice, PaymentProvider, PurchaseRequest};
use crate::config::CryptoPayConfig;
use crate::error::ShopResult;
use crate::i18n::format_money;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoInvoice {
    pub invoice_id: i64,
    pub pay_url: String,
}

/// Invoice minting against the crypto payment processor.
#[async_trait]
pub trait CryptoInvoiceApi: Send + Sync {
    async fn create_invoice(
        &self,
        amount: i64,
        currency: &str,
        payload: &str,
        description: &str,
    ) -> Result<CryptoInvoice>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<ApiInvoice>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiInvoice {
    invoice_id: i64,
    bot_invoice_url: String,
}

pub struct CryptoPayClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl CryptoPayClient {
    pub fn new(config: &CryptoPayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Crypto Pay HTTP client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl CryptoInvoiceApi for CryptoPayClient {
    // Invoice creation is not idempotent, so it is never retried.
    async fn create_invoice(
        &self,
        amount: i64,
        currency: &str,
        payload: &str,
        description: &str,
    ) -> Result<CryptoInvoice> {
        let body = json!({
            "currency_type": "fiat",
            "fiat": currency,
            "amount": format_money(amount),
            "payload": payload,
            "description": description,
        });

        let resp: ApiResponse = self
            .client
            .post(format!("{}/api/createInvoice", self.base_url))
            .header("Crypto-Pay-API-Token", &self.token)
            .json(&body)
            .send()
            .await
            .context("createInvoice request failed")?
            .json()
            .await
            .context("createInvoice returned an unexpected body")?;

        match resp.result {
            Some(invoice) if resp.ok => Ok(CryptoInvoice {
                invoice_id: invoice.invoice_id,
                pay_url: invoice.bot_invoice_url,
            }),
            _ => Err(anyhow::anyhow!("Crypto Pay error: {:?}", resp.error)),
        }
    }
}

pub struct CryptoProvider {
    api: Option<Arc<dyn CryptoInvoiceApi>>,
    purchases: Arc<dyn PurchaseStore>,
    currency: String,
}

impl CryptoProvider {
    /// `api` is `None` when crypto payments are switched off.
    pub fn new(
        api: Option<Arc<dyn CryptoInvoiceApi>>,
        purchases: Arc<dyn PurchaseStore>,
        currency: String,
    ) -> Self {
        Self {
            api,
            purchases,
            currency,
        }
    }
}

#[async_trait]
impl PaymentProvider for CryptoProvider {
    fn invoice_type(&self) -> InvoiceType {
        InvoiceType::Crypto
    }

    fn enabled(&self) -> bool {
        self.api.is_some()
    }

    async fn create_invoice(&self, request: &PurchaseRequest) -> ShopResult<Invoice> {
        let api = self
            .api
            .as_ref()
            .ok_or(crate::error::ShopError::ProviderDisabled(InvoiceType::Crypto))?;

        let purchase = self
            .purchases
            .create(NewPurchase {
                amount: request.amount,
                currency: self.currency.clone(),
                customer_id: request.customer.id,
                month: request.months,
                invoice_type: InvoiceType::Crypto,
                status: PurchaseStatus::New,
            })
            .await?;

        // A failure here leaves the purchase `new`; the stale sweep cancels it.
        let invoice = api
            .create_invoice(
                request.amount,
                &self.currency,
                &purchase.id.to_string(),
                &format!("VPN subscription, {} month(s)", request.months),
            )
            .await?;

        self.purchases
            .set_invoice(purchase.id, &invoice.invoice_id.to_string(), &invoice.pay_url)
            .await?;

        info!(
            "Crypto invoice {} minted for purchase {}",
            invoice.invoice_id, purchase.id
        );

        Ok(Invoice {
            payment_url: invoice.pay_url,
            purchase_id: purchase.id,
        })
    }
}
