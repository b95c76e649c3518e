//! The purchase ledger: turns payment signals into exactly-once effects.
//!
//! Financial state lives in the stores and moves through their atomic operations
//! (`settle`, `try_debit`, `add_balance`). Everything that talks to the outside
//! world afterwards (prompt cleanup, notifications, referral bonus) is best effort and logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use vpnshop_db::models::customer::Customer;
use vpnshop_db::models::promo::{DAYS_PER_MONTH, MAX_MONTHS};
use vpnshop_db::models::purchase::{
    InvoiceType, NewPurchase, Purchase, PurchaseStatus, SettleOutcome,
};
use vpnshop_db::{CustomerStore, PurchaseStore};

use crate::config::Config;
use crate::error::{ShopError, ShopResult};
use crate::i18n::{Translations, format_money};
use crate::services::message_cache::{MessageCache, PromptRef};
use crate::services::messenger::Messenger;
use crate::services::payment::{Invoice, ProviderRegistry, PurchaseRequest};
use crate::services::provisioning::{ProvisionedAccess, Provisioner};
use crate::services::referral_service::ReferralService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// This call settled the purchase and credited the balance.
    Completed(Purchase),
    AlreadyPaid,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalancePurchase {
    Activated(ProvisionedAccess),
    InsufficientBalance { price: i64, balance: i64 },
}

/// Splits a `<purchaseID>&<username>` invoice payload.
pub fn parse_invoice_payload(payload: &str) -> ShopResult<(i64, Option<String>)> {
    let (id, username) = payload.split_once('&').unwrap_or((payload, ""));
    let id = id
        .trim()
        .parse::<i64>()
        .map_err(|_| ShopError::Validation(format!("bad invoice payload '{payload}'")))?;
    let username = Some(username.trim())
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    Ok((id, username))
}

fn validate_order(amount: i64, months: i32) -> ShopResult<()> {
    if amount <= 0 || months <= 0 {
        return Err(ShopError::Validation(format!(
            "amount {amount} and months {months} must be positive"
        )));
    }
    if months > MAX_MONTHS {
        return Err(ShopError::Validation(format!(
            "at most {MAX_MONTHS} months per purchase, got {months}"
        )));
    }
    Ok(())
}

pub struct PayService {
    config: Arc<Config>,
    customers: Arc<dyn CustomerStore>,
    purchases: Arc<dyn PurchaseStore>,
    providers: ProviderRegistry,
    provisioner: Arc<dyn Provisioner>,
    messenger: Arc<dyn Messenger>,
    translations: Arc<Translations>,
    message_cache: Arc<MessageCache>,
    referrals: Arc<ReferralService>,
}

impl PayService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        customers: Arc<dyn CustomerStore>,
        purchases: Arc<dyn PurchaseStore>,
        providers: ProviderRegistry,
        provisioner: Arc<dyn Provisioner>,
        messenger: Arc<dyn Messenger>,
        translations: Arc<Translations>,
        message_cache: Arc<MessageCache>,
        referrals: Arc<ReferralService>,
    ) -> Self {
        Self {
            config,
            customers,
            purchases,
            providers,
            provisioner,
            messenger,
            translations,
            message_cache,
            referrals,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Balance credit a purchase of `months` is worth.
    pub fn quote(&self, months: i32) -> i64 {
        self.config.pricing.price(months)
    }

    pub async fn create_purchase(
        &self,
        amount: i64,
        months: i32,
        customer: &Customer,
        invoice_type: InvoiceType,
        username: Option<String>,
    ) -> ShopResult<Invoice> {
        validate_order(amount, months)?;
        let provider = self.providers.get(invoice_type)?;
        let invoice = provider
            .create_invoice(&PurchaseRequest {
                amount,
                months,
                customer: customer.clone(),
                username,
            })
            .await?;
        info!(
            purchase_id = invoice.purchase_id,
            customer_id = customer.id,
            "Created {} purchase for {} month(s)",
            invoice_type,
            months
        );
        Ok(invoice)
    }

    /// Remembers the chat message that shows the payment link for a purchase.
    pub fn remember_payment_prompt(&self, purchase_id: i64, chat_id: i64, message_id: i32) {
        self.message_cache.insert(
            purchase_id,
            PromptRef {
                chat_id,
                message_id,
            },
        );
    }

    pub async fn process_purchase_by_id(&self, id: i64) -> ShopResult<ProcessOutcome> {
        let purchase = self
            .purchases
            .find_by_id(id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("purchase {id}")))?;

        match purchase.status {
            PurchaseStatus::Paid => {
                return self.after_already_paid(&purchase).await;
            }
            PurchaseStatus::Cancel => {
                warn!(purchase_id = id, "Payment reported for a cancelled purchase");
                return Ok(ProcessOutcome::Cancelled);
            }
            _ => {}
        }

        let customer = self
            .customers
            .find_by_id(purchase.customer_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("customer {}", purchase.customer_id)))?;

        if let Some(prompt) = self.message_cache.take(id) {
            if let Err(e) = self
                .messenger
                .delete_message(prompt.chat_id, prompt.message_id)
                .await
            {
                warn!(purchase_id = id, "Failed to delete payment prompt: {:#}", e);
            }
        }

        let settled = match self.purchases.settle(id).await? {
            SettleOutcome::Settled(settled) => settled,
            SettleOutcome::AlreadyPaid(paid) => return self.after_already_paid(&paid).await,
            SettleOutcome::Cancelled(_) => {
                warn!(purchase_id = id, "Purchase was cancelled before settlement");
                return Ok(ProcessOutcome::Cancelled);
            }
        };

        info!(
            purchase_id = id,
            customer_id = customer.id,
            amount = settled.amount,
            "Purchase paid, balance credited"
        );

        let text = self.translations.render(
            &customer.language,
            "payment_received",
            &[("amount", format_money(settled.amount))],
        );
        if let Err(e) = self.messenger.send_message(customer.telegram_id, &text).await {
            warn!(customer_id = customer.id, "Failed to notify customer: {:#}", e);
        }

        self.credit_referral_bonus(customer.telegram_id).await;

        Ok(ProcessOutcome::Completed(settled))
    }

    // A retry after a crash between settlement and the referral step still
    // reaches the referral guard.
    async fn after_already_paid(&self, purchase: &Purchase) -> ShopResult<ProcessOutcome> {
        debug!(purchase_id = purchase.id, "Purchase already paid");
        if let Some(customer) = self.customers.find_by_id(purchase.customer_id).await? {
            self.credit_referral_bonus(customer.telegram_id).await;
        }
        Ok(ProcessOutcome::AlreadyPaid)
    }

    // Runs after the settlement committed, so a failure must not fail the
    // payment. The bonus flag stays unset and the next paid purchase retries it.
    async fn credit_referral_bonus(&self, referee_telegram_id: i64) {
        if let Err(e) = self.referrals.credit_bonus_for(referee_telegram_id).await {
            error!(
                referee = referee_telegram_id,
                "Failed to credit referral bonus: {}", e
            );
        }
    }

    /// Completion signal from in-app payments, payload `<purchaseID>&<username>`.
    pub async fn handle_successful_payment(&self, payload: &str) -> ShopResult<ProcessOutcome> {
        let (purchase_id, username) = parse_invoice_payload(payload)?;
        debug!(purchase_id, ?username, "In-app payment received");
        self.process_purchase_by_id(purchase_id).await
    }

    /// A subscription paid on the external subscription service.
    ///
    /// `delivery_key` identifies the webhook delivery. A redelivery finds the
    /// purchase recorded by the first attempt and settles it at most once.
    pub async fn complete_external_subscription(
        &self,
        telegram_id: i64,
        amount: i64,
        months: i32,
        delivery_key: &str,
    ) -> ShopResult<ProcessOutcome> {
        self.providers.get(InvoiceType::Tribute)?;
        let (customer, created) = self
            .customers
            .get_or_create(telegram_id, &self.config.default_language)
            .await?;
        if created {
            info!(customer_id = customer.id, "Customer created from subscription webhook");
        }

        let amount = if amount > 0 { amount } else { self.quote(months) };
        validate_order(amount, months)?;
        let purchase = self
            .purchases
            .create_external(
                NewPurchase {
                    amount,
                    currency: self.config.currency.clone(),
                    customer_id: customer.id,
                    month: months,
                    invoice_type: InvoiceType::Tribute,
                    status: PurchaseStatus::Pending,
                },
                delivery_key,
            )
            .await?;
        debug!(purchase_id = purchase.id, "Subscription delivery {} recorded", delivery_key);
        self.process_purchase_by_id(purchase.id).await
    }

    /// Cancels the customer's still-pending external subscription purchases.
    pub async fn cancel_external_subscription(&self, telegram_id: i64) -> ShopResult<usize> {
        let Some(customer) = self.customers.find_by_telegram_id(telegram_id).await? else {
            debug!("Subscription cancelled for unknown customer {}", telegram_id);
            return Ok(0);
        };
        let pending = self
            .purchases
            .find_pending_by_customer(customer.id, InvoiceType::Tribute)
            .await?;

        let mut cancelled = 0;
        for purchase in pending {
            if self.purchases.cancel(purchase.id).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Spends balance on `months` of access. Provisioning is the source of
    /// truth: the debit is refunded when it fails.
    pub async fn purchase_from_balance(
        &self,
        customer_id: i64,
        months: i32,
    ) -> ShopResult<BalancePurchase> {
        if months <= 0 || months > MAX_MONTHS {
            return Err(ShopError::Validation(format!(
                "months must be between 1 and {MAX_MONTHS}, got {months}"
            )));
        }
        let customer = self
            .customers
            .find_by_id(customer_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("customer {customer_id}")))?;
        let price = self.quote(months);

        if !self.customers.try_debit(customer.id, price).await? {
            let text = self.translations.render(
                &customer.language,
                "insufficient_balance",
                &[
                    ("price", format_money(price)),
                    ("balance", format_money(customer.balance)),
                ],
            );
            if let Err(e) = self.messenger.send_message(customer.telegram_id, &text).await {
                warn!(customer_id, "Failed to send insufficient balance notice: {:#}", e);
            }
            return Ok(BalancePurchase::InsufficientBalance {
                price,
                balance: customer.balance,
            });
        }

        let access = match self
            .provisioner
            .create_or_update_user(
                customer.telegram_id,
                self.config.traffic_limit_bytes(),
                months * DAYS_PER_MONTH,
            )
            .await
        {
            Ok(access) => access,
            Err(e) => {
                error!(customer_id, "Provisioning failed, refunding {}: {:#}", price, e);
                self.customers.add_balance(customer.id, price).await?;
                return Err(ShopError::External(e));
            }
        };

        self.customers
            .update_subscription(customer.id, access.expires_at, &access.link)
            .await?;
        info!(customer_id, months, "Subscription bought from balance");

        let text = self.translations.render(
            &customer.language,
            "subscription_activated",
            &[
                ("expire", access.expires_at.format("%Y-%m-%d").to_string()),
                ("link", access.link.clone()),
            ],
        );
        if let Err(e) = self.messenger.send_message(customer.telegram_id, &text).await {
            warn!(customer_id, "Failed to confirm subscription: {:#}", e);
        }

        Ok(BalancePurchase::Activated(access))
    }

    /// `false` when the purchase was already terminal.
    pub async fn cancel_payment(&self, id: i64) -> ShopResult<bool> {
        self.purchases
            .find_by_id(id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("purchase {id}")))?;
        let cancelled = self.purchases.cancel(id).await?;
        if cancelled {
            info!(purchase_id = id, "Purchase cancelled");
        }
        Ok(cancelled)
    }

    /// Cancels unpaid purchases older than `ttl`. Per-item failures are logged
    /// and skipped.
    pub async fn cancel_stale_purchases(&self, ttl: Duration) -> ShopResult<usize> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ShopError::Validation(format!("invalid ttl: {e}")))?;
        let stale = self.purchases.find_stale_pending(Utc::now() - ttl).await?;

        let mut cancelled = 0;
        for purchase in stale {
            match self.purchases.cancel(purchase.id).await {
                Ok(true) => {
                    cancelled += 1;
                    self.message_cache.take(purchase.id);
                }
                Ok(false) => {}
                Err(e) => error!(purchase_id = purchase.id, "Failed to cancel stale purchase: {}", e),
            }
        }
        if cancelled > 0 {
            info!("Cancelled {} stale purchases", cancelled);
        }
        Ok(cancelled)
    }

    /// Runs the stale purchase sweep until `shutdown` fires.
    pub async fn run_stale_sweep(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cancel_stale_purchases(self.config.pending_purchase_ttl).await {
                        error!("Stale purchase sweep failed: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_invoice_payloads() {
        assert_eq!(
            parse_invoice_payload("17&alice").ok(),
            Some((17, Some("alice".to_string())))
        );
        assert_eq!(parse_invoice_payload("17&").ok(), Some((17, None)));
        assert_eq!(parse_invoice_payload("17").ok(), Some((17, None)));
        assert!(matches!(
            parse_invoice_payload("abc&alice"),
            Err(ShopError::Validation(_))
        ));
    }
}
