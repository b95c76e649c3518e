use std::sync::Arc;

use rand::Rng;
use tracing::{error, info, warn};
use vpnshop_db::models::customer::Customer;
use vpnshop_db::models::promo::{
    ClaimOutcome, MAX_DAYS, MAX_MONTHS, MAX_PROMO_USES, NewPromocode, PromoKind, PromoUses,
    Promocode,
};
use vpnshop_db::{CustomerStore, PromoStore, StoreError};

use crate::config::Config;
use crate::error::{ShopError, ShopResult};
use crate::i18n::{Translations, format_money};
use crate::services::messenger::Messenger;
use crate::services::provisioning::{ProvisionedAccess, Provisioner};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_GROUPS: usize = 3;
const CODE_GROUP_LEN: usize = 4;
const MAX_REGENERATIONS: usize = 3;

/// `ABCD-EFGH-JKLM` style code.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_GROUPS)
        .map(|_| {
            (0..CODE_GROUP_LEN)
                .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    BalanceCredited(i64),
    SubscriptionExtended(ProvisionedAccess),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromoStats {
    pub used: i64,
    /// `None` for unlimited codes.
    pub total: Option<i64>,
}

/// What a new code grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoGrant {
    Balance { amount: i64 },
    Subscription { days: i32, months: i32 },
}

pub struct PromoService {
    config: Arc<Config>,
    promos: Arc<dyn PromoStore>,
    customers: Arc<dyn CustomerStore>,
    provisioner: Arc<dyn Provisioner>,
    messenger: Arc<dyn Messenger>,
    translations: Arc<Translations>,
}

impl PromoService {
    pub fn new(
        config: Arc<Config>,
        promos: Arc<dyn PromoStore>,
        customers: Arc<dyn CustomerStore>,
        provisioner: Arc<dyn Provisioner>,
        messenger: Arc<dyn Messenger>,
        translations: Arc<Translations>,
    ) -> Self {
        Self {
            config,
            promos,
            customers,
            provisioner,
            messenger,
            translations,
        }
    }

    pub async fn create_balance_promocode(
        &self,
        created_by: i64,
        amount: i64,
        uses: PromoUses,
        code: Option<&str>,
    ) -> ShopResult<Promocode> {
        if amount <= 0 {
            return Err(ShopError::Validation("promocode amount must be positive".into()));
        }
        self.insert(created_by, PromoGrant::Balance { amount }, uses, code)
            .await
    }

    pub async fn create_subscription_promocode(
        &self,
        created_by: i64,
        days: i32,
        months: i32,
        uses: PromoUses,
        code: Option<&str>,
    ) -> ShopResult<Promocode> {
        if days < 0 || months < 0 || (days == 0 && months == 0) {
            return Err(ShopError::Validation(
                "promocode must grant a positive duration".into(),
            ));
        }
        if days > MAX_DAYS || months > MAX_MONTHS {
            return Err(ShopError::Validation(format!(
                "promocode may grant at most {MAX_DAYS} days or {MAX_MONTHS} months"
            )));
        }
        self.insert(created_by, PromoGrant::Subscription { days, months }, uses, code)
            .await
    }

    /// Self-service: a customer buys a subscription code for `months` with `uses`
    /// redemptions. Admins issue codes for free.
    pub async fn create_promocode(
        &self,
        customer: &Customer,
        months: i32,
        uses: i32,
    ) -> ShopResult<Promocode> {
        if months <= 0 || uses <= 0 {
            return Err(ShopError::Validation("months and uses must be positive".into()));
        }
        if months > MAX_MONTHS || uses > MAX_PROMO_USES {
            return Err(ShopError::Validation(format!(
                "at most {MAX_MONTHS} months and {MAX_PROMO_USES} uses per promocode"
            )));
        }
        let grant = PromoGrant::Subscription { days: 0, months };
        let uses_left = PromoUses::Limited(uses);

        if self.config.is_admin(customer.telegram_id) {
            return self.insert(customer.telegram_id, grant, uses_left, None).await;
        }

        let cost = self
            .config
            .pricing
            .month_1
            .checked_mul(i64::from(months))
            .and_then(|c| c.checked_mul(i64::from(uses)))
            .filter(|c| *c > 0)
            .ok_or_else(|| ShopError::Validation("promocode price is out of range".into()))?;
        if !self.customers.try_debit(customer.id, cost).await? {
            let available = self
                .customers
                .find_by_id(customer.id)
                .await?
                .map(|c| c.balance)
                .unwrap_or_default();
            return Err(ShopError::InsufficientBalance {
                needed: cost,
                available,
            });
        }

        match self.insert(customer.telegram_id, grant, uses_left, None).await {
            Ok(promo) => {
                info!(
                    customer_id = customer.id,
                    "Customer bought promocode {} for {}", promo.code, cost
                );
                Ok(promo)
            }
            Err(e) => {
                error!(customer_id = customer.id, "Promocode creation failed, refunding: {}", e);
                self.customers.add_balance(customer.id, cost).await?;
                Err(e)
            }
        }
    }

    async fn insert(
        &self,
        created_by: i64,
        grant: PromoGrant,
        uses: PromoUses,
        code: Option<&str>,
    ) -> ShopResult<Promocode> {
        if let PromoUses::Limited(left) = uses {
            if left <= 0 || left > MAX_PROMO_USES {
                return Err(ShopError::Validation(format!(
                    "uses must be between 1 and {MAX_PROMO_USES}"
                )));
            }
        }
        let (kind, days, months, amount) = match grant {
            PromoGrant::Balance { amount } => (PromoKind::Balance, 0, 0, amount),
            PromoGrant::Subscription { days, months } => (PromoKind::Subscription, days, months, 0),
        };
        let new_promo = |code: String| NewPromocode {
            code,
            kind,
            days,
            months,
            amount,
            uses,
            created_by,
        };

        if let Some(code) = code {
            let code = normalize_code(code);
            if code.is_empty() {
                return Err(ShopError::Validation("promocode must not be empty".into()));
            }
            return self.promos.create(new_promo(code)).await.map_err(|e| match e {
                StoreError::Conflict(_) => ShopError::Validation("promocode already exists".into()),
                other => other.into(),
            });
        }

        let mut attempt = 0;
        loop {
            let code = generate_code(&mut rand::rng());
            match self.promos.create(new_promo(code)).await {
                Ok(promo) => {
                    info!("Promocode {} created by {}", promo.code, created_by);
                    return Ok(promo);
                }
                Err(e) if e.is_conflict() && attempt < MAX_REGENERATIONS => {
                    attempt += 1;
                    warn!("Generated promocode collided, regenerating ({attempt}/{MAX_REGENERATIONS})");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn apply_promocode(&self, customer_id: i64, code: &str) -> ShopResult<Redemption> {
        let customer = self
            .customers
            .find_by_id(customer_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("customer {customer_id}")))?;
        let promo = self
            .promos
            .find_by_code(&normalize_code(code))
            .await?
            .filter(Promocode::is_redeemable)
            .ok_or(ShopError::PromoInvalid)?;

        let usage_id = match self.promos.claim_use(promo.id, customer.id).await? {
            ClaimOutcome::Claimed(usage_id) => usage_id,
            ClaimOutcome::Unavailable => return Err(ShopError::PromoInvalid),
            ClaimOutcome::AlreadyUsed => return Err(ShopError::PromoAlreadyUsed),
        };

        let redemption = match self.grant(&customer, &promo).await {
            Ok(redemption) => redemption,
            Err(e) => {
                warn!(
                    customer_id,
                    "Promocode {} grant failed, releasing claim: {}", promo.code, e
                );
                if let Err(release) = self.promos.release_use(usage_id).await {
                    error!("Failed to release promocode usage {}: {}", usage_id, release);
                }
                return Err(e);
            }
        };

        info!(customer_id, "Promocode {} redeemed", promo.code);

        let text = match &redemption {
            Redemption::BalanceCredited(amount) => self.translations.render(
                &customer.language,
                "promo_balance",
                &[("amount", format_money(*amount))],
            ),
            Redemption::SubscriptionExtended(access) => self.translations.render(
                &customer.language,
                "promo_subscription",
                &[
                    ("expire", access.expires_at.format("%Y-%m-%d").to_string()),
                    ("link", access.link.clone()),
                ],
            ),
        };
        if let Err(e) = self.messenger.send_message(customer.telegram_id, &text).await {
            warn!(customer_id, "Failed to confirm promocode: {:#}", e);
        }

        Ok(redemption)
    }

    async fn grant(&self, customer: &Customer, promo: &Promocode) -> ShopResult<Redemption> {
        match promo.kind {
            PromoKind::Balance => {
                self.customers.add_balance(customer.id, promo.amount).await?;
                Ok(Redemption::BalanceCredited(promo.amount))
            }
            PromoKind::Subscription => {
                let access = self
                    .provisioner
                    .create_or_update_user(
                        customer.telegram_id,
                        self.config.traffic_limit_bytes(),
                        promo.grant_days(),
                    )
                    .await?;
                // The remote grant already happened; a failed local write must
                // not hand the use back.
                if let Err(e) = self
                    .customers
                    .update_subscription(customer.id, access.expires_at, &access.link)
                    .await
                {
                    error!(
                        customer_id = customer.id,
                        "Failed to store subscription from promocode {}: {}", promo.code, e
                    );
                }
                Ok(Redemption::SubscriptionExtended(access))
            }
        }
    }

    pub async fn promocode(&self, id: i64) -> ShopResult<Promocode> {
        self.promos
            .find_by_id(id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("promocode {id}")))
    }

    pub async fn list(&self, include_deleted: bool) -> ShopResult<Vec<Promocode>> {
        Ok(self.promos.list(include_deleted).await?)
    }

    pub async fn set_promocode_status(&self, id: i64, active: bool) -> ShopResult<bool> {
        Ok(self.promos.set_active(id, active).await?)
    }

    /// Soft delete. Callers check `active` first; active codes are frozen before
    /// they are deleted.
    pub async fn delete_promocode(&self, id: i64) -> ShopResult<bool> {
        Ok(self.promos.soft_delete(id).await?)
    }

    pub async fn promo_stats(&self, id: i64) -> ShopResult<PromoStats> {
        let promo = self.promocode(id).await?;
        let used = self.promos.usage_count(id).await?;
        let total = match promo.uses {
            PromoUses::Unlimited => None,
            PromoUses::Limited(left) => Some(used + i64::from(left.max(0))),
        };
        Ok(PromoStats { used, total })
    }
}
