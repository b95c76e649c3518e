use std::sync::Arc;

use tracing::{debug, info, warn};
use vpnshop_db::models::customer::Customer;
use vpnshop_db::models::referral::Referral;
use vpnshop_db::{CustomerStore, ReferralStore};

use crate::error::ShopResult;
use crate::i18n::{Translations, format_money};
use crate::services::messenger::Messenger;

const REF_PREFIX: &str = "ref_";

/// Referrer telegram id carried by a `/start ref_<id>` payload.
pub fn parse_referral_payload(payload: &str) -> Option<i64> {
    payload
        .trim()
        .strip_prefix(REF_PREFIX)
        .and_then(|id| id.parse::<i64>().ok())
        .filter(|id| *id > 0)
}

pub struct ReferralService {
    referrals: Arc<dyn ReferralStore>,
    customers: Arc<dyn CustomerStore>,
    messenger: Arc<dyn Messenger>,
    translations: Arc<Translations>,
    bonus: i64,
}

impl ReferralService {
    pub fn new(
        referrals: Arc<dyn ReferralStore>,
        customers: Arc<dyn CustomerStore>,
        messenger: Arc<dyn Messenger>,
        translations: Arc<Translations>,
        bonus: i64,
    ) -> Self {
        Self {
            referrals,
            customers,
            messenger,
            translations,
            bonus,
        }
    }

    /// Records who invited a newly created customer. Only first contact counts.
    pub async fn register_from_start(
        &self,
        customer: &Customer,
        newly_created: bool,
        start_payload: &str,
    ) -> ShopResult<Option<Referral>> {
        let Some(referrer_id) = parse_referral_payload(start_payload) else {
            return Ok(None);
        };
        if !newly_created {
            debug!("Ignoring referral payload for existing customer {}", customer.telegram_id);
            return Ok(None);
        }
        if referrer_id == customer.telegram_id {
            return Ok(None);
        }
        if self.customers.find_by_telegram_id(referrer_id).await?.is_none() {
            debug!("Referrer {} is unknown", referrer_id);
            return Ok(None);
        }

        let referral = self.referrals.create(referrer_id, customer.telegram_id).await?;
        if referral.is_some() {
            info!("Customer {} was referred by {}", customer.telegram_id, referrer_id);
        }
        Ok(referral)
    }

    /// Credits the referrer of `referee_telegram_id` once per referral.
    pub async fn credit_bonus_for(&self, referee_telegram_id: i64) -> ShopResult<Option<Referral>> {
        let Some(referral) = self
            .referrals
            .grant_bonus(referee_telegram_id, self.bonus)
            .await?
        else {
            return Ok(None);
        };

        info!(
            "Referral bonus {} credited to {} for referee {}",
            self.bonus, referral.referrer_id, referee_telegram_id
        );

        let language = match self.customers.find_by_telegram_id(referral.referrer_id).await {
            Ok(Some(referrer)) => referrer.language,
            _ => String::new(),
        };
        let text = self.translations.render(
            &language,
            "referral_bonus",
            &[("amount", format_money(self.bonus))],
        );
        if let Err(e) = self.messenger.send_message(referral.referrer_id, &text).await {
            warn!("Failed to notify referrer {}: {:#}", referral.referrer_id, e);
        }

        Ok(Some(referral))
    }

    pub async fn referral_count(&self, referrer_telegram_id: i64) -> ShopResult<i64> {
        Ok(self.referrals.count_by_referrer(referrer_telegram_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_referral_payloads() {
        assert_eq!(parse_referral_payload("ref_42"), Some(42));
        assert_eq!(parse_referral_payload(" ref_42 "), Some(42));
        assert_eq!(parse_referral_payload("ref_"), None);
        assert_eq!(parse_referral_payload("ref_-3"), None);
        assert_eq!(parse_referral_payload("promo_42"), None);
        assert_eq!(parse_referral_payload(""), None);
    }
}
