use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Prices in minor units for the fixed subscription durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pricing {
    pub month_1: i64,
    pub month_3: i64,
    pub month_6: i64,
    pub month_12: i64,
}

impl Pricing {
    /// Unlisted durations are billed at the monthly rate.
    pub fn price(&self, months: i32) -> i64 {
        match months {
            1 => self.month_1,
            3 => self.month_3,
            6 => self.month_6,
            12 => self.month_12,
            other => self.month_1.saturating_mul(i64::from(other.max(0))),
        }
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            month_1: 10_000,
            month_3: 27_000,
            month_6: 50_000,
            month_12: 90_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CryptoPayConfig {
    pub token: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct TributeConfig {
    pub api_key: String,
    pub payment_url: String,
}

#[derive(Debug, Clone)]
pub struct RemnawaveConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bot_token: String,
    pub listen_port: u16,
    pub admin_telegram_id: i64,
    pub currency: String,
    pub pricing: Pricing,
    pub stars_pricing: Pricing,
    pub traffic_limit_gb: i64,
    pub referral_bonus: i64,
    pub crypto_pay: Option<CryptoPayConfig>,
    pub stars_enabled: bool,
    pub tribute: Option<TributeConfig>,
    pub remnawave: RemnawaveConfig,
    pub pending_purchase_ttl: Duration,
    pub message_cache_ttl: Duration,
    pub default_language: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            bot_token: String::new(),
            listen_port: 8080,
            admin_telegram_id: 0,
            currency: "RUB".to_string(),
            pricing: Pricing::default(),
            stars_pricing: Pricing {
                month_1: 100,
                month_3: 270,
                month_6: 500,
                month_12: 900,
            },
            traffic_limit_gb: 0,
            referral_bonus: 15_000,
            crypto_pay: None,
            stars_enabled: false,
            tribute: None,
            remnawave: RemnawaveConfig {
                url: "http://localhost:3000".to_string(),
                token: String::new(),
            },
            pending_purchase_ttl: Duration::from_secs(60 * 60),
            message_cache_ttl: Duration::from_secs(60 * 60),
            default_language: "en".to_string(),
        }
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
        _ => Ok(default),
    }
}

fn flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let pricing = Pricing {
            month_1: parsed_or("PRICE_1", defaults.pricing.month_1)?,
            month_3: parsed_or("PRICE_3", defaults.pricing.month_3)?,
            month_6: parsed_or("PRICE_6", defaults.pricing.month_6)?,
            month_12: parsed_or("PRICE_12", defaults.pricing.month_12)?,
        };
        let stars_pricing = Pricing {
            month_1: parsed_or("STARS_PRICE_1", defaults.stars_pricing.month_1)?,
            month_3: parsed_or("STARS_PRICE_3", defaults.stars_pricing.month_3)?,
            month_6: parsed_or("STARS_PRICE_6", defaults.stars_pricing.month_6)?,
            month_12: parsed_or("STARS_PRICE_12", defaults.stars_pricing.month_12)?,
        };

        let crypto_pay = if flag("CRYPTO_PAY_ENABLED") {
            Some(CryptoPayConfig {
                token: required("CRYPTO_PAY_TOKEN")?,
                url: env::var("CRYPTO_PAY_URL")
                    .unwrap_or_else(|_| "https://pay.crypt.bot".to_string()),
            })
        } else {
            None
        };

        let tribute = if flag("TRIBUTE_ENABLED") {
            Some(TributeConfig {
                api_key: required("TRIBUTE_API_KEY")?,
                payment_url: required("TRIBUTE_PAYMENT_URL")?,
            })
        } else {
            None
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bot_token: required("BOT_TOKEN")?,
            listen_port: parsed_or("LISTEN_PORT", defaults.listen_port)?,
            admin_telegram_id: parsed_or("ADMIN_TELEGRAM_ID", defaults.admin_telegram_id)?,
            currency: env::var("CURRENCY").unwrap_or(defaults.currency),
            pricing,
            stars_pricing,
            traffic_limit_gb: parsed_or("TRAFFIC_LIMIT_GB", defaults.traffic_limit_gb)?,
            referral_bonus: parsed_or("REFERRAL_BONUS", defaults.referral_bonus)?,
            crypto_pay,
            stars_enabled: flag("TELEGRAM_STARS_ENABLED"),
            tribute,
            remnawave: RemnawaveConfig {
                url: required("REMNAWAVE_URL")?,
                token: required("REMNAWAVE_TOKEN")?,
            },
            pending_purchase_ttl: Duration::from_secs(
                60 * parsed_or("PENDING_PURCHASE_TTL_MINUTES", 60u64)?,
            ),
            message_cache_ttl: Duration::from_secs(parsed_or(
                "MESSAGE_CACHE_TTL_SECONDS",
                defaults.message_cache_ttl.as_secs(),
            )?),
            default_language: env::var("DEFAULT_LANGUAGE").unwrap_or(defaults.default_language),
        })
    }

    pub fn traffic_limit_bytes(&self) -> i64 {
        self.traffic_limit_gb * 1024 * 1024 * 1024
    }

    pub fn is_admin(&self, telegram_id: i64) -> bool {
        self.admin_telegram_id != 0 && self.admin_telegram_id == telegram_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_durations_use_their_price() {
        let pricing = Pricing::default();
        assert_eq!(pricing.price(1), 10_000);
        assert_eq!(pricing.price(3), 27_000);
        assert_eq!(pricing.price(12), 90_000);
    }

    #[test]
    fn other_durations_fall_back_to_monthly_rate() {
        let pricing = Pricing::default();
        assert_eq!(pricing.price(2), 20_000);
        assert_eq!(pricing.price(0), 0);
    }

    #[test]
    fn admin_check_ignores_unset_id() {
        let config = Config::default();
        assert!(!config.is_admin(0));
        let config = Config {
            admin_telegram_id: 7,
            ..Config::default()
        };
        assert!(config.is_admin(7));
        assert!(!config.is_admin(8));
    }
}
