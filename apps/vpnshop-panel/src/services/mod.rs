pub mod message_cache;
pub mod messenger;
pub mod pay_service;
pub mod payment;
pub mod promo_service;
pub mod provisioning;
pub mod referral_service;
pub mod wizard_service;
