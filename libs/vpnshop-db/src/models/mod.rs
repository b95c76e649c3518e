pub mod customer;
pub mod promo;
pub mod purchase;
pub mod referral;
