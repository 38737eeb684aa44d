pub mod analysis;
pub mod payment;
pub mod promo;
