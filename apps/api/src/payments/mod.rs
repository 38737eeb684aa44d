//! Checkout, payment confirmation and promo codes.

pub mod handlers;
pub mod pipeline;
pub mod promo;
pub mod provider;
pub mod webhook;
