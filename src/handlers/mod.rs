pub mod common;
pub mod coupons;
pub mod orders;
